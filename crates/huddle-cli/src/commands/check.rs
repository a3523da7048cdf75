//! The `check` subcommand: validate configuration and probe the database.

use anyhow::Context;
use huddle_core::config::Config;
use huddle_core::storage;

/// Print a readiness report for the current configuration.
///
/// Configuration itself is already validated by the loader; this verifies
/// the parts that need I/O (database file, migrations) and summarizes the
/// peer servers the pool would register.
pub async fn execute(config: &Config) -> anyhow::Result<()> {
    println!("Configuration: ok");
    println!("  db_path: {}", config.storage.db_path);
    println!("  call timeout: {}s", config.pool.call_timeout_secs);
    println!(
        "  cache ttl: {}s (fetch timeout {}s)",
        config.aggregator.cache_ttl_secs, config.aggregator.fetch_timeout_secs
    );

    let db = storage::init_db(&config.storage.db_path)
        .await
        .context("database initialization failed")?;
    storage::ping(&db).await.context("database probe failed")?;
    println!("Database: ok");

    if config.servers.is_empty() {
        println!("Peer servers: none configured");
        println!("  Hint: add [[servers]] entries or set HUDDLE_SERVER_<NAME>_URL.");
    } else {
        println!("Peer servers: {}", config.servers.len());
        for server in &config.servers {
            let target = server
                .url
                .as_deref()
                .or(server.command.as_deref())
                .unwrap_or("(linked in-memory)");
            println!("  {} [{}] {}", server.name, server.transport, target);
        }
    }

    println!("Overview sources: {}", config.aggregator.sources.len());
    for source in &config.aggregator.sources {
        println!("  {} <- {}.{}", source.name, source.server, source.tool);
    }

    db.close().await;
    Ok(())
}
