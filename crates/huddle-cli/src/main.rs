/// Huddle CLI - orchestrator for the Huddle MCP server suite.
///
/// Entry point for the huddle binary. Parses CLI arguments, initializes
/// logging, and dispatches to subcommand handlers.
mod commands;

use clap::Parser;
use huddle_core::config::Config;
use tracing_subscriber::EnvFilter;

/// Collaboration fabric for the Huddle MCP server suite
#[derive(Parser)]
#[command(name = "huddle")]
#[command(version)]
#[command(about = "Collaboration fabric for the Huddle MCP server suite")]
#[command(after_help = "\
Quick start:
  1. huddle check  — validate configuration and peer server entries
  2. huddle serve  — serve the orchestrator over stdio")]
struct Cli {
    /// Path to config.toml
    #[arg(
        short = 'c',
        long,
        global = true,
        default_value = "~/.huddle/config.toml"
    )]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Serve the orchestrator MCP server on stdio
    Serve,
    /// Validate configuration, database, and registered peer servers
    Check,
}

/// Expand `~` in the config path the same way the storage layer does.
fn expand_config_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing-subscriber.
    //
    // Priority: HUDDLE_LOG env var > --verbose/--quiet flags > default.
    // Logging goes to stderr: stdout belongs to the MCP transport when
    // serving.
    let filter = if let Ok(spec) = std::env::var("HUDDLE_LOG") {
        EnvFilter::new(spec)
    } else if cli.verbose {
        EnvFilter::new("huddle=debug,huddle_core=debug,huddle_mcp=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("huddle=info,huddle_core=info,huddle_mcp=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose)
        .compact()
        .init();

    let config_path = expand_config_path(&cli.config);
    let config = Config::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    match cli.command {
        Commands::Serve => huddle_mcp::run_stdio_server(config).await,
        Commands::Check => commands::check::execute(&config).await,
    }
}
