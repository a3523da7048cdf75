//! Concurrent fan-out aggregation with a keyed TTL cache.
//!
//! Aggregator tools call several peer servers and synthesize one composite
//! response. Every fetcher runs concurrently under a `safe_call` wrapper
//! that never raises: a failing, slow, or unreachable source degrades to
//! `{"status": "unavailable"}` in the composite instead of failing it.
//! Composites are cached in the store under `(category, key)` with an
//! absolute expiry.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use serde_json::{json, Map, Value};

use crate::error::StorageError;
use crate::events::BoxError;
use crate::storage::{self, DbPool};

/// The future one fetcher produces. Any error degrades the source; it is
/// never surfaced to the aggregation caller.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>;

/// A named thunk performing one remote call.
pub struct Fetcher {
    /// Field name in the composite result.
    pub name: String,
    /// The deferred remote call.
    pub fetch: Box<dyn FnOnce() -> FetchFuture + Send>,
}

impl Fetcher {
    /// Convenience constructor.
    pub fn new(name: &str, fetch: impl FnOnce() -> FetchFuture + Send + 'static) -> Self {
        Self {
            name: name.to_string(),
            fetch: Box::new(fetch),
        }
    }
}

/// Cache addressing and freshness parameters for one aggregation.
pub struct AggregateParams {
    /// Cache category (e.g. `overview`).
    pub category: String,
    /// Cache key within the category.
    pub key: String,
    /// How long the composite stays fresh.
    pub ttl: Duration,
    /// Per-fetcher deadline.
    pub fetch_timeout: Duration,
    /// Skip the cache read (the write still happens).
    pub force_refresh: bool,
}

/// Fan out to every fetcher and return the composite, cache-first.
///
/// The composite maps each fetcher name to its result or
/// `{"status": "unavailable"}`, records per-source availability under
/// `dataSources`, and stamps `generatedAt` and `fromCache`.
pub async fn aggregate(
    db: &DbPool,
    params: AggregateParams,
    fetchers: Vec<Fetcher>,
) -> Result<Value, StorageError> {
    if !params.force_refresh {
        if let Some(mut cached) = storage::cache::get_fresh(db, &params.category, &params.key).await? {
            if let Some(object) = cached.as_object_mut() {
                object.insert("fromCache".to_string(), json!(true));
            }
            tracing::debug!(category = %params.category, key = %params.key, "composite served from cache");
            return Ok(cached);
        }
    }

    let timeout = params.fetch_timeout;
    let results = join_all(fetchers.into_iter().map(|fetcher| {
        let name = fetcher.name;
        let fetch = fetcher.fetch;
        async move {
            let value = safe_call(&name, timeout, fetch()).await;
            (name, value)
        }
    }))
    .await;

    let mut composite = Map::new();
    let mut data_sources = Map::new();
    for (name, value) in results {
        let availability = if value.is_some() { "available" } else { "unavailable" };
        data_sources.insert(name.clone(), json!(availability));
        composite.insert(name, value.unwrap_or_else(|| json!({ "status": "unavailable" })));
    }
    composite.insert("dataSources".to_string(), Value::Object(data_sources));
    composite.insert(
        "generatedAt".to_string(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    composite.insert("fromCache".to_string(), json!(false));
    let composite = Value::Object(composite);

    let expires_at = (Utc::now() + chrono::Duration::from_std(params.ttl).unwrap_or_default())
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    storage::cache::put(db, &params.category, &params.key, &composite, &expires_at).await?;

    Ok(composite)
}

/// Await one fetcher, converting every failure mode into `None`.
async fn safe_call(name: &str, timeout: Duration, fut: FetchFuture) -> Option<Value> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(source = name, error = %e, "aggregation source degraded");
            None
        }
        Err(_) => {
            tracing::warn!(source = name, timeout_secs = timeout.as_secs(), "aggregation source timed out");
            None
        }
    }
}

/// Whether a timestamp produced by this module parses as ISO-8601.
pub fn is_iso_timestamp(text: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    fn params(category: &str, force_refresh: bool) -> AggregateParams {
        AggregateParams {
            category: category.to_string(),
            key: "default".to_string(),
            ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_millis(200),
            force_refresh,
        }
    }

    fn ok_fetcher(name: &str, value: Value) -> Fetcher {
        Fetcher::new(name, move || Box::pin(async move { Ok(value) }))
    }

    fn failing_fetcher(name: &str) -> Fetcher {
        Fetcher::new(name, || {
            Box::pin(async { Err::<Value, BoxError>("server not registered: peer".into()) })
        })
    }

    #[tokio::test]
    async fn all_sources_available() {
        let db = init_test_db().await.expect("init db");
        let composite = aggregate(
            &db,
            params("overview", false),
            vec![
                ok_fetcher("scrum-board", json!({ "sprints": 2 })),
                ok_fetcher("agile-metrics", json!({ "velocity": 34 })),
            ],
        )
        .await
        .expect("aggregate");

        assert_eq!(composite["scrum-board"], json!({ "sprints": 2 }));
        assert_eq!(composite["agile-metrics"], json!({ "velocity": 34 }));
        assert_eq!(composite["dataSources"]["scrum-board"], json!("available"));
        assert_eq!(composite["fromCache"], json!(false));
        assert!(is_iso_timestamp(composite["generatedAt"].as_str().expect("string")));
    }

    #[tokio::test]
    async fn failing_source_degrades_without_failing_the_composite() {
        let db = init_test_db().await.expect("init db");
        let composite = aggregate(
            &db,
            params("overview", false),
            vec![
                ok_fetcher("scrum-board", json!({ "sprints": 2 })),
                failing_fetcher("agile-metrics"),
            ],
        )
        .await
        .expect("aggregate never raises for source failures");

        assert_eq!(composite["agile-metrics"], json!({ "status": "unavailable" }));
        assert_eq!(composite["dataSources"]["agile-metrics"], json!("unavailable"));
        assert_eq!(composite["dataSources"]["scrum-board"], json!("available"));
    }

    #[tokio::test]
    async fn no_sources_available_still_yields_a_composite() {
        let db = init_test_db().await.expect("init db");
        let composite = aggregate(
            &db,
            params("overview", false),
            vec![failing_fetcher("a"), failing_fetcher("b")],
        )
        .await
        .expect("aggregate");

        assert_eq!(composite["a"], json!({ "status": "unavailable" }));
        assert_eq!(composite["b"], json!({ "status": "unavailable" }));
        assert!(is_iso_timestamp(composite["generatedAt"].as_str().expect("string")));
    }

    #[tokio::test]
    async fn slow_source_times_out_and_degrades() {
        let db = init_test_db().await.expect("init db");
        let composite = aggregate(
            &db,
            params("overview", false),
            vec![Fetcher::new("slow", || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(json!({ "never": "returned" }))
                })
            })],
        )
        .await
        .expect("aggregate");

        assert_eq!(composite["slow"], json!({ "status": "unavailable" }));
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let db = init_test_db().await.expect("init db");
        let first = aggregate(
            &db,
            params("overview", false),
            vec![ok_fetcher("scrum-board", json!(1))],
        )
        .await
        .expect("first");
        assert_eq!(first["fromCache"], json!(false));

        // No fetchers this time: a cache miss would yield an empty composite.
        let second = aggregate(&db, params("overview", false), vec![])
            .await
            .expect("second");
        assert_eq!(second["fromCache"], json!(true));
        assert_eq!(second["scrum-board"], json!(1));
    }

    #[tokio::test]
    async fn force_refresh_bypasses_the_cache_read() {
        let db = init_test_db().await.expect("init db");
        aggregate(
            &db,
            params("overview", false),
            vec![ok_fetcher("scrum-board", json!("old"))],
        )
        .await
        .expect("seed");

        let refreshed = aggregate(
            &db,
            params("overview", true),
            vec![ok_fetcher("scrum-board", json!("new"))],
        )
        .await
        .expect("refresh");
        assert_eq!(refreshed["scrum-board"], json!("new"));
        assert_eq!(refreshed["fromCache"], json!(false));

        // The refreshed composite replaced the cached one.
        let cached = aggregate(&db, params("overview", false), vec![])
            .await
            .expect("cached");
        assert_eq!(cached["scrum-board"], json!("new"));
    }
}
