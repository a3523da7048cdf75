//! CRUD operations for the aggregation `cache` table.
//!
//! Entries are keyed by `(category, key)` and carry an absolute expiry
//! timestamp. Reads never return expired values; sweeping them out is a
//! separate maintenance call.

use serde_json::Value;

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// Read a non-expired cache entry. Expired or missing entries are a miss.
pub async fn get_fresh(
    pool: &DbPool,
    category: &str,
    key: &str,
) -> Result<Option<Value>, StorageError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT value FROM cache WHERE category = ?1 AND key = ?2 AND expires_at > ?3",
    )
    .bind(category)
    .bind(key)
    .bind(now_iso())
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    row.map(|(text,)| {
        serde_json::from_str(&text).map_err(|e| StorageError::CorruptJson {
            column: "cache.value".to_string(),
            message: e.to_string(),
        })
    })
    .transpose()
}

/// Write a cache entry, replacing any previous value for the pair.
pub async fn put(
    pool: &DbPool,
    category: &str,
    key: &str,
    value: &Value,
    expires_at: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO cache (category, key, value, expires_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(category, key) DO UPDATE SET value = excluded.value, \
         expires_at = excluded.expires_at",
    )
    .bind(category)
    .bind(key)
    .bind(value.to_string())
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Delete every expired entry. Returns the number of rows removed.
pub async fn purge_expired(pool: &DbPool) -> Result<u64, StorageError> {
    let result = sqlx::query("DELETE FROM cache WHERE expires_at <= ?1")
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;
    use chrono::{Duration, SecondsFormat, Utc};
    use serde_json::json;

    fn iso_in(seconds: i64) -> String {
        (Utc::now() + Duration::seconds(seconds)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    #[tokio::test]
    async fn missing_entry_is_a_miss() {
        let pool = init_test_db().await.expect("init db");
        let hit = get_fresh(&pool, "overview", "default").await.expect("get");
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn fresh_entry_is_returned() {
        let pool = init_test_db().await.expect("init db");
        let value = json!({ "dataSources": { "scrum-board": "available" } });
        put(&pool, "overview", "default", &value, &iso_in(60)).await.expect("put");

        let hit = get_fresh(&pool, "overview", "default").await.expect("get");
        assert_eq!(hit, Some(value));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let pool = init_test_db().await.expect("init db");
        put(&pool, "overview", "default", &json!({}), &iso_in(-1)).await.expect("put");

        let hit = get_fresh(&pool, "overview", "default").await.expect("get");
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing_pair() {
        let pool = init_test_db().await.expect("init db");
        put(&pool, "project", "alpha", &json!(1), &iso_in(60)).await.expect("put 1");
        put(&pool, "project", "alpha", &json!(2), &iso_in(60)).await.expect("put 2");

        let hit = get_fresh(&pool, "project", "alpha").await.expect("get");
        assert_eq!(hit, Some(json!(2)));
    }

    #[tokio::test]
    async fn categories_do_not_collide() {
        let pool = init_test_db().await.expect("init db");
        put(&pool, "overview", "k", &json!("a"), &iso_in(60)).await.expect("put");
        put(&pool, "project", "k", &json!("b"), &iso_in(60)).await.expect("put");

        assert_eq!(get_fresh(&pool, "overview", "k").await.expect("get"), Some(json!("a")));
        assert_eq!(get_fresh(&pool, "project", "k").await.expect("get"), Some(json!("b")));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let pool = init_test_db().await.expect("init db");
        put(&pool, "overview", "stale", &json!({}), &iso_in(-5)).await.expect("put stale");
        put(&pool, "overview", "fresh", &json!({}), &iso_in(60)).await.expect("put fresh");

        let removed = purge_expired(&pool).await.expect("purge");
        assert_eq!(removed, 1);
        assert!(get_fresh(&pool, "overview", "fresh").await.expect("get").is_some());
    }
}
