use async_trait::async_trait;
use chrono::Utc;
use leadbot_core::store::{SnapshotStore, StoreError};
use sqlx::Row;
use tracing::debug;

use crate::DbPool;

/// Snapshot backend storing one row per key in the `snapshot` table.
#[derive(Clone, Debug)]
pub struct SqliteSnapshotStore {
    pool: DbPool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Keys currently stored, in key order.
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT key FROM snapshot ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(rows.into_iter().map(|row| row.get::<String, _>("key")).collect())
    }
}

fn backend_error(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT body FROM snapshot WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        Ok(row.map(|row| row.get::<String, _>("body")))
    }

    async fn write(&self, key: &str, contents: String) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO snapshot (key, body, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&contents)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        debug!(event_name = "store.snapshot.written", key, bytes = contents.len(), "snapshot row upserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leadbot_core::domain::lead::ResponsibleId;
    use leadbot_core::routing::RoundRobin;
    use leadbot_core::store::{load_snapshot, save_snapshot};
    use serde::{Deserialize, Serialize};

    use super::SqliteSnapshotStore;
    use crate::{connect_with_settings, migrations::run_pending};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        i: usize,
    }

    async fn store() -> SqliteSnapshotStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        SqliteSnapshotStore::new(pool)
    }

    #[tokio::test]
    async fn upsert_replaces_previous_snapshot() {
        let store = store().await;

        save_snapshot(&store, "round_robin", &Cursor { i: 1 }).await.expect("first save");
        save_snapshot(&store, "round_robin", &Cursor { i: 2 }).await.expect("second save");

        let loaded: Cursor = load_snapshot(&store, "round_robin", Cursor::default()).await;
        assert_eq!(loaded, Cursor { i: 2 });
        assert_eq!(store.keys().await.expect("keys"), vec!["round_robin".to_string()]);
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = store().await;

        let loaded: Cursor = load_snapshot(&store, "dedup", Cursor { i: 4 }).await;
        assert_eq!(loaded, Cursor { i: 4 });
    }

    #[tokio::test]
    async fn round_robin_cursor_persists_through_sqlite() {
        let store = Arc::new(store().await);
        let pool = vec![ResponsibleId(11), ResponsibleId(22)];

        let first = RoundRobin::load(pool.clone(), store.clone()).await;
        first.next().await.expect("next");

        let reloaded = RoundRobin::load(pool, store).await;
        assert_eq!(reloaded.next().await.expect("next"), Some(ResponsibleId(22)));
    }
}
