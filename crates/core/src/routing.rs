//! Round-robin assignment of leads to CRM users.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::lead::ResponsibleId;
use crate::store::{load_snapshot, save_snapshot, SnapshotStore, StoreError, ROUND_ROBIN_KEY};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    i: usize,
}

pub struct RoundRobin {
    pool: Vec<ResponsibleId>,
    store: Arc<dyn SnapshotStore>,
    cursor: Mutex<Cursor>,
}

impl RoundRobin {
    pub async fn load(pool: Vec<ResponsibleId>, store: Arc<dyn SnapshotStore>) -> Self {
        let cursor = load_snapshot(store.as_ref(), ROUND_ROBIN_KEY, Cursor::default()).await;
        Self { pool, store, cursor: Mutex::new(cursor) }
    }

    pub fn pool(&self) -> &[ResponsibleId] {
        &self.pool
    }

    /// Next responsible in rotation, or `None` when the pool is empty.
    ///
    /// The cursor only advances when a responsible is actually handed out.
    pub async fn next(&self) -> Result<Option<ResponsibleId>, StoreError> {
        if self.pool.is_empty() {
            return Ok(None);
        }

        let mut cursor = self.cursor.lock().await;
        let responsible = self.pool[cursor.i % self.pool.len()];
        cursor.i = (cursor.i + 1) % self.pool.len();
        save_snapshot(self.store.as_ref(), ROUND_ROBIN_KEY, &*cursor).await?;

        debug!(event_name = "routing.responsible.assigned", responsible_id = %responsible, "lead responsible assigned");
        Ok(Some(responsible))
    }
}
