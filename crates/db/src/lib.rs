pub mod connection;
pub mod migrations;
pub mod snapshot;

pub use connection::{connect_with_settings, DbPool};
pub use snapshot::SqliteSnapshotStore;
