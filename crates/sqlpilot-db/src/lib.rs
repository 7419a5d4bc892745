//! Query execution, result streaming and file lifecycle for a single uploaded
//! SQLite database.
//!
//! [`DatabaseFileStore`] owns which file is active. [`QueryExecutor`] and
//! [`ResultStreamer`] read the active path from the shared [`ActiveDatabase`]
//! and open a fresh connection per operation.

mod encode;
mod error;
mod query;
mod schema;
mod sqlite;
mod state;
mod store;
mod stream;

pub use error::DbError;
pub use query::{QueryExecutor, batch_changes_schema, changes_schema, is_select, split_statements};
pub use schema::{read_schema, read_schema_blocking};
pub use sqlite::preview_sql;
pub use state::{ActiveDatabase, ActiveFile};
pub use store::{DatabaseFileStore, sanitize_upload_name, snapshot_path_for};
pub use stream::{
    DEFAULT_PAGE_SIZE, ResultStreamer, StreamOptions, StreamSummary, normalize_single_statement,
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::{ActiveDatabase, DatabaseFileStore};

    /// A temp upload dir with one seeded database installed as active.
    pub(crate) struct LoadedDatabase {
        _dir: tempfile::TempDir,
        store: DatabaseFileStore,
    }

    impl LoadedDatabase {
        pub(crate) async fn new(sql: &str) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("fixture.db");
            let conn = rusqlite::Connection::open(&path).expect("create fixture db");
            conn.execute_batch(sql).expect("seed fixture db");
            drop(conn);

            let store = DatabaseFileStore::new(dir.path(), ActiveDatabase::new());
            store.install(&path).await.expect("install fixture db");
            Self { _dir: dir, store }
        }

        pub(crate) fn store(&self) -> &DatabaseFileStore {
            &self.store
        }

        pub(crate) fn active(&self) -> &Arc<ActiveDatabase> {
            self.store.active()
        }
    }
}
