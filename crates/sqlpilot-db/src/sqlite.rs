//! Connection helpers shared by the executor, streamer and file store.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::DbError;

const BUSY_TIMEOUT_MS: u64 = 1_000;

/// An open connection to a database file, closed when dropped.
///
/// Every public operation acquires exactly one of these and lets it fall out
/// of scope on every exit path, including errors and panics.
pub(crate) struct SqliteHandle {
    conn: Connection,
    path: PathBuf,
}

impl SqliteHandle {
    /// Opens an existing database file for reading and writing. Never creates.
    pub(crate) fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|error| DbError::Execution(format!("open sqlite {}: {error}", path.display())))?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        tracing::trace!(path = %path.display(), "sqlite handle opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }
}

impl Deref for SqliteHandle {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for SqliteHandle {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), "sqlite handle closed");
    }
}

/// Runs blocking SQLite work off the async scheduler.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DbError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| DbError::Execution(format!("sqlite worker join error: {error}")))?
}

/// Truncated SQL for log lines.
pub fn preview_sql(sql: &str) -> String {
    const LIMIT: usize = 160;
    if sql.len() <= LIMIT {
        return sql.to_string();
    }
    let mut end = LIMIT;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = sql[..end].to_string();
    out.push_str("...");
    out
}
