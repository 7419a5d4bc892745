use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlpilot_types::Schema;

use crate::error::DbError;
use crate::store::snapshot_path_for;

/// The one database the process currently operates on.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveFile {
    pub working_path: PathBuf,
    pub schema: Option<Arc<Schema>>,
}

impl ActiveFile {
    /// Path of the read-only original copy, derived from the working path.
    pub fn snapshot_path(&self) -> PathBuf {
        snapshot_path_for(&self.working_path)
    }
}

#[derive(Debug, Default)]
struct ActiveState {
    path: Option<PathBuf>,
    schema: Option<Arc<Schema>>,
}

/// Shared handle to the active database path and its cached schema.
///
/// Components receive this by `Arc` at construction. Only
/// [`DatabaseFileStore`](crate::DatabaseFileStore) mutates it; everything else
/// reads. Locks are never held across an await point.
#[derive(Debug, Default)]
pub struct ActiveDatabase {
    inner: RwLock<ActiveState>,
}

impl ActiveDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.read().path.clone()
    }

    pub fn require_path(&self) -> Result<PathBuf, DbError> {
        self.path().ok_or(DbError::NoDatabaseLoaded)
    }

    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.inner.read().schema.clone()
    }

    pub fn current(&self) -> Option<ActiveFile> {
        let guard = self.inner.read();
        guard.path.as_ref().map(|path| ActiveFile {
            working_path: path.clone(),
            schema: guard.schema.clone(),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().path.is_some()
    }

    pub(crate) fn replace(&self, path: PathBuf, schema: Arc<Schema>) -> Option<ActiveFile> {
        let mut guard = self.inner.write();
        let previous = guard.path.take().map(|working_path| ActiveFile {
            working_path,
            schema: guard.schema.take(),
        });
        guard.path = Some(path);
        guard.schema = Some(schema);
        previous
    }

    /// Updates the cached schema if `path` is still the active file.
    pub(crate) fn set_schema_for(&self, path: &Path, schema: Arc<Schema>) -> bool {
        let mut guard = self.inner.write();
        if guard.path.as_deref() != Some(path) {
            return false;
        }
        guard.schema = Some(schema);
        true
    }

    pub(crate) fn take(&self) -> Option<ActiveFile> {
        let mut guard = self.inner.write();
        let schema = guard.schema.take();
        guard.path.take().map(|working_path| ActiveFile {
            working_path,
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let active = ActiveDatabase::new();
        assert!(active.path().is_none());
        assert!(active.schema().is_none());
        assert_eq!(active.require_path(), Err(DbError::NoDatabaseLoaded));
    }

    #[test]
    fn replace_returns_previous_file() {
        let active = ActiveDatabase::new();
        assert!(active.replace(PathBuf::from("a.db"), Arc::default()).is_none());
        let previous = active
            .replace(PathBuf::from("b.db"), Arc::default())
            .expect("previous file");
        assert_eq!(previous.working_path, PathBuf::from("a.db"));
        assert_eq!(previous.snapshot_path(), PathBuf::from("a_original.db"));
        assert_eq!(active.path(), Some(PathBuf::from("b.db")));
    }

    #[test]
    fn stale_schema_update_is_ignored() {
        let active = ActiveDatabase::new();
        active.replace(PathBuf::from("b.db"), Arc::default());
        assert!(!active.set_schema_for(Path::new("a.db"), Arc::default()));
        assert!(active.set_schema_for(Path::new("b.db"), Arc::default()));
    }

    #[test]
    fn take_clears_path_and_schema() {
        let active = ActiveDatabase::new();
        active.replace(PathBuf::from("a.db"), Arc::default());
        assert!(active.take().is_some());
        assert!(!active.is_loaded());
        assert!(active.schema().is_none());
        assert!(active.take().is_none());
    }
}
