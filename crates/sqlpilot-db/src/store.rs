use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlpilot_types::Schema;
use tracing::{debug, info, warn};

use crate::error::DbError;
use crate::schema::read_schema;
use crate::sqlite::{SqliteHandle, run_blocking};
use crate::state::{ActiveDatabase, ActiveFile};

const SNAPSHOT_SUFFIX: &str = "_original";
const STAGING_PREFIX: &str = ".incoming-";
const FALLBACK_UPLOAD_NAME: &str = "database.db";

static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot path paired with a working path: `foo.db` becomes `foo_original.db`.
pub fn snapshot_path_for(working_path: &Path) -> PathBuf {
    let stem = working_path
        .file_stem()
        .map(OsString::from)
        .unwrap_or_default();
    let mut name = stem;
    name.push(SNAPSHOT_SUFFIX);
    if let Some(extension) = working_path.extension() {
        name.push(".");
        name.push(extension);
    }
    working_path.with_file_name(name)
}

/// Reduces a client-supplied file name to a bare, non-hidden file name.
pub fn sanitize_upload_name(raw: &str) -> String {
    let name = Path::new(raw.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.trim_start_matches('.').trim())
        .unwrap_or_default();
    if name.is_empty() {
        FALLBACK_UPLOAD_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Owns the lifecycle of the uploaded database file and its original copy.
///
/// This is the only writer of [`ActiveDatabase`].
#[derive(Debug, Clone)]
pub struct DatabaseFileStore {
    upload_dir: PathBuf,
    active: Arc<ActiveDatabase>,
}

impl DatabaseFileStore {
    pub fn new(upload_dir: impl Into<PathBuf>, active: Arc<ActiveDatabase>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            active,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn active(&self) -> &Arc<ActiveDatabase> {
        &self.active
    }

    pub fn active_path(&self) -> Option<PathBuf> {
        self.active.path()
    }

    pub async fn ensure_upload_dir(&self) -> Result<(), DbError> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|error| {
                DbError::storage(
                    &format!("create upload dir {}", self.upload_dir.display()),
                    error,
                )
            })
    }

    /// A fresh path inside the upload dir for receiving an upload before it
    /// has been validated.
    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        let id = NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed);
        self.upload_dir.join(format!(
            "{STAGING_PREFIX}{}-{id}-{}",
            std::process::id(),
            sanitize_upload_name(file_name)
        ))
    }

    /// Checks that `candidate` opens as a SQLite database.
    ///
    /// Opening alone is lazy in SQLite, so the catalog is read to force the
    /// header check. The connection is closed before returning.
    pub async fn validate(&self, candidate: &Path) -> Result<(), DbError> {
        let path = candidate.to_path_buf();
        run_blocking(move || {
            let conn = SqliteHandle::open(&path)
                .map_err(|error| DbError::InvalidDatabaseFile(error.to_string()))?;
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|error| DbError::InvalidDatabaseFile(error.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Makes `candidate` the active database. Call only after [`validate`](Self::validate).
    ///
    /// The original copy is taken and the schema read before the switch, so a
    /// failure leaves the previous database active. The previous working and
    /// snapshot files are deleted afterwards on a best-effort basis.
    pub async fn install(&self, candidate: &Path) -> Result<ActiveFile, DbError> {
        self.install_as(candidate, candidate).await
    }

    /// Installs `source` under the name `working`.
    ///
    /// Nothing is written under the final names until the copy and the schema
    /// read have succeeded. On failure the staged files are removed.
    async fn install_as(&self, source: &Path, working: &Path) -> Result<ActiveFile, DbError> {
        let working = working.to_path_buf();
        let snapshot = snapshot_path_for(&working);
        let schema = match self.stage_install(source, &working, &snapshot).await {
            Ok(schema) => schema,
            Err(error) => {
                remove_best_effort(&snapshot_path_for(source), "snapshot of rejected upload").await;
                if source != working.as_path() {
                    remove_best_effort(source, "staged upload").await;
                }
                return Err(error);
            }
        };

        let previous = self.active.replace(working.clone(), Arc::clone(&schema));
        if let Some(previous) = previous {
            for (old, what) in [
                (previous.snapshot_path(), "previous snapshot"),
                (previous.working_path, "previous working file"),
            ] {
                if old != working && old != snapshot {
                    remove_best_effort(&old, what).await;
                }
            }
        }

        info!(
            working = %working.display(),
            snapshot = %snapshot.display(),
            tables = schema.tables.len(),
            "database installed"
        );
        Ok(ActiveFile {
            working_path: working,
            schema: Some(schema),
        })
    }

    /// Copies the original, reads the schema, then moves both files to their
    /// final names.
    async fn stage_install(
        &self,
        source: &Path,
        working: &Path,
        snapshot: &Path,
    ) -> Result<Arc<Schema>, DbError> {
        let staged_snapshot = snapshot_path_for(source);
        tokio::fs::copy(source, &staged_snapshot)
            .await
            .map_err(|error| {
                DbError::storage(
                    &format!(
                        "copy {} to {}",
                        source.display(),
                        staged_snapshot.display()
                    ),
                    error,
                )
            })?;
        let schema = Arc::new(read_schema(source.to_path_buf()).await?);
        if source == working {
            return Ok(schema);
        }

        tokio::fs::rename(&staged_snapshot, snapshot)
            .await
            .map_err(|error| {
                DbError::storage(
                    &format!("move {} to {}", staged_snapshot.display(), snapshot.display()),
                    error,
                )
            })?;
        if let Err(error) = tokio::fs::rename(source, working).await {
            if self.active.path().as_deref() != Some(working) {
                remove_best_effort(snapshot, "snapshot of rejected upload").await;
            }
            return Err(DbError::storage(
                &format!("move {} to {}", source.display(), working.display()),
                error,
            ));
        }
        Ok(schema)
    }

    /// Validates a staged upload and installs it under its sanitized name.
    ///
    /// A rejected or failed upload is deleted and leaves the active database
    /// untouched.
    pub async fn accept_upload(&self, staged: &Path, file_name: &str) -> Result<ActiveFile, DbError> {
        if let Err(error) = self.validate(staged).await {
            remove_best_effort(staged, "rejected upload").await;
            return Err(error);
        }
        let target = self.upload_dir.join(sanitize_upload_name(file_name));
        self.install_as(staged, &target).await
    }

    /// Restores the working file from its original copy and re-reads the schema.
    pub async fn reset(&self) -> Result<(), DbError> {
        let active = self.active.current().ok_or(DbError::NoSnapshotAvailable)?;
        let snapshot = active.snapshot_path();
        match tokio::fs::try_exists(&snapshot).await {
            Ok(true) => {}
            Ok(false) => return Err(DbError::NoSnapshotAvailable),
            Err(error) => {
                return Err(DbError::storage(
                    &format!("stat {}", snapshot.display()),
                    error,
                ));
            }
        }

        // The working path only ever names a complete file.
        let mut restoring = active.working_path.clone().into_os_string();
        restoring.push(".restoring");
        let restoring = PathBuf::from(restoring);
        tokio::fs::copy(&snapshot, &restoring).await.map_err(|error| {
            DbError::storage(&format!("copy {}", snapshot.display()), error)
        })?;
        if let Err(error) = tokio::fs::rename(&restoring, &active.working_path).await {
            remove_best_effort(&restoring, "partial restore").await;
            return Err(DbError::storage(
                &format!("replace {}", active.working_path.display()),
                error,
            ));
        }

        let schema = Arc::new(read_schema(active.working_path.clone()).await?);
        self.active.set_schema_for(&active.working_path, schema);
        info!(working = %active.working_path.display(), "database reset to original");
        Ok(())
    }

    /// Forgets the active database and deletes its files. Idempotent.
    pub async fn clear(&self) -> Result<(), DbError> {
        let Some(previous) = self.active.take() else {
            debug!("clear requested with no active database");
            return Ok(());
        };
        remove_best_effort(&previous.working_path, "working file").await;
        remove_best_effort(&previous.snapshot_path(), "snapshot").await;
        info!(working = %previous.working_path.display(), "database cleared");
        Ok(())
    }

    /// The cached schema, recomputed when the cache is empty.
    pub async fn schema(&self) -> Result<Arc<Schema>, DbError> {
        let active = self.active.current().ok_or(DbError::NoDatabaseLoaded)?;
        match active.schema {
            Some(schema) => Ok(schema),
            None => self.refresh_schema().await,
        }
    }

    /// Re-reads the schema of the active file and caches it.
    pub async fn refresh_schema(&self) -> Result<Arc<Schema>, DbError> {
        let path = self.active.require_path()?;
        let schema = Arc::new(read_schema(path.clone()).await?);
        if !self.active.set_schema_for(&path, Arc::clone(&schema)) {
            debug!(path = %path.display(), "database replaced while reading schema");
        }
        Ok(schema)
    }

    /// Deletes every file in the upload dir and forgets the active database.
    /// Returns how many files were removed.
    pub async fn purge_upload_dir(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return 0,
            Err(error) => {
                warn!(dir = %self.upload_dir.display(), %error, "failed to list upload dir");
                return 0;
            }
        };
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!(dir = %self.upload_dir.display(), %error, "failed to read upload dir entry");
                    break;
                }
            };
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(error) => warn!(path = %entry.path().display(), %error, "failed to delete upload"),
            }
        }
        self.active.take();
        removed
    }
}

async fn remove_best_effort(path: &Path, what: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "deleted {what}"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), %error, "failed to delete {what}"),
    }
}
