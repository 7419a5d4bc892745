use std::error::Error;
use std::fmt;

/// Failure kinds of the database subsystem.
///
/// Driver and filesystem messages are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// The candidate file could not be opened as a SQLite database.
    InvalidDatabaseFile(String),
    /// No database has been uploaded (or it was cleared).
    NoDatabaseLoaded,
    /// Reset was requested but there is no original copy to restore from.
    NoSnapshotAvailable,
    /// SQLite rejected or failed a statement.
    Execution(String),
    /// Copying, renaming or reading the working/snapshot files failed.
    Storage(String),
    /// The output sink stopped accepting bytes.
    Sink(String),
}

impl DbError {
    pub fn storage(context: &str, error: impl fmt::Display) -> Self {
        Self::Storage(format!("{context}: {error}"))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDatabaseFile(detail) => write!(
                f,
                "Invalid file type. Please upload a valid SQLite .db file. ({detail})"
            ),
            Self::NoDatabaseLoaded => {
                write!(f, "No database loaded. Upload a SQLite database first.")
            }
            Self::NoSnapshotAvailable => {
                write!(f, "No original copy of the database is available to reset from")
            }
            Self::Execution(message) => f.write_str(message),
            Self::Storage(message) => write!(f, "database file error: {message}"),
            Self::Sink(message) => write!(f, "output stream closed: {message}"),
        }
    }
}

impl Error for DbError {}

impl From<rusqlite::Error> for DbError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Execution(error.to_string())
    }
}
