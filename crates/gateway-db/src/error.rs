//! Error types for the database export.

/// Errors that can occur while building an export database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Reading or removing the scratch file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
