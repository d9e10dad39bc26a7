//! Builds a standalone `SQLite` database from recorded data.
//!
//! The database is written to a scratch file in the system temp directory,
//! read back into memory, and the file removed. The result is a complete
//! `SQLite` file that opens in any client.
//!
//! Schema:
//!
//! ```text
//! records(id INTEGER PRIMARY KEY, timestamp TEXT, server_id TEXT,
//!         object_name TEXT, variable_name TEXT, value TEXT,
//!         value_numeric REAL)
//! servers(server_id TEXT PRIMARY KEY, name TEXT, url TEXT)
//! ```

use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use gateway_types::{Record, Server};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::error::DbError;

/// MIME type of the exported file.
pub const CONTENT_TYPE: &str = "application/x-sqlite3";

/// Rows per multi-row INSERT. Six binds per row keeps each statement under
/// the 999-variable limit of older `SQLite` builds.
const BATCH_SIZE: usize = 150;

const SCHEMA: [&str; 4] = [
    r"CREATE TABLE records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        server_id TEXT NOT NULL,
        object_name TEXT NOT NULL,
        variable_name TEXT NOT NULL,
        value TEXT NOT NULL,
        value_numeric REAL
    )",
    "CREATE INDEX idx_records_timestamp ON records (timestamp)",
    "CREATE INDEX idx_records_object ON records (server_id, object_name)",
    r"CREATE TABLE servers (
        server_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT NOT NULL
    )",
];

/// Build an `SQLite` database holding `records` and `servers` and return
/// the file's bytes.
pub async fn export_database(records: &[Record], servers: &[Server]) -> Result<Vec<u8>, DbError> {
    let path = scratch_path();
    let written = write_database(&path, records, servers).await;
    let bytes = match written {
        Ok(()) => tokio::fs::read(&path).await.map_err(DbError::from),
        Err(e) => Err(e),
    };
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove export scratch file");
    }
    let bytes = bytes?;
    tracing::info!(
        records = records.len(),
        servers = servers.len(),
        bytes = bytes.len(),
        "Database export built"
    );
    Ok(bytes)
}

fn scratch_path() -> PathBuf {
    std::env::temp_dir().join(format!("gateway-export-{}.sqlite", Uuid::new_v4()))
}

async fn write_database(path: &Path, records: &[Record], servers: &[Server]) -> Result<(), DbError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let mut conn = SqliteConnection::connect_with(&options).await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut conn).await?;
    }

    let mut tx = conn.begin().await?;

    for chunk in records.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO records (timestamp, server_id, object_name, variable_name, value, value_numeric) ",
        );
        builder.push_values(chunk, |mut row, record| {
            row.push_bind(
                record
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )
            .push_bind(record.server_id.as_str())
            .push_bind(record.object_name.as_str())
            .push_bind(record.variable_name.as_str())
            .push_bind(record.value.to_string())
            .push_bind(record.value.as_f64());
        });
        builder.build().execute(&mut *tx).await?;
    }

    for chunk in servers.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("INSERT OR REPLACE INTO servers (server_id, name, url) ");
        builder.push_values(chunk, |mut row, server| {
            row.push_bind(server.id.as_str())
                .push_bind(server.name.as_str())
                .push_bind(server.url.as_str());
        });
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    conn.close().await?;
    Ok(())
}
