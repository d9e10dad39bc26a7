//! Tests for the `SQLite` database export.
//!
//! The export is written to a scratch file, so these run without any
//! external services: each test writes the returned bytes back to disk and
//! reopens them with `sqlx` to check the contents.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

use chrono::{TimeZone, Utc};
use gateway_db::export_database;
use gateway_types::{Record, SensorValue, Server, ServerId};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, Row, SqliteConnection};
use uuid::Uuid;

fn record(name: &str, value: SensorValue) -> Record {
    Record {
        timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        server_id: ServerId::from("b213ecea"),
        object_name: String::from("SharedMemory"),
        variable_name: name.to_owned(),
        value,
    }
}

fn server() -> Server {
    Server {
        id: ServerId::from("b213ecea"),
        url: String::from("http://localhost:8080"),
        name: String::from("Plant"),
        connected: true,
        last_error: None,
    }
}

async fn reopen(bytes: &[u8]) -> (SqliteConnection, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("gateway-export-test-{}.sqlite", Uuid::new_v4()));
    tokio::fs::write(&path, bytes).await.unwrap();
    let options = SqliteConnectOptions::new().filename(&path).read_only(true);
    let conn = SqliteConnection::connect_with(&options)
        .await
        .expect("exported bytes should open as SQLite");
    (conn, path)
}

#[tokio::test]
async fn export_reopens_with_same_row_count() {
    let records: Vec<Record> = (0..400)
        .map(|i| record(&format!("AI{i}"), SensorValue::Int(i)))
        .collect();
    let bytes = export_database(&records, &[server()]).await.unwrap();
    assert!(bytes.starts_with(b"SQLite format 3\0"));

    let (mut conn, path) = reopen(&bytes).await;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(count, 400);

    let servers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM servers")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(servers, 1);

    conn.close().await.unwrap();
    tokio::fs::remove_file(path).await.unwrap();
}

#[tokio::test]
async fn rows_keep_columns_and_numeric_values() {
    let records = vec![
        record("AI1", SensorValue::Float(2.5)),
        record("State", SensorValue::Text(String::from("RUN"))),
    ];
    let bytes = export_database(&records, &[]).await.unwrap();

    let (mut conn, path) = reopen(&bytes).await;
    let rows = sqlx::query(
        "SELECT timestamp, server_id, variable_name, value, value_numeric FROM records ORDER BY id",
    )
    .fetch_all(&mut conn)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);

    let first = &rows[0];
    assert_eq!(first.get::<String, _>("timestamp"), "2026-03-01T12:00:00Z");
    assert_eq!(first.get::<String, _>("server_id"), "b213ecea");
    assert_eq!(first.get::<String, _>("value"), "2.5");
    assert_eq!(first.get::<Option<f64>, _>("value_numeric"), Some(2.5));

    let second = &rows[1];
    assert_eq!(second.get::<String, _>("variable_name"), "State");
    assert_eq!(second.get::<Option<f64>, _>("value_numeric"), None);

    conn.close().await.unwrap();
    tokio::fs::remove_file(path).await.unwrap();
}

#[tokio::test]
async fn empty_export_is_a_valid_database() {
    let bytes = export_database(&[], &[]).await.unwrap();
    assert!(!bytes.is_empty());

    let (mut conn, path) = reopen(&bytes).await;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(count, 0);

    conn.close().await.unwrap();
    tokio::fs::remove_file(path).await.unwrap();
}
