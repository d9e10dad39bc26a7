//! Export encoders for recorded data.
//!
//! JSON and CSV live here; the `SQLite` database export lives in
//! `gateway-db` because it needs a database driver.

use chrono::{DateTime, SecondsFormat, Utc};
use gateway_types::Record;
use serde::{Deserialize, Serialize};

/// CSV header row, in column order.
pub const CSV_HEADER: &str = "timestamp,server_id,object_name,variable_name,value";

/// Optional restrictions applied to an export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExportFilter {
    /// Only records at or after this instant.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Only records at or before this instant.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    /// Only records from this server.
    #[serde(default)]
    pub server: Option<String>,
    /// Only records for this object.
    #[serde(default)]
    pub object: Option<String>,
}

impl ExportFilter {
    /// Whether `record` passes every restriction.
    pub fn matches(&self, record: &Record) -> bool {
        if self.from.is_some_and(|from| record.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| record.timestamp > to) {
            return false;
        }
        if self
            .server
            .as_deref()
            .is_some_and(|server| record.server_id.as_str() != server)
        {
            return false;
        }
        self.object
            .as_deref()
            .is_none_or(|object| record.object_name == object)
    }
}

/// The JSON export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonExport {
    /// When the export was produced.
    pub exported_at: DateTime<Utc>,
    /// Number of records.
    pub count: usize,
    /// The records, oldest first.
    pub records: Vec<Record>,
}

impl JsonExport {
    /// Wrap `records` in an export document stamped now.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            exported_at: Utc::now(),
            count: records.len(),
            records,
        }
    }
}

/// Format a timestamp the way every export does: RFC 3339, UTC,
/// nanosecond precision.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Encode records as RFC 4180 CSV with a header row.
pub fn encode_csv(records: &[Record]) -> String {
    let mut out = String::with_capacity(records.len().saturating_mul(64).saturating_add(64));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");
    for record in records {
        push_field(&mut out, &format_timestamp(&record.timestamp));
        out.push(',');
        push_field(&mut out, record.server_id.as_str());
        out.push(',');
        push_field(&mut out, &record.object_name);
        out.push(',');
        push_field(&mut out, &record.variable_name);
        out.push(',');
        push_field(&mut out, &record.value.to_string());
        out.push_str("\r\n");
    }
    out
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) || field.starts_with(' ') {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Approximate heap footprint of one record, for the status report.
pub fn record_size(record: &Record) -> u64 {
    const FIXED: usize = 96;
    let text = match &record.value {
        gateway_types::SensorValue::Text(s) => s.len(),
        _ => 0,
    };
    let total = FIXED
        .saturating_add(record.server_id.as_str().len())
        .saturating_add(record.object_name.len())
        .saturating_add(record.variable_name.len())
        .saturating_add(text);
    u64::try_from(total).unwrap_or(u64::MAX)
}
