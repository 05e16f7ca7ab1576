//! Column encodings shared by the SQLite stores.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use lantern_core::{ScanId, SpaceKey};

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn encode_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn decode_count(column: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("negative value {value} in column {column}")))
}

pub(crate) fn decode_scan_id(raw: String) -> Result<ScanId> {
    ScanId::new(raw).map_err(|e| DatabaseError::Decode(e.to_string()))
}

/// Stored space keys include the reserved scan-level key.
pub(crate) fn decode_space_key(raw: String) -> Result<SpaceKey> {
    if raw == SpaceKey::scan_level().as_str() {
        return Ok(SpaceKey::scan_level());
    }
    SpaceKey::new(raw).map_err(|e| DatabaseError::Decode(e.to_string()))
}
