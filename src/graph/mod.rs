//! Org-scoped node and edge storage.
//!
//! Every accessor takes the [`types::OrgId`] as its first argument after the
//! connection; there is no way to fetch a node or edge without naming the org.

pub mod artifacts;
pub mod edges;
pub mod nodes;
pub mod stats;
pub mod store;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Inverse of [`embedding_to_bytes`]. Trailing bytes that do not form a full
/// f32 are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so that text order is
/// time order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// Parse an optional JSON text column.
pub(crate) fn parse_json_column(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.0, 3.5];
        let bytes = embedding_to_bytes(&v).to_vec();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), v);
    }

    #[test]
    fn timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap();
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts(&format_ts(&a)).unwrap(), a);
    }
}
