//! Column decoding helpers that report failures as [`StoreError::CorruptRow`].

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::errors::StoreError;

/// Get a required column value from a row, returning `CorruptRow` on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Render a timestamp for storage.
///
/// Fixed-width RFC 3339 in UTC, so string order is chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Naive ISO-8601 values from older stores are read as UTC.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp: {raw}"),
        })
}

/// Parse a nullable timestamp column.
pub fn parse_timestamp_opt(
    raw: Option<&str>,
    table: &'static str,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|r| parse_timestamp(r, table, column)).transpose()
}

/// Rewrite a stored timestamp into the canonical format, leaving unparsable input as-is.
pub fn normalize_timestamp(raw: &str) -> String {
    parse_timestamp(raw, "", "").map_or_else(|_| raw.to_string(), format_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_fixed_width_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(ts), "2025-03-04T05:06:07.000000Z");
    }

    #[test]
    fn formatted_order_is_chronological() {
        let earlier = Utc.with_ymd_and_hms(2025, 1, 9, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        assert!(format_timestamp(earlier) < format_timestamp(later));
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2025-03-04T07:06:07+02:00", "t", "c").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap());
    }

    #[test]
    fn parses_naive_legacy_values_as_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 12, 1, 8, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-12-01T08:30:00", "t", "c").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-12-01 08:30:00.000", "t", "c").unwrap(), expected);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_timestamp("yesterday", "sessions", "last_heartbeat").unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRow { table: "sessions", column: "last_heartbeat", .. }
        ));
    }

    #[test]
    fn optional_timestamps() {
        assert_eq!(parse_timestamp_opt(None, "t", "c").unwrap(), None);
        assert!(parse_timestamp_opt(Some("2025-01-01T00:00:00Z"), "t", "c").unwrap().is_some());
    }

    #[test]
    fn normalize_rewrites_legacy_and_keeps_garbage() {
        assert_eq!(
            normalize_timestamp("2024-12-01T08:30:00.5"),
            "2024-12-01T08:30:00.500000Z"
        );
        assert_eq!(normalize_timestamp("???"), "???");
    }
}
