use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::StoreError;

/// Canonical column encoding for timestamps: microsecond precision, `Z`
/// suffix. Every timestamp written or compared in SQL goes through here.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A timestamp as it reads back from a column. Values returned from an
/// insert go through here so they match later reads.
pub fn stored_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Parse a timestamp column, returning CorruptRow on failure.
pub fn parse_ts(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

/// Parse an optional JSON text column, returning CorruptRow on parse failure.
pub fn parse_json_opt<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid JSON: {e}"),
        })
    })
    .transpose()
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}
