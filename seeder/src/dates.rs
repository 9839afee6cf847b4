//! Detection of ISO-8601 millisecond UTC strings and their conversion into
//! store timestamps.
//!
//! Only the exact `YYYY-MM-DDTHH:MM:SS.mmmZ` shape is recognized. Strings with
//! offsets, without milliseconds, or date-only stay plain strings.

use chrono::{DateTime, Datelike, NaiveDateTime, SecondsFormat, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::{FieldValue, Fields, Record, ID_FIELD};

static ISO_MILLIS_UTC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{3}Z$").unwrap()
});

pub fn is_iso_millis(s: &str) -> bool {
    ISO_MILLIS_UTC.is_match(s)
}

/// Parse a string of the exact recognized shape into an instant.
///
/// Returns `None` when the shape does not match or the fields do not form an
/// instant the store can hold: month 13, second 60 (chrono keeps leap
/// seconds, Firestore does not) or year 0000.
pub fn parse_iso_millis(s: &str) -> Option<DateTime<Utc>> {
    if !is_iso_millis(s) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3fZ").ok()?;
    if naive.nanosecond() >= 1_000_000_000 || !(1..=9999).contains(&naive.year()) {
        return None;
    }
    Some(naive.and_utc())
}

/// Render an instant back into the recognized shape.
pub fn format_iso_millis(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl FieldValue {
    /// Turn a matching string into a timestamp; anything else is returned as-is.
    pub fn converted(self) -> FieldValue {
        match self {
            FieldValue::Json(Value::String(s)) => match parse_iso_millis(&s) {
                Some(ts) => FieldValue::Timestamp(ts),
                None => FieldValue::Json(Value::String(s)),
            },
            other => other,
        }
    }
}

/// Shallow copy of `record` with date strings replaced by timestamps.
///
/// Nested objects and arrays are not descended into. The `id` field is the
/// document key and always stays a string.
pub fn convert_dates(record: &Record) -> Fields {
    convert_fields(
        record
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::Json(v.clone())))
            .collect(),
    )
}

/// Same rewrite as [`convert_dates`] over already-typed fields. Applying it
/// to its own output changes nothing.
pub fn convert_fields(fields: Fields) -> Fields {
    fields
        .into_iter()
        .map(|(key, value)| {
            if key == ID_FIELD {
                (key, value)
            } else {
                (key, value.converted())
            }
        })
        .collect()
}
