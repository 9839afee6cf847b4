use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A raw dataset record, exactly as it appears in the input JSON.
pub type Record = Map<String, Value>;

/// Converted document fields, ordered by name so encoding is deterministic.
pub type Fields = BTreeMap<String, FieldValue>;

/// Field holding the destination document key.
pub const ID_FIELD: &str = "id";

/// The three remote collections, in import order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Projects,
    ImageRecords,
    Analyses,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Projects,
        Collection::ImageRecords,
        Collection::Analyses,
    ];

    /// Name used both as the dataset key and the remote collection id.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Projects => "projects",
            Collection::ImageRecords => "image_records",
            Collection::Analyses => "analyses",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Json(Value),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_timestamp(&self) -> bool {
        matches!(self, FieldValue::Timestamp(_))
    }
}

/// A record ready to be upserted: its key plus converted fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn timestamp_count(&self) -> usize {
        self.fields.values().filter(|v| v.is_timestamp()).count()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record #{index} has no `id` field")]
    MissingId { index: usize },
    #[error("record #{index} has a non-string `id`")]
    NonStringId { index: usize },
    #[error("record #{index} has invalid id {id:?}: {reason}")]
    InvalidId {
        index: usize,
        id: String,
        reason: &'static str,
    },
}

/// Extract and validate the document key of the record at `index`.
///
/// Ids become a single path segment of the document name, so they must be
/// non-empty and free of `/`.
pub fn document_id(record: &Record, index: usize) -> Result<&str, RecordError> {
    let value = record
        .get(ID_FIELD)
        .ok_or(RecordError::MissingId { index })?;
    let id = value
        .as_str()
        .ok_or(RecordError::NonStringId { index })?;

    if id.is_empty() {
        return Err(RecordError::InvalidId {
            index,
            id: id.to_string(),
            reason: "id is empty",
        });
    }
    if id.contains('/') {
        return Err(RecordError::InvalidId {
            index,
            id: id.to_string(),
            reason: "id contains '/'",
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn collection_names_match_remote_collections() {
        let names: Vec<_> = Collection::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["projects", "image_records", "analyses"]);
        assert_eq!(Collection::ImageRecords.to_string(), "image_records");
    }

    #[test]
    fn document_id_accepts_plain_string() {
        let r = record(json!({"id": "p1", "name": "Linha 4"}));
        assert_eq!(document_id(&r, 0).unwrap(), "p1");
    }

    #[test]
    fn document_id_rejects_missing_and_non_string() {
        let missing = record(json!({"name": "x"}));
        assert_eq!(
            document_id(&missing, 3).unwrap_err(),
            RecordError::MissingId { index: 3 }
        );

        let numeric = record(json!({"id": 7}));
        assert_eq!(
            document_id(&numeric, 0).unwrap_err(),
            RecordError::NonStringId { index: 0 }
        );
    }

    #[test]
    fn document_id_rejects_empty_and_slash() {
        let empty = record(json!({"id": ""}));
        assert!(matches!(
            document_id(&empty, 0),
            Err(RecordError::InvalidId { .. })
        ));

        let nested = record(json!({"id": "a/b"}));
        let err = document_id(&nested, 1).unwrap_err();
        assert!(err.to_string().contains("contains '/'"));
    }
}
