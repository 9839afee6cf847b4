//! Loading of the demo dataset file.

use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{Collection, Record};

/// Default dataset location, relative to the working directory.
pub const DEFAULT_DATA_REL: &str = "bin/demo_data_complete.json";

#[derive(Debug, Clone, Default)]
pub struct DemoDataset {
    pub projects: Vec<Record>,
    pub image_records: Vec<Record>,
    pub analyses: Vec<Record>,
    pub metadata: Option<DatasetMetadata>,
}

/// Optional `metadata` block written by the bundler. Every field is optional
/// and wrongly-typed entries are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub generated_at: Option<String>,
    pub version: Option<String>,
    pub total_projects: Option<usize>,
    pub total_images: Option<usize>,
    pub total_analyses: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMismatch {
    pub collection: Collection,
    pub declared: usize,
    pub actual: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read dataset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("dataset {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dataset {path:?} must be a JSON object at the top level")]
    RootNotObject { path: PathBuf },
    #[error("dataset {path:?} has no `{collection}` array")]
    MissingCollection {
        path: PathBuf,
        collection: Collection,
    },
    #[error("dataset {path:?}: `{collection}` entry #{index} is not an object")]
    NotAnObject {
        path: PathBuf,
        collection: Collection,
        index: usize,
    },
}

impl DemoDataset {
    pub fn records(&self, collection: Collection) -> &[Record] {
        match collection {
            Collection::Projects => &self.projects,
            Collection::ImageRecords => &self.image_records,
            Collection::Analyses => &self.analyses,
        }
    }

    pub fn total_records(&self) -> usize {
        Collection::ALL.iter().map(|c| self.records(*c).len()).sum()
    }

    /// Declared totals from `metadata` that disagree with the actual arrays.
    pub fn metadata_mismatches(&self) -> Vec<MetadataMismatch> {
        let Some(meta) = &self.metadata else {
            return Vec::new();
        };
        [
            (Collection::Projects, meta.total_projects),
            (Collection::ImageRecords, meta.total_images),
            (Collection::Analyses, meta.total_analyses),
        ]
        .into_iter()
        .filter_map(|(collection, declared)| {
            let declared = declared?;
            let actual = self.records(collection).len();
            (declared != actual).then_some(MetadataMismatch {
                collection,
                declared,
                actual,
            })
        })
        .collect()
    }
}

impl DatasetMetadata {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        let count = |key: &str| {
            obj.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
        };
        Some(Self {
            generated_at: text("generated_at"),
            version: text("version"),
            total_projects: count("total_projects"),
            total_images: count("total_images"),
            total_analyses: count("total_analyses"),
        })
    }
}

/// Read and parse the dataset at `path`. Unknown top-level keys are ignored.
pub fn load_dataset(path: &Path) -> Result<DemoDataset, LoadError> {
    let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let root: Value = serde_json::from_str(&raw).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Object(mut root) = root else {
        return Err(LoadError::RootNotObject {
            path: path.to_path_buf(),
        });
    };

    let dataset = DemoDataset {
        projects: take_records(&mut root, Collection::Projects, path)?,
        image_records: take_records(&mut root, Collection::ImageRecords, path)?,
        analyses: take_records(&mut root, Collection::Analyses, path)?,
        metadata: root.get("metadata").and_then(DatasetMetadata::from_value),
    };

    info!(
        path = ?path,
        projects = dataset.projects.len(),
        image_records = dataset.image_records.len(),
        analyses = dataset.analyses.len(),
        "loaded dataset"
    );
    for m in dataset.metadata_mismatches() {
        warn!(
            collection = %m.collection,
            declared = m.declared,
            actual = m.actual,
            "dataset metadata total disagrees with record count"
        );
    }

    Ok(dataset)
}

fn take_records(
    root: &mut Map<String, Value>,
    collection: Collection,
    path: &Path,
) -> Result<Vec<Record>, LoadError> {
    let Some(Value::Array(items)) = root.remove(collection.name()) else {
        return Err(LoadError::MissingCollection {
            path: path.to_path_buf(),
            collection,
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(LoadError::NotAnObject {
                path: path.to_path_buf(),
                collection,
                index,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(value: &Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{value}").unwrap();
        file
    }

    #[test]
    fn loads_three_collections_in_order() {
        let file = write_json(&json!({
            "projects": [{"id": "p1"}, {"id": "p2"}],
            "image_records": [{"id": "i1"}],
            "analyses": [],
            "extra": "ignored"
        }));

        let dataset = load_dataset(file.path()).unwrap();
        assert_eq!(dataset.projects.len(), 2);
        assert_eq!(dataset.projects[1]["id"], json!("p2"));
        assert_eq!(dataset.image_records.len(), 1);
        assert!(dataset.analyses.is_empty());
        assert!(dataset.metadata.is_none());
        assert_eq!(dataset.total_records(), 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn invalid_json_is_json_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = load_dataset(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Json { .. }));
    }

    #[test]
    fn missing_array_is_reported_by_name() {
        let file = write_json(&json!({"projects": [], "image_records": []}));
        let err = load_dataset(file.path()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingCollection {
                collection: Collection::Analyses,
                ..
            }
        ));
        assert!(err.to_string().contains("`analyses`"));
    }

    #[test]
    fn rejects_non_object_root_and_entries() {
        let file = write_json(&json!([1, 2]));
        assert!(matches!(
            load_dataset(file.path()).unwrap_err(),
            LoadError::RootNotObject { .. }
        ));

        let file = write_json(&json!({
            "projects": [{"id": "p1"}, "oops"],
            "image_records": [],
            "analyses": []
        }));
        assert!(matches!(
            load_dataset(file.path()).unwrap_err(),
            LoadError::NotAnObject {
                collection: Collection::Projects,
                index: 1,
                ..
            }
        ));
    }

    #[test]
    fn reads_metadata_and_reports_mismatches() {
        let file = write_json(&json!({
            "projects": [{"id": "p1"}],
            "image_records": [{"id": "i1"}, {"id": "i2"}],
            "analyses": [],
            "metadata": {
                "generated_at": "2025-03-01T10:00:00",
                "version": "2.0.5",
                "total_projects": 1,
                "total_images": 4,
                "total_analyses": "zero"
            }
        }));

        let dataset = load_dataset(file.path()).unwrap();
        let meta = dataset.metadata.clone().unwrap();
        assert_eq!(meta.version.as_deref(), Some("2.0.5"));
        assert_eq!(meta.total_analyses, None);

        assert_eq!(
            dataset.metadata_mismatches(),
            vec![MetadataMismatch {
                collection: Collection::ImageRecords,
                declared: 4,
                actual: 2,
            }]
        );
    }
}
