//! Collection import pipeline.
//!
//! Each collection is converted and committed as one atomic batch. A failing
//! collection never stops the ones after it; the outcome of every collection
//! is returned in an [`ImportReport`].

use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, info};

use crate::dataset::DemoDataset;
use crate::dates::convert_dates;
use crate::store::{DocumentStore, StoreError};
use crate::types::{document_id, Collection, Document, Record, RecordError};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),
    #[error("commit failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct CollectionResult {
    pub collection: Collection,
    /// Documents staged in the batch (0 when validation failed).
    pub staged: usize,
    /// Documents written on success.
    pub outcome: Result<usize, CollectionError>,
}

impl CollectionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn written(&self) -> usize {
        self.outcome.as_ref().copied().unwrap_or(0)
    }

    pub fn error(&self) -> Option<&CollectionError> {
        self.outcome.as_ref().err()
    }
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub results: Vec<CollectionResult>,
}

impl ImportReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &CollectionResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CollectionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// True when every attempted collection was committed.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(CollectionResult::is_success)
    }

    pub fn documents_written(&self) -> usize {
        self.results.iter().map(CollectionResult::written).sum()
    }

    pub fn result(&self, collection: Collection) -> Option<&CollectionResult> {
        self.results.iter().find(|r| r.collection == collection)
    }
}

/// Validate keys and convert dates for every record, stopping at the first
/// record without a usable id.
pub fn prepare_documents(records: &[Record]) -> Result<Vec<Document>, RecordError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let id = document_id(record, index)?.to_string();
            Ok(Document {
                id,
                fields: convert_dates(record),
            })
        })
        .collect()
}

/// Upsert `records` into `collection` as a single batch.
///
/// Errors are logged and captured in the returned result rather than
/// propagated. An empty collection makes no store call.
pub async fn import_collection(
    store: &dyn DocumentStore,
    collection: Collection,
    records: &[Record],
) -> CollectionResult {
    info!(%collection, documents = records.len(), "importing collection");

    let documents = match prepare_documents(records) {
        Ok(documents) => documents,
        Err(e) => {
            error!(%collection, err = %e, "collection has an invalid record; nothing written");
            return CollectionResult {
                collection,
                staged: 0,
                outcome: Err(e.into()),
            };
        }
    };

    let staged = documents.len();
    let timestamps: usize = documents.iter().map(Document::timestamp_count).sum();
    info!(%collection, staged, timestamps, "batch staged");
    if staged == 0 {
        info!(%collection, "collection is empty; skipping commit");
        return CollectionResult {
            collection,
            staged,
            outcome: Ok(0),
        };
    }

    match store.commit(collection, &documents).await {
        Ok(written) => {
            info!(%collection, written, "collection imported");
            CollectionResult {
                collection,
                staged,
                outcome: Ok(written),
            }
        }
        Err(e) => {
            error!(%collection, err = %e, "collection import failed");
            CollectionResult {
                collection,
                staged,
                outcome: Err(e.into()),
            }
        }
    }
}

/// Import projects, then image records, then analyses, each awaited before
/// the next starts.
pub async fn import_dataset(store: &dyn DocumentStore, dataset: &DemoDataset) -> ImportReport {
    let mut report = ImportReport::default();
    for collection in Collection::ALL {
        let result = import_collection(store, collection, dataset.records(collection)).await;
        report.results.push(result);
    }

    info!(
        written = report.documents_written(),
        failed = report.failed().count(),
        "dataset import finished"
    );
    report
}

/// What an import would do for one collection, computed without a store.
#[derive(Debug)]
pub struct CollectionPlan {
    pub collection: Collection,
    pub records: usize,
    pub timestamps: usize,
    pub problems: Vec<RecordError>,
    /// Ids appearing more than once; later records overwrite earlier ones.
    pub duplicate_ids: Vec<String>,
}

impl CollectionPlan {
    pub fn is_importable(&self) -> bool {
        self.problems.is_empty()
    }
}

pub fn plan_collection(collection: Collection, records: &[Record]) -> CollectionPlan {
    let mut plan = CollectionPlan {
        collection,
        records: records.len(),
        timestamps: 0,
        problems: Vec::new(),
        duplicate_ids: Vec::new(),
    };
    let mut seen = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        match document_id(record, index) {
            Ok(id) => {
                if !seen.insert(id) && !plan.duplicate_ids.iter().any(|d| d == id) {
                    plan.duplicate_ids.push(id.to_string());
                }
            }
            Err(e) => plan.problems.push(e),
        }
        plan.timestamps += convert_dates(record)
            .values()
            .filter(|v| v.is_timestamp())
            .count();
    }
    plan
}

pub fn plan_dataset(dataset: &DemoDataset) -> Vec<CollectionPlan> {
    Collection::ALL
        .into_iter()
        .map(|c| plan_collection(c, dataset.records(c)))
        .collect()
}
