use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::types::{Collection, Document, Fields};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("store rejected commit with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("batch of {size} writes exceeds the per-commit limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("could not obtain an access token: {0}")]
    Auth(#[from] gcp_auth::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A document database that accepts atomic batches of full-document upserts.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Upsert every document into `collection` as one atomic batch: either
    /// all writes land or none do. Returns the number of documents written.
    async fn commit(
        &self,
        collection: Collection,
        documents: &[Document],
    ) -> Result<usize, StoreError>;
}

/// In-process store backing the import tests. Failures can be injected per collection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<Collection, BTreeMap<String, Fields>>,
    failing: HashSet<Collection>,
    attempts: Vec<Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later commit to `collection` fail without writing.
    pub fn fail_collection(&self, collection: Collection) {
        self.lock().failing.insert(collection);
    }

    pub fn documents(&self, collection: Collection) -> BTreeMap<String, Fields> {
        self.lock()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Fields> {
        self.lock()
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Collections for which a commit was attempted, in call order.
    pub fn attempts(&self) -> Vec<Collection> {
        self.lock().attempts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn commit(
        &self,
        collection: Collection,
        documents: &[Document],
    ) -> Result<usize, StoreError> {
        let mut state = self.lock();
        state.attempts.push(collection);
        if state.failing.contains(&collection) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for {collection}"
            )));
        }

        let docs = state.collections.entry(collection).or_default();
        for doc in documents {
            docs.insert(doc.id.clone(), doc.fields.clone());
        }
        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use serde_json::json;

    fn doc(id: &str, name: &str) -> Document {
        let mut fields = Fields::new();
        fields.insert("id".to_string(), FieldValue::Json(json!(id)));
        fields.insert("name".to_string(), FieldValue::Json(json!(name)));
        Document {
            id: id.to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn commit_overwrites_whole_document() {
        let store = MemoryStore::new();
        store
            .commit(Collection::Projects, &[doc("p1", "old")])
            .await
            .unwrap();

        let mut replacement = Fields::new();
        replacement.insert("id".to_string(), FieldValue::Json(json!("p1")));
        let written = store
            .commit(
                Collection::Projects,
                &[Document {
                    id: "p1".to_string(),
                    fields: replacement.clone(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.document(Collection::Projects, "p1"), Some(replacement));
    }

    #[tokio::test]
    async fn failing_collection_writes_nothing() {
        let store = MemoryStore::new();
        store.fail_collection(Collection::Analyses);

        let err = store
            .commit(Collection::Analyses, &[doc("a1", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.documents(Collection::Analyses).is_empty());
        assert_eq!(store.attempts(), vec![Collection::Analyses]);
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_keep_the_last() {
        let store = MemoryStore::new();
        store
            .commit(Collection::Projects, &[doc("p1", "first"), doc("p1", "second")])
            .await
            .unwrap();

        let stored = store.document(Collection::Projects, "p1").unwrap();
        assert_eq!(stored["name"], FieldValue::Json(json!("second")));
    }
}
