//! Firestore REST client.
//!
//! Each batch is sent as a single `documents:commit` call whose writes are
//! `update` operations without an `updateMask`, i.e. full-document upserts.
//! The commit is atomic on the server side.
//!
//! Requests are authorized with a fixed bearer token (the emulator's `owner`
//! or an externally supplied token) or with OAuth tokens minted from a
//! service-account key.

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::dates::format_iso_millis;
use crate::store::{DocumentStore, StoreError};
use crate::types::{Collection, Document, FieldValue, Fields};

pub const PRODUCTION_BASE_URL: &str = "https://firestore.googleapis.com";
pub const DEFAULT_DATABASE: &str = "(default)";
/// Firestore refuses commits with more writes than this.
pub const MAX_BATCH_WRITES: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Bearer token the emulator accepts for admin access.
const EMULATOR_TOKEN: &str = "owner";
/// OAuth scope covering Firestore reads and writes.
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// How commit requests are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Anonymous,
    Bearer(String),
    /// Mint tokens from this service-account key file.
    ServiceAccountKey(PathBuf),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Anonymous => f.write_str("Anonymous"),
            Auth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Auth::ServiceAccountKey(path) => f.debug_tuple("ServiceAccountKey").field(path).finish(),
        }
    }
}

#[derive(Clone)]
pub struct FirestoreSettings {
    pub base_url: String,
    pub project_id: String,
    pub database: String,
    pub auth: Auth,
    pub max_batch_writes: usize,
    pub timeout: Duration,
}

impl FirestoreSettings {
    pub fn production(project_id: impl Into<String>, auth: Auth) -> Self {
        Self {
            base_url: PRODUCTION_BASE_URL.to_string(),
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_string(),
            auth,
            max_batch_writes: MAX_BATCH_WRITES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Settings for a local emulator at `host` (e.g. `localhost:8080`).
    pub fn emulator(host: &str, project_id: impl Into<String>) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        Self {
            base_url,
            ..Self::production(project_id, Auth::Bearer(EMULATOR_TOKEN.to_string()))
        }
    }
}

impl fmt::Debug for FirestoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirestoreSettings")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("database", &self.database)
            .field("auth", &self.auth)
            .field("max_batch_writes", &self.max_batch_writes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
enum Tokens {
    None,
    Fixed(String),
    Minted(Arc<CustomServiceAccount>),
}

#[derive(Clone)]
pub struct FirestoreStore {
    http: Client,
    tokens: Tokens,
    settings: FirestoreSettings,
}

impl FirestoreStore {
    /// Build the client. A service-account key is loaded here, so a missing
    /// or malformed key fails before any commit.
    pub fn new(settings: FirestoreSettings) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|source| StoreError::Transport {
                url: settings.base_url.clone(),
                source,
            })?;
        let tokens = match &settings.auth {
            Auth::Anonymous => Tokens::None,
            Auth::Bearer(token) => Tokens::Fixed(token.clone()),
            Auth::ServiceAccountKey(path) => {
                let account = CustomServiceAccount::from_file(path)?;
                info!(key = ?path, "minting access tokens from service account key");
                Tokens::Minted(Arc::new(account))
            }
        };
        Ok(Self {
            http,
            tokens,
            settings,
        })
    }

    async fn bearer_token(&self) -> Result<Option<String>, StoreError> {
        match &self.tokens {
            Tokens::None => Ok(None),
            Tokens::Fixed(token) => Ok(Some(token.clone())),
            Tokens::Minted(account) => {
                let token = account.token(&[DATASTORE_SCOPE]).await?;
                Ok(Some(token.as_str().to_string()))
            }
        }
    }

    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}",
            self.settings.project_id, self.settings.database
        )
    }

    pub fn commit_url(&self) -> String {
        format!(
            "{}/v1/{}/documents:commit",
            self.settings.base_url.trim_end_matches('/'),
            self.database_path()
        )
    }

    pub fn document_name(&self, collection: Collection, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_path(), collection, id)
    }

    pub fn commit_body(&self, collection: Collection, documents: &[Document]) -> Value {
        let writes: Vec<Value> = documents
            .iter()
            .map(|doc| {
                json!({
                    "update": {
                        "name": self.document_name(collection, &doc.id),
                        "fields": encode_fields(&doc.fields),
                    }
                })
            })
            .collect();
        json!({ "writes": writes })
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn commit(
        &self,
        collection: Collection,
        documents: &[Document],
    ) -> Result<usize, StoreError> {
        if documents.len() > self.settings.max_batch_writes {
            return Err(StoreError::BatchTooLarge {
                size: documents.len(),
                limit: self.settings.max_batch_writes,
            });
        }

        let url = self.commit_url();
        let body = self.commit_body(collection, documents);

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        let res = request.send().await.map_err(|source| StoreError::Transport {
            url: url.clone(),
            source,
        })?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Rejected { status, body });
        }

        debug!(%collection, writes = documents.len(), "commit acknowledged");
        Ok(documents.len())
    }
}

pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

/// Encode a field as a Firestore typed value.
pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Timestamp(ts) => json!({ "timestampValue": format_iso_millis(ts) }),
        FieldValue::Json(v) => encode_json(v),
    }
}

fn encode_json(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        // integerValue is int64 carried as a decimal string. Floats with an
        // integral value inside the 2^53 safe range are stored as integers too,
        // matching the admin SDK; anything else is a double.
        Value::Number(n) => match n.as_i64().or_else(|| safe_integer(n.as_f64()?)) {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_json).collect::<Vec<_>>() }
        }),
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_json(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

fn safe_integer(f: f64) -> Option<i64> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    (f.fract() == 0.0 && f.abs() <= MAX_SAFE).then_some(f as i64)
}
