use anyhow::Result;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::credentials::ServiceAccount;
use crate::dataset::DEFAULT_DATA_REL;
use crate::firestore::{
    Auth, FirestoreSettings, DEFAULT_DATABASE, DEFAULT_TIMEOUT_SECS, MAX_BATCH_WRITES,
};

// ── Default path constants (relative to the working directory) ──────────

/// Service-account key file.
const DEFAULT_CREDENTIALS_REL: &str = "serviceAccountKey.json";

// ── Config struct ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SeederConfig {
    pub data_path: PathBuf,
    pub credentials_path: PathBuf,
    pub project_id: Option<String>,
    pub database: String,
    pub emulator_host: Option<String>,
    pub access_token: Option<String>,
    pub max_batch_writes: usize,
    pub http_timeout_secs: u64,
}

impl SeederConfig {
    pub fn from_env() -> Self {
        let home = dirs::home_dir();
        Self::from_lookup(|key| env::var(key).ok(), home.as_deref())
    }

    /// Resolve settings through `lookup`, falling back to defaults for unset
    /// or blank variables. `~/` prefixes expand against `home` when known.
    pub fn from_lookup<F>(lookup: F, home: Option<&Path>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            data_path: var("SEEDER_DATA_PATH")
                .map(|v| expand_tilde(&v, home))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_REL)),
            credentials_path: var("GOOGLE_APPLICATION_CREDENTIALS")
                .map(|v| expand_tilde(&v, home))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_REL)),
            project_id: var("FIRESTORE_PROJECT_ID"),
            database: var("FIRESTORE_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            emulator_host: var("FIRESTORE_EMULATOR_HOST"),
            access_token: var("FIRESTORE_ACCESS_TOKEN").map(|t| t.trim().to_string()),
            max_batch_writes: parse_or(var("SEEDER_MAX_BATCH_WRITES"), MAX_BATCH_WRITES),
            http_timeout_secs: parse_or(var("SEEDER_HTTP_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Build client settings, reading the credentials file when the project
    /// id is not configured directly.
    ///
    /// Against production, `FIRESTORE_ACCESS_TOKEN` wins when set; otherwise
    /// tokens are minted from the service-account key.
    pub fn firestore_settings(&self) -> Result<FirestoreSettings> {
        let project_id = match &self.project_id {
            Some(id) => id.clone(),
            None => {
                let account = ServiceAccount::from_file(&self.credentials_path)?;
                info!(
                    project_id = %account.project_id,
                    client_email = account.client_email.as_deref().unwrap_or("unknown"),
                    "loaded service account credentials"
                );
                account.project_id
            }
        };

        let mut settings = match &self.emulator_host {
            Some(host) => FirestoreSettings::emulator(host, project_id),
            None => {
                let auth = match &self.access_token {
                    Some(token) => Auth::Bearer(token.clone()),
                    None => Auth::ServiceAccountKey(self.credentials_path.clone()),
                };
                FirestoreSettings::production(project_id, auth)
            }
        };
        settings.database = self.database.clone();
        settings.max_batch_writes = self.max_batch_writes;
        settings.timeout = Duration::from_secs(self.http_timeout_secs);
        Ok(settings)
    }
}

impl fmt::Debug for SeederConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeederConfig")
            .field("data_path", &self.data_path)
            .field("credentials_path", &self.credentials_path)
            .field("project_id", &self.project_id)
            .field("database", &self.database)
            .field("emulator_host", &self.emulator_host)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("max_batch_writes", &self.max_batch_writes)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn expand_tilde(input: &str, home: Option<&Path>) -> PathBuf {
    if let (Some(rest), Some(home)) = (input.strip_prefix("~/"), home) {
        return home.join(rest);
    }
    PathBuf::from(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config(vars: &[(&str, &str)]) -> SeederConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SeederConfig::from_lookup(|key| map.get(key).cloned(), Some(Path::new("/home/metro")))
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let c = config(&[]);
        assert_eq!(c.data_path, PathBuf::from("bin/demo_data_complete.json"));
        assert_eq!(c.credentials_path, PathBuf::from("serviceAccountKey.json"));
        assert_eq!(c.project_id, None);
        assert_eq!(c.database, "(default)");
        assert_eq!(c.max_batch_writes, 500);
        assert_eq!(c.http_timeout_secs, 60);
    }

    #[test]
    fn reads_overrides_and_expands_tilde() {
        let c = config(&[
            ("SEEDER_DATA_PATH", "~/demo/data.json"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/etc/keys/sa.json"),
            ("FIRESTORE_PROJECT_ID", "metro-demo"),
            ("FIRESTORE_DATABASE", "staging"),
            ("SEEDER_MAX_BATCH_WRITES", "100"),
            ("SEEDER_HTTP_TIMEOUT_SECS", "bogus"),
        ]);
        assert_eq!(c.data_path, PathBuf::from("/home/metro/demo/data.json"));
        assert_eq!(c.credentials_path, PathBuf::from("/etc/keys/sa.json"));
        assert_eq!(c.project_id.as_deref(), Some("metro-demo"));
        assert_eq!(c.database, "staging");
        assert_eq!(c.max_batch_writes, 100);
        assert_eq!(c.http_timeout_secs, 60);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let c = config(&[("FIRESTORE_PROJECT_ID", "  "), ("FIRESTORE_DATABASE", "")]);
        assert_eq!(c.project_id, None);
        assert_eq!(c.database, "(default)");
    }

    #[test]
    fn emulator_settings_need_no_token() {
        let c = config(&[
            ("FIRESTORE_EMULATOR_HOST", "localhost:8080"),
            ("FIRESTORE_PROJECT_ID", "demo-metro"),
            ("SEEDER_MAX_BATCH_WRITES", "50"),
        ]);
        let s = c.firestore_settings().unwrap();
        assert_eq!(s.base_url, "http://localhost:8080");
        assert_eq!(s.project_id, "demo-metro");
        assert_eq!(s.max_batch_writes, 50);
    }

    #[test]
    fn production_mints_tokens_from_key_file_without_env_token() {
        let c = config(&[
            ("FIRESTORE_PROJECT_ID", "metro-demo"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/etc/keys/sa.json"),
        ]);
        let s = c.firestore_settings().unwrap();
        assert_eq!(s.base_url, "https://firestore.googleapis.com");
        assert_eq!(s.auth, Auth::ServiceAccountKey(PathBuf::from("/etc/keys/sa.json")));
    }

    #[test]
    fn env_access_token_overrides_key_file() {
        let c = config(&[
            ("FIRESTORE_PROJECT_ID", "metro-demo"),
            ("FIRESTORE_ACCESS_TOKEN", "ya29.token\n"),
        ]);
        let s = c.firestore_settings().unwrap();
        assert_eq!(s.auth, Auth::Bearer("ya29.token".to_string()));
        assert!(!format!("{c:?}").contains("ya29"));
        assert!(!format!("{s:?}").contains("ya29"));
    }

    #[test]
    fn project_id_falls_back_to_credentials_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "service_account", "project_id": "from-key"}}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let c = config(&[
            ("GOOGLE_APPLICATION_CREDENTIALS", path.as_str()),
            ("FIRESTORE_EMULATOR_HOST", "127.0.0.1:8085"),
        ]);
        assert_eq!(c.firestore_settings().unwrap().project_id, "from-key");
    }

    #[test]
    fn missing_credentials_without_project_is_an_error() {
        let c = config(&[
            ("GOOGLE_APPLICATION_CREDENTIALS", "/nonexistent/sa.json"),
            ("FIRESTORE_EMULATOR_HOST", "127.0.0.1:8085"),
        ]);
        assert!(c.firestore_settings().is_err());
    }
}
