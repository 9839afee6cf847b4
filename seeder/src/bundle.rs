//! Assembly of the demo dataset file from its source parts.
//!
//! Layout under the source directory:
//!
//! ```text
//! images/obra1_*.jpg … obra4_*.jpg
//! data/projects.json
//! data/image_records.json   (may contain <BASE64_OBRAn> placeholders)
//! data/analyses.json
//! ```
//!
//! The output directory receives `demo_data_complete.json` plus lighter
//! `*.bin.json` copies where embedded images are replaced by references.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{Local, SecondsFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const DEMO_DATA_VERSION: &str = "2.0.5";
pub const COMPLETE_FILE_NAME: &str = "demo_data_complete.json";
const IMAGE_COUNT: usize = 4;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<BASE64_OBRA([0-9]{1,9})>").unwrap());

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path:?} must contain a JSON array")]
    NotArray { path: PathBuf },
    #[error("placeholder <BASE64_OBRA{index}> has no matching image obra{index}_*.jpg")]
    MissingImage { index: usize },
}

#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub projects: usize,
    pub image_records: usize,
    pub analyses: usize,
    pub images_embedded: usize,
    pub output_path: PathBuf,
    pub output_bytes: u64,
}

pub fn bundle_demo_data(source_dir: &Path, output_dir: &Path) -> Result<BundleSummary, BundleError> {
    let images = load_images(&source_dir.join("images"))?;

    let data_dir = source_dir.join("data");
    let projects = read_array(&data_dir.join("projects.json"))?;
    let analyses = read_array(&data_dir.join("analyses.json"))?;

    let template_path = data_dir.join("image_records.json");
    let template = fs::read_to_string(&template_path).map_err(|source| BundleError::Read {
        path: template_path.clone(),
        source,
    })?;
    let image_records = parse_array(&fill_placeholders(&template, &images)?, &template_path)?;

    fs::create_dir_all(output_dir).map_err(|source| BundleError::Write {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let complete = json!({
        "projects": projects,
        "image_records": image_records,
        "analyses": analyses,
        "metadata": {
            "generated_at": Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            "version": DEMO_DATA_VERSION,
            "total_projects": projects.len(),
            "total_images": image_records.len(),
            "total_analyses": analyses.len(),
        }
    });
    let output_path = output_dir.join(COMPLETE_FILE_NAME);
    let output_bytes = write_json(&output_path, &complete)?;
    info!(path = ?output_path, bytes = output_bytes, "wrote complete dataset");

    write_json(&output_dir.join("projects.bin.json"), &Value::Array(projects.clone()))?;
    write_json(
        &output_dir.join("image_records.bin.json"),
        &Value::Array(image_references(&image_records)),
    )?;
    write_json(&output_dir.join("analyses.bin.json"), &Value::Array(analyses.clone()))?;

    Ok(BundleSummary {
        projects: projects.len(),
        image_records: image_records.len(),
        analyses: analyses.len(),
        images_embedded: images.len(),
        output_path,
        output_bytes,
    })
}

/// Base64 of the first `obra{n}_*.jpg` (by name) for each n in 1..=4.
fn load_images(images_dir: &Path) -> Result<BTreeMap<usize, String>, BundleError> {
    let mut images = BTreeMap::new();
    let mut names: Vec<String> = match fs::read_dir(images_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(e) => {
            warn!(dir = ?images_dir, err = %e, "images directory unavailable");
            return Ok(images);
        }
    };
    names.sort();

    for index in 1..=IMAGE_COUNT {
        let prefix = format!("obra{index}_");
        let Some(name) = names
            .iter()
            .find(|n| n.starts_with(&prefix) && n.ends_with(".jpg"))
        else {
            continue;
        };
        let path = images_dir.join(name);
        let bytes = fs::read(&path).map_err(|source| BundleError::Read {
            path: path.clone(),
            source,
        })?;
        let encoded = STANDARD.encode(&bytes);
        info!(image = index, path = ?path, encoded_len = encoded.len(), "loaded image");
        images.insert(index, encoded);
    }
    Ok(images)
}

fn fill_placeholders(template: &str, images: &BTreeMap<usize, String>) -> Result<String, BundleError> {
    let mut missing = None;
    let filled = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        // Nine ASCII digits always fit a usize.
        let Ok(index) = caps[1].parse::<usize>() else {
            return caps[0].to_string();
        };
        match images.get(&index) {
            Some(encoded) => encoded.clone(),
            None => {
                missing.get_or_insert(index);
                caps[0].to_string()
            }
        }
    });
    match missing {
        Some(index) => Err(BundleError::MissingImage { index }),
        None => Ok(filled.into_owned()),
    }
}

/// Image records with the embedded payload swapped for `[BASE64_DATA_n]`
/// references, n counted from 1.
fn image_references(records: &[Value]) -> Vec<Value> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let mut record = record.clone();
            if let Some(obj) = record.as_object_mut() {
                let reference = format!("[BASE64_DATA_{}]", i + 1);
                let data_url = format!("data:image/jpeg;base64,{reference}");
                obj.insert("imageBase64".to_string(), Value::String(reference));
                obj.insert("imageUrl".to_string(), Value::String(data_url.clone()));
                obj.insert("thumbnailUrl".to_string(), Value::String(data_url));
            }
            record
        })
        .collect()
}

fn read_array(path: &Path) -> Result<Vec<Value>, BundleError> {
    let raw = fs::read_to_string(path).map_err(|source| BundleError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_array(&raw, path)
}

fn parse_array(raw: &str, path: &Path) -> Result<Vec<Value>, BundleError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(BundleError::NotArray {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(BundleError::Json {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json(path: &Path, value: &Value) -> Result<u64, BundleError> {
    let write_err = |source: io::Error| BundleError::Write {
        path: path.to_path_buf(),
        source,
    };
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    fs::write(path, &text).map_err(write_err)?;
    Ok(text.len() as u64)
}
