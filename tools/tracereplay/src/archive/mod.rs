//! Portable `.areplay` archives.
//!
//! An archive is a zip file (deflate) holding three JSON entries:
//! - `manifest.json` - format metadata and the steps checksum
//! - `run.json` - the run record
//! - `steps.json` - every step of the run in `idx` order
//!
//! Entry bytes are stable pretty JSON, so exporting the same run twice yields
//! the same `steps.json` hash.

pub mod reader;
pub mod writer;

use crate::types::{Run, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use reader::{import_archive, load_archive_steps, read_archive};
pub use writer::export_archive;

pub const ARCHIVE_FORMAT: &str = "tracereplay.areplay";
pub const ARCHIVE_VERSION: &str = "0.2";
pub const ARCHIVE_SUFFIX: &str = ".areplay";

pub mod paths {
    pub const MANIFEST: &str = "manifest.json";
    pub const RUN: &str = "run.json";
    pub const STEPS: &str = "steps.json";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub hashes: ManifestHashes,
    #[serde(default)]
    pub redactions_applied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestHashes {
    #[serde(default)]
    pub steps_json_sha256: Option<String>,
}

impl Manifest {
    pub(crate) fn new(run_id: &str, exported_at: DateTime<Utc>, steps_sha256: String, redactions_applied: bool) -> Self {
        Self {
            format: ARCHIVE_FORMAT.to_string(),
            version: Some(ARCHIVE_VERSION.to_string()),
            schema_version: Some(ARCHIVE_VERSION.to_string()),
            created_by: format!("tracereplay {}", env!("CARGO_PKG_VERSION")),
            exported_at: crate::types::format_timestamp(&exported_at),
            run_id: run_id.to_string(),
            hashes: ManifestHashes {
                steps_json_sha256: Some(steps_sha256),
            },
            redactions_applied,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Recorded in the manifest; the exporter does not redact on its own.
    /// `None` takes the flag the recorder stamped into the run's `meta`,
    /// and false when the run carries none.
    pub redactions_applied: Option<bool>,
    pub exported_at: DateTime<Utc>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            redactions_applied: None,
            exported_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    pub path: PathBuf,
    pub run_id: String,
    pub step_count: usize,
    pub steps_sha256: String,
}

/// Outcome of checking `steps.json` against the manifest checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashCheck {
    Verified,
    Mismatch { expected: String, actual: String },
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub run_id: String,
    pub source_run_id: String,
    pub step_count: usize,
    pub hash_check: HashCheck,
    pub warnings: Vec<String>,
}

/// Everything an archive holds, decoded, plus the raw `steps.json` bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveContents {
    pub manifest: Manifest,
    pub run: Run,
    pub steps: Vec<Step>,
    pub steps_bytes: Vec<u8>,
}

impl ArchiveContents {
    pub fn hash_check(&self) -> HashCheck {
        let actual = crate::canonical::sha256_hex(&self.steps_bytes);
        match &self.manifest.hashes.steps_json_sha256 {
            None => HashCheck::Missing,
            Some(expected) if expected.is_empty() => HashCheck::Missing,
            Some(expected) if *expected == actual => HashCheck::Verified,
            Some(expected) => HashCheck::Mismatch {
                expected: expected.clone(),
                actual,
            },
        }
    }
}
