use super::{paths, ArchiveContents, HashCheck, ImportReport, Manifest};
use crate::errors::TraceError;
use crate::logging::append_run_log;
use crate::store::TraceStore;
use crate::types::{NewStep, Run, Step};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

/// Decode every entry of an archive without touching any store.
pub fn read_archive(path: &Path) -> Result<ArchiveContents, TraceError> {
    let file = File::open(path)
        .map_err(|e| TraceError::Io(format!("open archive {}: {e}", path.display())))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| TraceError::Archive(format!("not a zip archive {}: {e}", path.display())))?;

    let manifest_bytes = read_entry(&mut archive, paths::MANIFEST)?;
    let run_bytes = read_entry(&mut archive, paths::RUN)?;
    let steps_bytes = read_entry(&mut archive, paths::STEPS)?;

    let manifest: Manifest = decode_entry(&manifest_bytes, paths::MANIFEST)?;
    let run: Run = decode_entry(&run_bytes, paths::RUN)?;
    let mut steps: Vec<Step> = decode_entry(&steps_bytes, paths::STEPS)?;
    steps.sort_by_key(|step| step.idx);

    Ok(ArchiveContents {
        manifest,
        run,
        steps,
        steps_bytes,
    })
}

/// Read-only view of an archive's steps, sorted by `idx`.
pub fn load_archive_steps(path: &Path) -> Result<Vec<Step>, TraceError> {
    Ok(read_archive(path)?.steps)
}

/// Import an archive as a brand-new run. A checksum problem is reported as a
/// warning; the steps are imported either way.
pub fn import_archive(store: &dyn TraceStore, path: &Path) -> Result<ImportReport, TraceError> {
    let contents = read_archive(path)?;
    let hash_check = contents.hash_check();

    let mut warnings = Vec::new();
    match &hash_check {
        HashCheck::Verified => {}
        HashCheck::Mismatch { expected, actual } => {
            append_run_log(
                "warn",
                "archive.import.hash_mismatch",
                json!({
                    "path": path.display().to_string(),
                    "expected": expected,
                    "actual": actual,
                }),
            );
            warnings.push(format!(
                "steps.json checksum mismatch: manifest has {expected}, archive contents hash to {actual}"
            ));
        }
        HashCheck::Missing => {
            append_run_log(
                "warn",
                "archive.import.hash_missing",
                json!({ "path": path.display().to_string() }),
            );
            warnings.push("manifest carries no steps.json checksum; contents not verified".to_string());
        }
    }

    let source = contents.run;
    let mut meta = source.meta.clone();
    meta.insert(
        "imported_from".to_string(),
        Value::String(path.display().to_string()),
    );
    meta.insert(
        "areplay_version".to_string(),
        contents
            .manifest
            .version
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );

    let run_id = store.create_run(&source.name, source.started_at, &meta)?;
    if let Some(ended_at) = source.ended_at {
        store.end_run(&run_id, ended_at)?;
    }
    for step in &contents.steps {
        store.add_step(&run_id, &NewStep::from(step))?;
    }

    append_run_log(
        "info",
        "archive.imported",
        json!({
            "path": path.display().to_string(),
            "run_id": run_id,
            "source_run_id": source.id,
            "steps": contents.steps.len(),
            "warnings": warnings.len(),
        }),
    );
    Ok(ImportReport {
        run_id,
        source_run_id: source.id,
        step_count: contents.steps.len(),
        hash_check,
        warnings,
    })
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, TraceError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(TraceError::Archive(format!("missing entry {name}")));
        }
        Err(e) => return Err(TraceError::Archive(format!("open '{name}': {e}"))),
    };
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| TraceError::Archive(format!("read '{name}': {e}")))?;
    Ok(data)
}

fn decode_entry<T: DeserializeOwned>(bytes: &[u8], name: &str) -> Result<T, TraceError> {
    serde_json::from_slice(bytes).map_err(|e| TraceError::Archive(format!("malformed {name}: {e}")))
}
