use super::{paths, ExportInfo, ExportOptions, Manifest};
use crate::canonical::{sha256_hex, stable_json_pretty};
use crate::errors::TraceError;
use crate::logging::append_run_log;
use crate::recorder::REDACTION_META_KEY;
use crate::store::TraceStore;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::{Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Export one stored run. The archive appears at `path` only once it is
/// complete; on failure no file is left behind.
pub fn export_archive(
    store: &dyn TraceStore,
    run_id: &str,
    path: &Path,
    options: &ExportOptions,
) -> Result<ExportInfo, TraceError> {
    let run = store.get_run(run_id)?;
    let steps = store.list_steps(run_id)?;

    let run_bytes = entry_bytes(&run)?;
    let steps_bytes = entry_bytes(&steps)?;
    let steps_sha256 = sha256_hex(&steps_bytes);
    let redactions_applied = options.redactions_applied.unwrap_or_else(|| {
        run.meta
            .get(REDACTION_META_KEY)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    });
    let manifest = Manifest::new(
        run_id,
        options.exported_at,
        steps_sha256.clone(),
        redactions_applied,
    );
    let manifest_bytes = entry_bytes(&manifest)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| TraceError::Io(e.to_string()))?;
    }

    // Uniquely named sibling; dropped (and deleted) on any early return.
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| TraceError::Io(e.to_string()))?;
    let entries = [
        (paths::MANIFEST, manifest_bytes.as_slice()),
        (paths::RUN, run_bytes.as_slice()),
        (paths::STEPS, steps_bytes.as_slice()),
    ];
    write_zip(temp.as_file_mut(), &entries)?;
    temp.as_file()
        .sync_all()
        .map_err(|e| TraceError::Io(e.to_string()))?;
    temp.persist(path)
        .map_err(|e| TraceError::Io(format!("move archive into place: {}", e.error)))?;

    append_run_log(
        "info",
        "archive.exported",
        json!({
            "run_id": run_id,
            "path": path.display().to_string(),
            "steps": steps.len(),
            "steps_sha256": steps_sha256,
        }),
    );
    Ok(ExportInfo {
        path: path.to_path_buf(),
        run_id: run_id.to_string(),
        step_count: steps.len(),
        steps_sha256,
    })
}

fn entry_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, TraceError> {
    let value = serde_json::to_value(value).map_err(|e| TraceError::Archive(e.to_string()))?;
    Ok(stable_json_pretty(&value).into_bytes())
}

fn write_zip<W: Write + Seek>(writer: W, entries: &[(&str, &[u8])]) -> Result<(), TraceError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    let mut zip = ZipWriter::new(writer);
    for (name, data) in entries {
        zip.start_file(*name, options)
            .map_err(|e| TraceError::Archive(format!("start '{name}': {e}")))?;
        zip.write_all(data)
            .map_err(|e| TraceError::Archive(format!("write '{name}': {e}")))?;
    }
    let mut writer = zip
        .finish()
        .map_err(|e| TraceError::Archive(format!("zip finish: {e}")))?;
    writer.flush().map_err(|e| TraceError::Io(e.to_string()))
}
