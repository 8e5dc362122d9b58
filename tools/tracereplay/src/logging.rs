use crate::errors::TraceError;
use crate::types::format_timestamp;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

#[derive(Serialize)]
struct LogLine<'a> {
    ts: String,
    level: &'a str,
    event_type: &'a str,
    payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), TraceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| TraceError::Io(e.to_string()))?;
            }
        }
        let line = serde_json::to_string(&LogLine {
            ts: format_timestamp(&Utc::now()),
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| TraceError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TraceError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TraceError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| TraceError::Io(e.to_string()))?;

        let _ = enforce_total_budget(&self.path, self.budget_bytes)?;
        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Route `append_run_log` events to `logger` for the rest of the process.
pub fn init_run_logger(logger: JsonlLogger) {
    let mut slot = logger_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(logger);
}

pub fn clear_run_logger() {
    let mut slot = logger_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}

/// Best-effort structured event; a no-op until `init_run_logger` is called.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = {
        let slot = logger_slot()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_ref() {
            Some(logger) => logger.clone(),
            None => return,
        }
    };
    let _ = logger.append(&LogEvent {
        level,
        event_type,
        payload,
    });
}

/// Delete the oldest rotated siblings of `log_path` (same stem prefix and
/// extension, e.g. `run.1.jsonl` next to `run.jsonl`) until the family fits
/// `budget_bytes`. Other files in the directory are never touched, nor is the
/// active log itself.
pub fn enforce_total_budget(log_path: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, TraceError> {
    let dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut files = fs::read_dir(dir)
        .map_err(|e| TraceError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_log_sibling(log_path, path))
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb)
    });

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        if path.file_name() == log_path.file_name() {
            continue;
        }
        let len = fs::metadata(&path)
            .map_err(|e| TraceError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| TraceError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_log_sibling(log_path: &Path, candidate: &Path) -> bool {
    let (Some(stem), Some(name)) = (
        log_path.file_stem().and_then(|s| s.to_str()),
        candidate.file_name().and_then(|s| s.to_str()),
    ) else {
        return false;
    };
    let same_extension = candidate.extension() == log_path.extension();
    same_extension && (name == stem || name.starts_with(&format!("{stem}.")))
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{enforce_total_budget, truncate_json, JsonlLogger, LogEvent};
    use serde_json::json;
    use std::fs;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024 * 1024;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "recorder.step.recorded",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = fs::read_to_string(&path).expect("read");
        let line: serde_json::Value = serde_json::from_str(text.trim()).expect("jsonl line");
        assert_eq!(line["event_type"], "recorder.step.recorded");
        assert!(line["payload"].as_str().expect("truncated string").ends_with("..."));
        assert!(line["ts"].as_str().expect("ts").ends_with("+00:00"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = truncate_json(json!("ééééééééé"), 8);
        assert!(value.as_str().expect("string").ends_with("..."));
    }

    #[test]
    fn budget_prunes_oldest_rotated_logs_but_keeps_active_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("run.1.jsonl"), vec![0u8; 40]).expect("run.1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        fs::write(dir.path().join("run.2.jsonl"), vec![0u8; 40]).expect("run.2");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let active = dir.path().join("run.jsonl");
        fs::write(&active, vec![0u8; 40]).expect("active");

        let deleted = enforce_total_budget(&active, 50).expect("pruned");
        assert_eq!(deleted.len(), 2);
        assert!(active.exists());
    }

    #[test]
    fn budget_never_touches_unrelated_files_next_to_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let unrelated = [
            "tracereplay.db",
            "tracereplay.db-wal",
            "tracereplay.toml",
            "golden.areplay",
            "other.jsonl",
            "runner.jsonl",
        ];
        for name in unrelated {
            fs::write(dir.path().join(name), vec![0u8; 2048]).expect("unrelated file");
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut logger = JsonlLogger::new(dir.path().join("run.jsonl"));
        logger.budget_bytes = 1000;
        logger
            .append(&LogEvent {
                level: "info",
                event_type: "cli.command.started",
                payload: json!({"command": "runs"}),
            })
            .expect("append");

        for name in unrelated {
            assert!(dir.path().join(name).exists(), "{name} should survive log pruning");
        }
    }
}
