use crate::errors::TraceError;
use crate::golden::{CompareMode, CompareScope, DEFAULT_SNIPPET_CHARS};
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "tracereplay.toml";
pub const DEFAULT_DB_PATH: &str = "tracereplay.db";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceConfig {
    pub store: StoreConfig,
    pub recorder: RecorderConfig,
    pub golden: GoldenConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecorderConfig {
    pub project: String,
    pub redaction: bool,
    pub secret_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoldenConfig {
    pub compare: CompareScope,
    pub mode: CompareMode,
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Run log destination; logging stays off when unset.
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                db_path: PathBuf::from(DEFAULT_DB_PATH),
            },
            recorder: RecorderConfig {
                project: "default".to_string(),
                redaction: true,
                secret_keys: Vec::new(),
            },
            golden: GoldenConfig {
                compare: CompareScope::Tools,
                mode: CompareMode::Tool,
                snippet_chars: DEFAULT_SNIPPET_CHARS,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialTraceConfig {
    store: Option<PartialStoreConfig>,
    recorder: Option<PartialRecorderConfig>,
    golden: Option<PartialGoldenConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialStoreConfig {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialRecorderConfig {
    project: Option<String>,
    redaction: Option<bool>,
    secret_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialGoldenConfig {
    compare: Option<CompareScope>,
    mode: Option<CompareMode>,
    snippet_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the config file (explicit path, or `tracereplay.toml` in
/// `process_cwd` when present), then CLI overrides. Relative paths resolve
/// against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<TraceConfig, TraceError> {
    let mut cfg = TraceConfig::default();

    let config_path = match &overrides.config_path {
        Some(path) => Some(absolutize_path(process_cwd, path)),
        None => {
            let candidate = process_cwd.join(DEFAULT_CONFIG_FILE);
            fs.exists(&candidate).then_some(candidate)
        }
    };
    if let Some(path) = config_path {
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialTraceConfig = toml::from_str(&file_contents)
            .map_err(|e| TraceError::ConfigParse(format!("{}: {e}", path.display())))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    cfg.store.db_path = absolutize_path(process_cwd, &cfg.store.db_path);
    if let Some(path) = &cfg.logging.path {
        cfg.logging.path = Some(absolutize_path(process_cwd, path));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut TraceConfig, partial: PartialTraceConfig) {
    if let Some(store) = partial.store {
        if let Some(db_path) = store.db_path {
            cfg.store.db_path = db_path;
        }
    }

    if let Some(recorder) = partial.recorder {
        if let Some(project) = recorder.project {
            cfg.recorder.project = project;
        }
        if let Some(redaction) = recorder.redaction {
            cfg.recorder.redaction = redaction;
        }
        if let Some(secret_keys) = recorder.secret_keys {
            cfg.recorder.secret_keys = secret_keys;
        }
    }

    if let Some(golden) = partial.golden {
        if let Some(compare) = golden.compare {
            cfg.golden.compare = compare;
        }
        if let Some(mode) = golden.mode {
            cfg.golden.mode = mode;
        }
        if let Some(snippet_chars) = golden.snippet_chars {
            cfg.golden.snippet_chars = snippet_chars;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(max_payload_bytes) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = max_payload_bytes;
        }
        if let Some(budget_bytes) = logging.budget_bytes {
            cfg.logging.budget_bytes = budget_bytes;
        }
    }
}

fn apply_cli_overrides(cfg: &mut TraceConfig, overrides: &CliOverrides) {
    if let Some(db_path) = &overrides.db_path {
        cfg.store.db_path = db_path.clone();
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &TraceConfig) -> Result<(), TraceError> {
    if cfg.store.db_path.as_os_str().is_empty() {
        return Err(TraceError::InvalidConfig(
            "store.db_path must not be empty".to_string(),
        ));
    }
    if cfg.recorder.project.trim().is_empty() {
        return Err(TraceError::InvalidConfig(
            "recorder.project must not be empty".to_string(),
        ));
    }
    if cfg.golden.snippet_chars == 0 {
        return Err(TraceError::InvalidConfig(
            "golden.snippet_chars must be greater than zero".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes == 0 {
        return Err(TraceError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
