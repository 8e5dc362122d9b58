pub mod archive;
pub mod canonical;
pub mod config;
pub mod diff;
pub mod errors;
pub mod golden;
pub mod logging;
pub mod recorder;
pub mod redact;
pub mod render;
pub mod replay;
pub mod runtime;
pub mod store;
pub mod types;

use archive::{export_archive, import_archive, ExportOptions};
use clap::{error::ErrorKind, Parser, Subcommand, ValueEnum};
use config::{load_config, CliOverrides, TraceConfig};
use errors::TraceError;
use golden::{test_run, CompareMode, CompareScope, GoldenSource, GoldenTest};
use logging::{append_run_log, clear_run_logger, init_run_logger, JsonlLogger};
use replay::Replayer;
use runtime::ProductionRuntime;
use serde_json::json;
use std::path::PathBuf;
use store::{SqliteStore, TraceStore, DEFAULT_LIST_LIMIT};

#[derive(Debug, Clone, Parser)]
#[command(name = "tracereplay", version)]
#[command(about = "Record, replay, diff and golden-test agent execution traces")]
pub struct Cli {
    /// SQLite trace database (overrides `[store] db_path`).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// TOML config file; `tracereplay.toml` in the working directory is used when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Inspect recorded runs.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
    /// Check a run's step sequence and prepare tool mocking.
    Replay {
        run_id: String,
        /// Require tool inputs to match the recording exactly.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Show the first step where two runs diverge.
    Diff { run_a: String, run_b: String },
    /// Write a run to a portable `.areplay` archive.
    Export {
        run_id: String,
        #[arg(short = 'o', long = "out", default_value = "run.areplay")]
        out: PathBuf,
    },
    /// Load a `.areplay` archive as a new run.
    Import { path: PathBuf },
    /// Compare a run against a golden run id or `.areplay` file.
    Test {
        golden: String,
        current_run_id: String,
        #[arg(long, default_value_t = false)]
        strict: bool,
        #[arg(long, value_enum)]
        compare: Option<CliCompare>,
        #[arg(long, value_enum)]
        mode: Option<CliMode>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum RunsCommand {
    /// Most recently started runs first.
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliCompare {
    Tools,
    Actions,
    All,
}

impl From<CliCompare> for CompareScope {
    fn from(value: CliCompare) -> Self {
        match value {
            CliCompare::Tools => CompareScope::Tools,
            CliCompare::Actions => CompareScope::Actions,
            CliCompare::All => CompareScope::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    Tool,
    Full,
}

impl From<CliMode> for CompareMode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Tool => CompareMode::Tool,
            CliMode::Full => CompareMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

pub fn run() -> Result<i32, TraceError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TraceError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, TraceError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                runtime.terminal.write_line(error.to_string().trim_end())?;
                return Ok(0);
            }
            _ => return Err(TraceError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        db_path: cli.db.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    if let Some(path) = &cfg.logging.path {
        init_run_logger(JsonlLogger {
            path: path.clone(),
            max_payload_bytes: cfg.logging.max_payload_bytes,
            budget_bytes: cfg.logging.budget_bytes,
        });
    }

    let outcome = SqliteStore::open(&cfg.store.db_path).and_then(|store| {
        append_run_log(
            "info",
            "cli.command.started",
            json!({ "command": command_name(&cli.command), "db_path": cfg.store.db_path.display().to_string() }),
        );
        execute(cli.command, &cfg, &store, cwd, runtime)
    });
    if cfg.logging.path.is_some() {
        clear_run_logger();
    }
    outcome
}

fn execute(
    command: Command,
    cfg: &TraceConfig,
    store: &dyn TraceStore,
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, TraceError> {
    let terminal = runtime.terminal.as_ref();
    match command {
        Command::Runs {
            command: RunsCommand::List { limit },
        } => {
            for run in store.list_runs(limit)? {
                terminal.write_line(&render::render_run_line(&run))?;
            }
            Ok(0)
        }
        Command::Replay { run_id, strict } => {
            let report = Replayer::new(store).replay(&run_id, strict)?;
            terminal.write_line(&render::render_replay(&report))?;
            Ok(if report.ok { 0 } else { 1 })
        }
        Command::Diff { run_a, run_b } => {
            let divergence = diff::diff_runs(store, &run_a, &run_b)?;
            terminal.write_line(&render::render_diff(divergence.as_ref()))?;
            Ok(0)
        }
        Command::Export { run_id, out } => {
            let path = if out.is_absolute() { out } else { cwd.join(out) };
            let options = ExportOptions {
                redactions_applied: None,
                exported_at: runtime.clock.now(),
            };
            let info = export_archive(store, &run_id, &path, &options)?;
            terminal.write_line(&format!("Exported: {}", info.path.display()))?;
            Ok(0)
        }
        Command::Import { path } => {
            let path = if path.is_absolute() { path } else { cwd.join(path) };
            let report = import_archive(store, &path)?;
            for warning in &report.warnings {
                terminal.write_error_line(&format!("warning: {warning}"))?;
            }
            terminal.write_line(&format!("Imported as run_id: {}", report.run_id))?;
            Ok(0)
        }
        Command::Test {
            golden,
            current_run_id,
            strict,
            compare,
            mode,
            format,
        } => {
            let golden = match GoldenSource::parse(&golden) {
                GoldenSource::Archive(path) if path.is_relative() => GoldenSource::Archive(cwd.join(path)),
                other => other,
            };
            let test = GoldenTest {
                golden,
                current_run_id,
                strict,
                compare: compare.map(Into::into).unwrap_or(cfg.golden.compare),
                mode: mode.map(Into::into).unwrap_or(cfg.golden.mode),
                snippet_chars: cfg.golden.snippet_chars,
            };
            let verdict = test_run(store, &test)?;
            let rendered = match format {
                OutputFormat::Plain => render::render_verdict_plain(&verdict),
                OutputFormat::Json => render::render_verdict_json(&verdict)?,
            };
            terminal.write_line(&rendered)?;
            Ok(verdict.exit_code())
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Runs { .. } => "runs",
        Command::Replay { .. } => "replay",
        Command::Diff { .. } => "diff",
        Command::Export { .. } => "export",
        Command::Import { .. } => "import",
        Command::Test { .. } => "test",
    }
}
