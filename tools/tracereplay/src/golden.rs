//! Golden-trace regression testing: compare a current run against a reference
//! run or archive and produce a pass/fail verdict.

use crate::archive::{load_archive_steps, ARCHIVE_SUFFIX};
use crate::canonical::stable_json;
use crate::diff::{first_divergence, DiffReason, StepDivergence};
use crate::errors::TraceError;
use crate::logging::append_run_log;
use crate::store::TraceStore;
use crate::types::{Step, StepKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_SNIPPET_CHARS: usize = 600;

/// Which steps take part in a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareScope {
    #[default]
    Tools,
    /// Planner decisions, i.e. `llm` steps.
    Actions,
    All,
}

impl CompareScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Actions => "actions",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tools" => Some(Self::Tools),
            "actions" => Some(Self::Actions),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn includes(self, step: &Step) -> bool {
        match self {
            Self::Tools => step.kind == StepKind::Tool,
            Self::Actions => step.kind == StepKind::Llm,
            Self::All => true,
        }
    }
}

impl fmt::Display for CompareScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carried through to the verdict; comparison is step-level in both modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    #[default]
    Tool,
    Full,
}

impl CompareMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tool" => Some(Self::Tool),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoldenSource {
    Archive(PathBuf),
    Run(String),
}

impl GoldenSource {
    /// Anything ending in `.areplay` is an archive path; everything else is a run id.
    pub fn parse(reference: &str) -> Self {
        if reference.ends_with(ARCHIVE_SUFFIX) {
            Self::Archive(PathBuf::from(reference))
        } else {
            Self::Run(reference.to_string())
        }
    }

    fn describe(&self) -> GoldenRef {
        match self {
            Self::Archive(path) => GoldenRef {
                kind: "file".to_string(),
                value: path.display().to_string(),
            },
            Self::Run(run_id) => GoldenRef {
                kind: "run_id".to_string(),
                value: run_id.clone(),
            },
        }
    }

    fn load_steps(&self, store: &dyn TraceStore) -> Result<Vec<Step>, TraceError> {
        match self {
            Self::Archive(path) => load_archive_steps(path),
            Self::Run(run_id) => {
                store.get_run(run_id)?;
                store.list_steps(run_id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldPath {
    #[serde(rename = "kind/name")]
    KindName,
    #[serde(rename = "input")]
    Input,
    #[serde(rename = "output")]
    Output,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "steps.length")]
    StepsLength,
    #[serde(rename = "unknown")]
    Unknown,
}

impl FieldPath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KindName => "kind/name",
            Self::Input => "input",
            Self::Output => "output",
            Self::Error => "error",
            Self::StepsLength => "steps.length",
            Self::Unknown => "unknown",
        }
    }

    /// Map a reason label by substring; labels outside the diff engine's set
    /// become `Unknown`.
    pub fn from_reason(reason: &str) -> Self {
        if reason.contains("kind/name") {
            Self::KindName
        } else if reason.contains("input") {
            Self::Input
        } else if reason.contains("output") {
            Self::Output
        } else if reason.contains("error") {
            Self::Error
        } else if reason.contains("length") {
            Self::StepsLength
        } else {
            Self::Unknown
        }
    }
}

impl From<DiffReason> for FieldPath {
    fn from(reason: DiffReason) -> Self {
        Self::from_reason(&reason.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldenTest {
    pub golden: GoldenSource,
    pub current_run_id: String,
    /// Recorded in the verdict; does not change the comparison.
    pub strict: bool,
    pub compare: CompareScope,
    pub mode: CompareMode,
    pub snippet_chars: usize,
}

impl GoldenTest {
    pub fn new(golden: &str, current_run_id: &str) -> Self {
        Self {
            golden: GoldenSource::parse(golden),
            current_run_id: current_run_id.to_string(),
            strict: false,
            compare: CompareScope::default(),
            mode: CompareMode::default(),
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Divergence {
    pub step_idx: usize,
    pub kind: String,
    pub name: String,
    pub field_path: FieldPath,
    pub reason: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoldenRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoldenDetails {
    pub golden: GoldenRef,
    pub current_run_id: String,
    pub compare: CompareScope,
    pub strict: bool,
    pub mode: CompareMode,
    pub steps_compared: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenVerdict {
    pub ok: bool,
    pub first_divergence: Option<Divergence>,
    pub summary: String,
    pub details: GoldenDetails,
}

impl GoldenVerdict {
    pub fn exit_code(&self) -> i32 {
        if self.ok {
            0
        } else {
            1
        }
    }
}

/// Content mismatches come back as a failing verdict; only lookups and
/// archive reads produce errors.
pub fn test_run(store: &dyn TraceStore, test: &GoldenTest) -> Result<GoldenVerdict, TraceError> {
    let golden_steps = test.golden.load_steps(store)?;
    store.get_run(&test.current_run_id)?;
    let current_steps = store.list_steps(&test.current_run_id)?;

    let expected = filter_steps(golden_steps, test.compare);
    let actual = filter_steps(current_steps, test.compare);

    let mut details = GoldenDetails {
        golden: test.golden.describe(),
        current_run_id: test.current_run_id.clone(),
        compare: test.compare,
        strict: test.strict,
        mode: test.mode,
        steps_compared: expected.len(),
        expected_snippet: None,
        actual_snippet: None,
    };

    let verdict = match first_divergence(&expected, &actual) {
        None => GoldenVerdict {
            ok: true,
            first_divergence: None,
            summary: "PASS: no divergence".to_string(),
            details,
        },
        Some(found) => {
            let divergence = describe_divergence(&found);
            details.expected_snippet = divergence
                .expected
                .as_ref()
                .map(|value| snippet(value, test.snippet_chars));
            details.actual_snippet = divergence
                .actual
                .as_ref()
                .map(|value| snippet(value, test.snippet_chars));
            GoldenVerdict {
                ok: false,
                summary: format!(
                    "FAIL: divergence at step {} ({}:{}) - {}",
                    divergence.step_idx, divergence.kind, divergence.name, divergence.reason
                ),
                first_divergence: Some(divergence),
                details,
            }
        }
    };

    append_run_log(
        if verdict.ok { "info" } else { "warn" },
        "golden.completed",
        json!({
            "current_run_id": test.current_run_id,
            "compare": test.compare.as_str(),
            "ok": verdict.ok,
            "steps_compared": verdict.details.steps_compared,
            "field_path": verdict.first_divergence.as_ref().map(|d| d.field_path.as_str()),
        }),
    );
    Ok(verdict)
}

fn filter_steps(steps: Vec<Step>, scope: CompareScope) -> Vec<Step> {
    steps.into_iter().filter(|step| scope.includes(step)).collect()
}

fn describe_divergence(found: &StepDivergence) -> Divergence {
    let field_path = FieldPath::from(found.reason);
    let (expected, actual) = match (&found.expected, &found.actual) {
        (Some(a), Some(b)) => match found.reason {
            DiffReason::KindOrName => (
                Some(json!({ "kind": a.kind, "name": a.name })),
                Some(json!({ "kind": b.kind, "name": b.name })),
            ),
            DiffReason::Input => (
                Some(Value::Object(a.input.clone())),
                Some(Value::Object(b.input.clone())),
            ),
            DiffReason::Output => (
                Some(Value::Object(a.output.clone())),
                Some(Value::Object(b.output.clone())),
            ),
            DiffReason::Error => (
                Some(a.error.clone().map(Value::Object).unwrap_or(Value::Null)),
                Some(b.error.clone().map(Value::Object).unwrap_or(Value::Null)),
            ),
            DiffReason::Length { .. } => (None, None),
        },
        _ => (None, None),
    };
    let (kind, name) = found
        .anchor()
        .map(|step| (step.kind.as_str().to_string(), step.name.clone()))
        .unwrap_or_default();

    Divergence {
        step_idx: found.index,
        kind,
        name,
        field_path,
        reason: found.reason.to_string(),
        expected,
        actual,
    }
}

fn snippet(value: &Value, max_chars: usize) -> String {
    stable_json(value).chars().take(max_chars).collect()
}
