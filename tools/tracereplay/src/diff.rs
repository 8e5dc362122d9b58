//! Locates the first step at which two step sequences disagree.

use crate::canonical::stable_json;
use crate::errors::TraceError;
use crate::store::TraceStore;
use crate::types::{Payload, Step};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Which field decided a divergence, in comparison priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffReason {
    KindOrName,
    Input,
    Output,
    Error,
    Length { expected: usize, actual: usize },
}

impl fmt::Display for DiffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KindOrName => f.write_str("kind/name changed"),
            Self::Input => f.write_str("input changed"),
            Self::Output => f.write_str("output changed"),
            Self::Error => f.write_str("error changed"),
            Self::Length { expected, actual } => {
                write!(f, "length changed: {expected} != {actual}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepDivergence {
    pub index: usize,
    /// `None` only for a length divergence where the expected side ran out.
    pub expected: Option<Step>,
    /// `None` only for a length divergence where the actual side ran out.
    pub actual: Option<Step>,
    pub reason: DiffReason,
}

impl StepDivergence {
    /// The step that describes the divergence point, preferring the expected side.
    pub fn anchor(&self) -> Option<&Step> {
        self.expected.as_ref().or(self.actual.as_ref())
    }
}

/// Walks both sequences in lockstep. Payloads compare by stable serialization,
/// so key order never counts as a change.
pub fn first_divergence(expected: &[Step], actual: &[Step]) -> Option<StepDivergence> {
    for (index, (a, b)) in expected.iter().zip(actual).enumerate() {
        if let Some(reason) = compare_steps(a, b) {
            return Some(StepDivergence {
                index,
                expected: Some(a.clone()),
                actual: Some(b.clone()),
                reason,
            });
        }
    }

    if expected.len() == actual.len() {
        return None;
    }
    let index = expected.len().min(actual.len());
    Some(StepDivergence {
        index,
        expected: expected.get(index).cloned(),
        actual: actual.get(index).cloned(),
        reason: DiffReason::Length {
            expected: expected.len(),
            actual: actual.len(),
        },
    })
}

/// Diff two stored runs. Both runs must exist.
pub fn diff_runs(
    store: &dyn TraceStore,
    run_a: &str,
    run_b: &str,
) -> Result<Option<StepDivergence>, TraceError> {
    store.get_run(run_a)?;
    store.get_run(run_b)?;
    let a_steps = store.list_steps(run_a)?;
    let b_steps = store.list_steps(run_b)?;
    Ok(first_divergence(&a_steps, &b_steps))
}

fn compare_steps(a: &Step, b: &Step) -> Option<DiffReason> {
    if a.kind != b.kind || a.name != b.name {
        return Some(DiffReason::KindOrName);
    }
    if payload_json(&a.input) != payload_json(&b.input) {
        return Some(DiffReason::Input);
    }
    if payload_json(&a.output) != payload_json(&b.output) {
        return Some(DiffReason::Output);
    }
    if optional_payload_json(a.error.as_ref()) != optional_payload_json(b.error.as_ref()) {
        return Some(DiffReason::Error);
    }
    None
}

pub(crate) fn payload_json(payload: &Payload) -> String {
    stable_json(&Value::Object(payload.clone()))
}

fn optional_payload_json(payload: Option<&Payload>) -> String {
    payload.map(payload_json).unwrap_or_else(|| "null".to_string())
}
