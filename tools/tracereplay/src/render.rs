//! Text and JSON renderings for the CLI. No terminal styling.

use crate::canonical::{stable_json, stable_json_pretty};
use crate::diff::{payload_json, StepDivergence};
use crate::errors::TraceError;
use crate::golden::GoldenVerdict;
use crate::replay::ReplayReport;
use crate::types::{format_timestamp, Run, Step};
use serde_json::Value;

const DIFF_SNIPPET_CHARS: usize = 400;
const VERDICT_VALUE_CHARS: usize = 800;

pub fn render_verdict_json(verdict: &GoldenVerdict) -> Result<String, TraceError> {
    let value = serde_json::to_value(verdict).map_err(|e| TraceError::Io(e.to_string()))?;
    Ok(stable_json_pretty(&value))
}

pub fn render_verdict_plain(verdict: &GoldenVerdict) -> String {
    let mut lines = vec![verdict.summary.clone()];
    if let Some(d) = &verdict.first_divergence {
        lines.push(format!("step_idx: {}", d.step_idx));
        lines.push(format!("kind/name: {}:{}", d.kind, d.name));
        lines.push(format!("field: {}", d.field_path));
        lines.push(format!("reason: {}", d.reason));
        lines.push(format!("expected: {}", optional_value(d.expected.as_ref())));
        lines.push(format!("actual:   {}", optional_value(d.actual.as_ref())));
    }
    lines.join("\n")
}

pub fn render_diff(divergence: Option<&StepDivergence>) -> String {
    let Some(d) = divergence else {
        return "No divergence. Runs are identical at step granularity.".to_string();
    };
    let mut lines = vec![format!("DIVERGENCE at step index {}: {}", d.index, d.reason)];
    lines.push(format!("  A: {}", step_header(d.expected.as_ref())));
    lines.push(format!("  B: {}", step_header(d.actual.as_ref())));
    lines.push(format!("  A.input:  {}", payload_snippet(d.expected.as_ref(), |s| &s.input)));
    lines.push(format!("  B.input:  {}", payload_snippet(d.actual.as_ref(), |s| &s.input)));
    lines.push(format!("  A.output: {}", payload_snippet(d.expected.as_ref(), |s| &s.output)));
    lines.push(format!("  B.output: {}", payload_snippet(d.actual.as_ref(), |s| &s.output)));
    lines.join("\n")
}

pub fn render_replay(report: &ReplayReport) -> String {
    let mut lines = vec![format!(
        "ok={} steps={}",
        report.ok, report.steps_replayed
    )];
    lines.extend(report.notes.iter().map(|note| format!("- {note}")));
    lines.join("\n")
}

pub fn render_run_line(run: &Run) -> String {
    format!("{}  {}  {}", run.id, format_timestamp(&run.started_at), run.name)
}

fn step_header(step: Option<&Step>) -> String {
    match step {
        Some(step) => format!("kind={} name={} idx={}", step.kind, step.name, step.idx),
        None => "(no step)".to_string(),
    }
}

fn payload_snippet(step: Option<&Step>, field: impl Fn(&Step) -> &crate::types::Payload) -> String {
    match step {
        Some(step) => truncate_chars(&payload_json(field(step)), DIFF_SNIPPET_CHARS),
        None => "-".to_string(),
    }
}

fn optional_value(value: Option<&Value>) -> String {
    let encoded = value.map(stable_json).unwrap_or_else(|| "null".to_string());
    truncate_chars(&encoded, VERDICT_VALUE_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::{render_diff, render_replay, render_verdict_json, render_verdict_plain};
    use crate::diff::first_divergence;
    use crate::golden::{test_run, GoldenTest};
    use crate::replay::ReplayReport;
    use crate::store::{MemoryStore, TraceStore};
    use crate::types::{NewStep, Payload, Step, StepKind};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn tool_step(result: i64) -> Step {
        Step {
            id: "s".to_string(),
            run_id: "r".to_string(),
            idx: 0,
            kind: StepKind::Tool,
            name: "add".to_string(),
            ts: Utc.timestamp_opt(0, 0).single().expect("valid ts"),
            input: json!({"x": 2, "y": 3}).as_object().cloned().unwrap_or_default(),
            output: json!({"result": result}).as_object().cloned().unwrap_or_default(),
            error: None,
        }
    }

    #[test]
    fn diff_text_names_the_index_and_both_sides() {
        let divergence = first_divergence(&[tool_step(5)], &[tool_step(6)]);
        let text = render_diff(divergence.as_ref());
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "DIVERGENCE at step index 0: output changed");
        assert_eq!(lines[1], "  A: kind=tool name=add idx=0");
        assert_eq!(lines[4], r#"  A.output: {"result":5}"#);
        assert_eq!(lines[5], r#"  B.output: {"result":6}"#);

        assert_eq!(
            render_diff(None),
            "No divergence. Runs are identical at step granularity."
        );
    }

    #[test]
    fn length_divergence_marks_the_missing_side() {
        let divergence = first_divergence(&[tool_step(5)], &[]);
        let text = render_diff(divergence.as_ref());
        assert!(text.starts_with("DIVERGENCE at step index 0: length changed: 1 != 0"));
        assert!(text.contains("  B: (no step)"));
    }

    #[test]
    fn replay_report_lists_notes() {
        let report = ReplayReport {
            run_id: "r".to_string(),
            ok: false,
            steps_replayed: 2,
            notes: vec!["Non-contiguous step idx at 2 (prev=0)".to_string()],
        };
        assert_eq!(
            render_replay(&report),
            "ok=false steps=2\n- Non-contiguous step idx at 2 (prev=0)"
        );
    }

    #[test]
    fn verdicts_render_as_plain_and_json() {
        let store = MemoryStore::new();
        let started = Utc.timestamp_opt(0, 0).single().expect("valid ts");
        let mut ids = Vec::new();
        for result in [5, 6] {
            let run_id = store.create_run("agent", started, &Payload::new()).expect("create");
            store.add_step(&run_id, &NewStep::from(&tool_step(result))).expect("add");
            ids.push(run_id);
        }
        let verdict = test_run(&store, &GoldenTest::new(&ids[0], &ids[1])).expect("test");

        let plain = render_verdict_plain(&verdict);
        assert!(plain.starts_with("FAIL: divergence at step 0 (tool:add) - output changed"));
        assert!(plain.contains("field: output"));
        assert!(plain.contains(r#"actual:   {"result":6}"#));

        let parsed: serde_json::Value =
            serde_json::from_str(&render_verdict_json(&verdict).expect("json")).expect("parse");
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["first_divergence"]["field_path"], "output");
        assert_eq!(parsed["details"]["golden"]["type"], "run_id");
        assert_eq!(parsed["details"]["compare"], "tools");
    }
}
