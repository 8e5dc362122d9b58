use super::mocker::ToolMocker;
use crate::errors::TraceError;
use crate::logging::append_run_log;
use crate::store::TraceStore;
use crate::types::{Step, StepKind};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub run_id: String,
    /// False when the step sequence has gaps or repeats.
    pub ok: bool,
    pub steps_replayed: usize,
    pub notes: Vec<String>,
}

pub struct Replayer<'a> {
    store: &'a dyn TraceStore,
}

impl<'a> Replayer<'a> {
    pub fn new(store: &'a dyn TraceStore) -> Self {
        Self { store }
    }

    pub fn build_tool_mocker(&self, run_id: &str, strict: bool) -> Result<ToolMocker, TraceError> {
        self.store.get_run(run_id)?;
        let steps = self.store.list_steps(run_id)?;
        Ok(ToolMocker::new(tool_steps(steps), strict))
    }

    pub fn replay(&self, run_id: &str, strict: bool) -> Result<ReplayReport, TraceError> {
        self.store.get_run(run_id)?;
        let steps = self.store.list_steps(run_id)?;

        let mut notes = contiguity_notes(&steps);
        let ok = notes.is_empty();
        let steps_replayed = steps.len();

        let mocker = ToolMocker::new(tool_steps(steps), strict);
        notes.push(format!(
            "Tool mocker prepared from {} recorded tool steps (strict={}).",
            mocker.recorded(),
            mocker.strict()
        ));

        append_run_log(
            if ok { "info" } else { "warn" },
            "replay.completed",
            json!({
                "run_id": run_id,
                "ok": ok,
                "steps": steps_replayed,
                "tool_steps": mocker.recorded(),
                "strict": strict,
            }),
        );
        Ok(ReplayReport {
            run_id: run_id.to_string(),
            ok,
            steps_replayed,
            notes,
        })
    }
}

/// One note per step whose `idx` is not its predecessor's plus one. The first
/// step is compared against -1, so a run must start at 0.
fn contiguity_notes(steps: &[Step]) -> Vec<String> {
    let mut notes = Vec::new();
    let mut prev = -1_i64;
    for step in steps {
        if prev.checked_add(1) != Some(step.idx) {
            notes.push(format!(
                "Non-contiguous step idx at {} (prev={prev})",
                step.idx
            ));
        }
        prev = step.idx;
    }
    notes
}

fn tool_steps(steps: Vec<Step>) -> Vec<Step> {
    steps
        .into_iter()
        .filter(|step| step.kind == StepKind::Tool)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::Replayer;
    use crate::errors::TraceError;
    use crate::store::{MemoryStore, TraceStore};
    use crate::types::{NewStep, Payload, StepKind};
    use chrono::{TimeZone, Utc};

    fn seed(store: &MemoryStore, steps: &[(i64, StepKind, &str)]) -> String {
        let started = Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).single().expect("valid date");
        let run_id = store.create_run("agent", started, &Payload::new()).expect("create");
        for (idx, kind, name) in steps {
            store
                .add_step(
                    &run_id,
                    &NewStep {
                        idx: *idx,
                        kind: *kind,
                        name: name.to_string(),
                        ts: started,
                        input: Payload::new(),
                        output: Payload::new(),
                        error: None,
                    },
                )
                .expect("add step");
        }
        run_id
    }

    #[test]
    fn contiguous_run_is_ok_with_readiness_note() {
        let store = MemoryStore::new();
        let run_id = seed(
            &store,
            &[(0, StepKind::Llm, "plan"), (1, StepKind::Tool, "search"), (2, StepKind::Tool, "fetch")],
        );
        let report = Replayer::new(&store).replay(&run_id, false).expect("replay");
        assert!(report.ok);
        assert_eq!(report.steps_replayed, 3);
        assert_eq!(
            report.notes,
            vec!["Tool mocker prepared from 2 recorded tool steps (strict=false).".to_string()]
        );
    }

    #[test]
    fn gaps_are_reported_without_failing_the_call() {
        let store = MemoryStore::new();
        let run_id = seed(&store, &[(1, StepKind::Llm, "a"), (2, StepKind::Llm, "b"), (4, StepKind::Tool, "c")]);
        let report = Replayer::new(&store).replay(&run_id, true).expect("replay");
        assert!(!report.ok);
        assert_eq!(report.steps_replayed, 3);
        assert_eq!(report.notes[0], "Non-contiguous step idx at 1 (prev=-1)");
        assert_eq!(report.notes[1], "Non-contiguous step idx at 4 (prev=2)");
        assert!(report.notes[2].contains("strict=true"));
    }

    #[test]
    fn repeated_indices_break_contiguity() {
        let store = MemoryStore::new();
        let run_id = seed(&store, &[(0, StepKind::Llm, "a"), (0, StepKind::Llm, "b")]);
        let report = Replayer::new(&store).replay(&run_id, false).expect("replay");
        assert!(!report.ok);
        assert_eq!(report.notes[0], "Non-contiguous step idx at 0 (prev=0)");
    }

    #[test]
    fn extreme_indices_are_reported_not_overflowed() {
        let store = MemoryStore::new();
        let run_id = seed(&store, &[(i64::MAX, StepKind::Tool, "a"), (i64::MAX, StepKind::Tool, "b")]);
        let report = Replayer::new(&store).replay(&run_id, false).expect("replay");
        assert!(!report.ok);
        assert_eq!(report.notes.len(), 3);
        assert_eq!(
            report.notes[1],
            format!("Non-contiguous step idx at {} (prev={})", i64::MAX, i64::MAX)
        );
    }

    #[test]
    fn empty_run_is_ok_and_unknown_run_is_not_found() {
        let store = MemoryStore::new();
        let run_id = seed(&store, &[]);
        let report = Replayer::new(&store).replay(&run_id, false).expect("replay");
        assert!(report.ok);
        assert_eq!(report.steps_replayed, 0);

        assert!(matches!(
            Replayer::new(&store).replay("nope", false),
            Err(TraceError::RunNotFound(_))
        ));
    }

    #[test]
    fn mocker_only_sees_tool_steps() {
        let store = MemoryStore::new();
        let run_id = seed(
            &store,
            &[(0, StepKind::Tool, "t1"), (1, StepKind::Llm, "think"), (2, StepKind::Tool, "t2")],
        );
        let mut mocker = Replayer::new(&store).build_tool_mocker(&run_id, false).expect("mocker");
        assert_eq!(mocker.recorded(), 2);
        mocker.next_output("t1", &Payload::new()).expect("t1");
        mocker.next_output("t2", &Payload::new()).expect("t2");
        assert!(mocker.is_exhausted());
    }
}
