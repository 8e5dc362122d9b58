use crate::canonical::stable_json;
use crate::errors::TraceError;
use crate::types::{Payload, Step};
use serde_json::Value;

/// Serves recorded tool outputs in recorded order.
///
/// Every call consumes one recorded step, including calls that fail a name or
/// input check, so the cursor always equals the number of requests made.
#[derive(Debug, Clone)]
pub struct ToolMocker {
    steps: Vec<Step>,
    cursor: usize,
    strict: bool,
}

impl ToolMocker {
    /// `tool_steps` must already be in `idx` order.
    pub fn new(tool_steps: Vec<Step>, strict: bool) -> Self {
        Self {
            steps: tool_steps,
            cursor: 0,
            strict,
        }
    }

    pub fn next_output(&mut self, tool_name: &str, tool_input: &Payload) -> Result<Payload, TraceError> {
        let cursor = self.cursor;
        let step = self.steps.get(cursor).ok_or(TraceError::ReplayExhausted {
            recorded: self.steps.len(),
        })?;
        self.cursor += 1;

        if step.name != tool_name {
            return Err(TraceError::ToolNameMismatch {
                cursor,
                recorded: step.name.clone(),
                requested: tool_name.to_string(),
            });
        }
        if self.strict && !same_payload(&step.input, tool_input) {
            return Err(TraceError::ToolInputMismatch {
                cursor,
                name: step.name.clone(),
            });
        }
        Ok(step.output.clone())
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn recorded(&self) -> usize {
        self.steps.len()
    }

    pub fn consumed(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

fn same_payload(recorded: &Payload, requested: &Payload) -> bool {
    stable_json(&Value::Object(recorded.clone())) == stable_json(&Value::Object(requested.clone()))
}

#[cfg(test)]
mod tests {
    use super::ToolMocker;
    use crate::errors::TraceError;
    use crate::types::{Payload, Step, StepKind};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn tool(idx: i64, name: &str, input: serde_json::Value, output: serde_json::Value) -> Step {
        Step {
            id: format!("s{idx}"),
            run_id: "r".to_string(),
            idx,
            kind: StepKind::Tool,
            name: name.to_string(),
            ts: Utc.timestamp_opt(idx, 0).single().expect("valid ts"),
            input: payload(input),
            output: payload(output),
            error: None,
        }
    }

    fn two_tools(strict: bool) -> ToolMocker {
        ToolMocker::new(
            vec![
                tool(0, "t1", json!({"x": 1}), json!({"y": 2})),
                tool(1, "t2", json!({"x": 3}), json!({"y": 4})),
            ],
            strict,
        )
    }

    #[test]
    fn outputs_are_served_in_recorded_order_then_exhausted() {
        let mut mocker = two_tools(false);
        assert_eq!(
            mocker.next_output("t1", &payload(json!({"x": 1}))).expect("t1"),
            payload(json!({"y": 2}))
        );
        assert_eq!(mocker.remaining(), 1);
        assert_eq!(
            mocker.next_output("t2", &payload(json!({"x": 3}))).expect("t2"),
            payload(json!({"y": 4}))
        );
        assert!(mocker.is_exhausted());
        assert!(matches!(
            mocker.next_output("t3", &Payload::new()),
            Err(TraceError::ReplayExhausted { recorded: 2 })
        ));
    }

    #[test]
    fn name_mismatch_reports_cursor_and_consumes_the_step() {
        let mut mocker = two_tools(false);
        let err = mocker
            .next_output("t2", &payload(json!({"x": 3})))
            .expect_err("t1 expected first");
        assert_eq!(err.to_string(), "tool name mismatch at replay cursor 0: t1 != t2");
        assert_eq!(mocker.consumed(), 1);
    }

    #[test]
    fn lenient_mode_ignores_input_changes() {
        let mut mocker = two_tools(false);
        assert!(mocker.next_output("t1", &payload(json!({"x": 99}))).is_ok());
    }

    #[test]
    fn strict_mode_compares_inputs_by_stable_serialization() {
        let mut mocker = ToolMocker::new(
            vec![tool(0, "t1", json!({"a": 1, "b": {"c": 2, "d": 3}}), json!({"ok": true}))],
            true,
        );
        assert!(mocker
            .next_output("t1", &payload(json!({"b": {"d": 3, "c": 2}, "a": 1})))
            .is_ok());

        let mut mocker = two_tools(true);
        assert!(matches!(
            mocker.next_output("t1", &payload(json!({"x": 2}))),
            Err(TraceError::ToolInputMismatch { cursor: 0, name }) if name == "t1"
        ));
    }

    #[test]
    fn recorded_error_steps_still_return_their_output() {
        let mut step = tool(0, "fetch", json!({}), json!({"partial": true}));
        step.error = Some(payload(json!({"message": "timeout"})));
        let mut mocker = ToolMocker::new(vec![step], true);
        assert_eq!(
            mocker.next_output("fetch", &Payload::new()).expect("fetch"),
            payload(json!({"partial": true}))
        );
    }
}
