//! Turns a live agent execution into an ordered, durable step sequence.
//!
//! A `Recorder` owns at most one active run. Steps are numbered from 0 in
//! emission order and written to the store before the recording call returns.

use crate::config::{RecorderConfig, TraceConfig};
use crate::errors::TraceError;
use crate::logging::append_run_log;
use crate::redact::{Redactor, SecretKeyRedactor};
use crate::runtime::{Clock, ProductionClock};
use crate::store::{SqliteStore, TraceStore};
use crate::types::{NewStep, Payload, StepKind};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOptions {
    /// Stamped into every run's `meta.project`.
    pub project: String,
    pub redaction: bool,
    /// Extra keys redacted on top of the default secret key list.
    pub secret_keys: Vec<String>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            redaction: true,
            secret_keys: Vec::new(),
        }
    }
}

impl From<&RecorderConfig> for RecorderOptions {
    fn from(cfg: &RecorderConfig) -> Self {
        Self {
            project: cfg.project.clone(),
            redaction: cfg.redaction,
            secret_keys: cfg.secret_keys.clone(),
        }
    }
}

/// Run `meta` key recording whether step payloads went through a redactor.
pub const REDACTION_META_KEY: &str = "redaction";

#[derive(Debug, Clone, PartialEq)]
pub struct RunHandle {
    pub id: String,
    pub name: String,
    pub meta: Payload,
}

struct ActiveRun {
    handle: RunHandle,
    next_idx: i64,
}

pub struct Recorder {
    store: Arc<dyn TraceStore>,
    clock: Arc<dyn Clock>,
    project: String,
    redactor: Option<Box<dyn Redactor>>,
    active: Option<ActiveRun>,
}

impl Recorder {
    pub fn new(store: Arc<dyn TraceStore>, options: RecorderOptions) -> Result<Self, TraceError> {
        store.init()?;
        let recorder = Self {
            store,
            clock: Arc::new(ProductionClock),
            project: options.project,
            redactor: None,
            active: None,
        };
        Ok(if options.redaction {
            recorder.with_redactor(Box::new(SecretKeyRedactor::new(&options.secret_keys)))
        } else {
            recorder
        })
    }

    /// Recorder over the configured SQLite database, with `[recorder]`
    /// settings applied.
    pub fn open(cfg: &TraceConfig) -> Result<Self, TraceError> {
        let store = Arc::new(SqliteStore::open(&cfg.store.db_path)?);
        Self::new(store, RecorderOptions::from(&cfg.recorder))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the payload filter; this also turns redaction on.
    pub fn with_redactor(mut self, redactor: Box<dyn Redactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    pub fn active_run(&self) -> Option<&RunHandle> {
        self.active.as_ref().map(|active| &active.handle)
    }

    /// Open a run. Fails with a state error while another run is active.
    pub fn begin_run(&mut self, name: &str, meta: Payload) -> Result<RunHandle, TraceError> {
        if let Some(active) = &self.active {
            return Err(TraceError::State(format!(
                "nested runs are not supported: run {} is still active",
                active.handle.id
            )));
        }

        let mut merged = Payload::new();
        merged.insert("project".to_string(), Value::String(self.project.clone()));
        merged.extend(meta);
        merged.insert(
            REDACTION_META_KEY.to_string(),
            Value::Bool(self.redactor.is_some()),
        );

        let run_id = self.store.create_run(name, self.clock.now(), &merged)?;
        let handle = RunHandle {
            id: run_id,
            name: name.to_string(),
            meta: merged,
        };
        append_run_log(
            "info",
            "recorder.run.started",
            json!({ "run_id": handle.id, "name": handle.name, "project": self.project }),
        );
        self.active = Some(ActiveRun {
            handle: handle.clone(),
            next_idx: 0,
        });
        Ok(handle)
    }

    /// Close the active run and record its end time. The recorder is idle
    /// afterwards even when the store write fails.
    pub fn end_run(&mut self) -> Result<RunHandle, TraceError> {
        let active = self.active.take().ok_or_else(|| {
            TraceError::State("no active run to end".to_string())
        })?;
        self.store.end_run(&active.handle.id, self.clock.now())?;
        append_run_log(
            "info",
            "recorder.run.closed",
            json!({ "run_id": active.handle.id, "steps": active.next_idx }),
        );
        Ok(active.handle)
    }

    /// Scoped session: opens a run, hands it to `body`, and closes it on every
    /// exit path including errors and panics. An error from `body` wins over
    /// an error from closing.
    pub fn run<T, E, F>(&mut self, name: &str, meta: Payload, body: F) -> Result<T, E>
    where
        E: From<TraceError>,
        F: FnOnce(&mut Recorder, &RunHandle) -> Result<T, E>,
    {
        let handle = self.begin_run(name, meta)?;
        let mut guard = CloseOnDrop {
            recorder: self,
            run_id: handle.id.clone(),
            armed: true,
        };
        let outcome = body(&mut *guard.recorder, &handle);
        guard.armed = false;
        let closed = guard.recorder.close_if_active(&handle.id);

        match (outcome, closed) {
            (Err(error), closed) => {
                if let Err(close_error) = closed {
                    append_run_log(
                        "error",
                        "recorder.run.close_failed",
                        json!({ "run_id": handle.id, "error": close_error.to_string() }),
                    );
                }
                Err(error)
            }
            (Ok(_), Err(close_error)) => Err(close_error.into()),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    pub fn span(
        &mut self,
        name: &str,
        input: Option<Payload>,
        output: Option<Payload>,
    ) -> Result<String, TraceError> {
        self.record(
            StepKind::Span,
            name,
            input.unwrap_or_default(),
            output.unwrap_or_default(),
            None,
        )
    }

    pub fn llm(
        &mut self,
        name: &str,
        input: Payload,
        output: Payload,
        error: Option<Payload>,
    ) -> Result<String, TraceError> {
        self.record(StepKind::Llm, name, input, output, error)
    }

    pub fn tool(
        &mut self,
        name: &str,
        input: Payload,
        output: Payload,
        error: Option<Payload>,
    ) -> Result<String, TraceError> {
        self.record(StepKind::Tool, name, input, output, error)
    }

    fn record(
        &mut self,
        kind: StepKind,
        name: &str,
        input: Payload,
        output: Payload,
        error: Option<Payload>,
    ) -> Result<String, TraceError> {
        let (input, output, error) = match &self.redactor {
            Some(redactor) => (
                redactor.redact(input),
                redactor.redact(output),
                error.map(|error| redactor.redact(error)),
            ),
            None => (input, output, error),
        };
        let ts = self.clock.now();
        let active = self.active.as_mut().ok_or_else(|| {
            TraceError::State(format!(
                "no active run: call begin_run or run before recording {kind} step {name}"
            ))
        })?;

        let step = NewStep {
            idx: active.next_idx,
            kind,
            name: name.to_string(),
            ts,
            input,
            output,
            error,
        };
        let step_id = self.store.add_step(&active.handle.id, &step)?;
        // Only a persisted step consumes an index, keeping the sequence gap-free.
        active.next_idx += 1;
        append_run_log(
            "debug",
            "recorder.step.recorded",
            json!({
                "run_id": active.handle.id,
                "step_id": step_id,
                "idx": step.idx,
                "kind": kind.as_str(),
                "name": name,
                "failed": step.error.is_some(),
            }),
        );
        Ok(step_id)
    }

    fn close_if_active(&mut self, run_id: &str) -> Result<(), TraceError> {
        match &self.active {
            Some(active) if active.handle.id == run_id => self.end_run().map(|_| ()),
            _ => Ok(()),
        }
    }
}

struct CloseOnDrop<'a> {
    recorder: &'a mut Recorder,
    run_id: String,
    armed: bool,
}

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(error) = self.recorder.close_if_active(&self.run_id) {
            append_run_log(
                "error",
                "recorder.run.close_failed",
                json!({ "run_id": self.run_id, "error": error.to_string() }),
            );
        }
    }
}
