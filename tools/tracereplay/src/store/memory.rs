use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{new_id, StoreResult, TraceStore};
use crate::errors::TraceError;
use crate::types::{NewStep, Payload, Run, Step};

#[derive(Default)]
struct MemoryState {
    runs: Vec<Run>,
    steps: Vec<Step>,
}

/// In-process store for tests and embedding; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| TraceError::Database("memory store lock poisoned".to_string()))
    }
}

impl TraceStore for MemoryStore {
    fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    fn create_run(
        &self,
        name: &str,
        started_at: DateTime<Utc>,
        meta: &Payload,
    ) -> StoreResult<String> {
        let run = Run {
            id: new_id(),
            name: name.to_string(),
            started_at,
            ended_at: None,
            meta: meta.clone(),
        };
        let run_id = run.id.clone();
        self.state()?.runs.push(run);
        Ok(run_id)
    }

    fn end_run(&self, run_id: &str, ended_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state()?;
        let run = state
            .runs
            .iter_mut()
            .find(|run| run.id == run_id)
            .ok_or_else(|| TraceError::RunNotFound(run_id.to_string()))?;
        run.ended_at = Some(ended_at);
        Ok(())
    }

    fn add_step(&self, run_id: &str, step: &NewStep) -> StoreResult<String> {
        let step_id = new_id();
        self.state()?.steps.push(Step {
            id: step_id.clone(),
            run_id: run_id.to_string(),
            idx: step.idx,
            kind: step.kind,
            name: step.name.clone(),
            ts: step.ts,
            input: step.input.clone(),
            output: step.output.clone(),
            error: step.error.clone(),
        });
        Ok(step_id)
    }

    fn get_run(&self, run_id: &str) -> StoreResult<Run> {
        self.state()?
            .runs
            .iter()
            .find(|run| run.id == run_id)
            .cloned()
            .ok_or_else(|| TraceError::RunNotFound(run_id.to_string()))
    }

    fn list_runs(&self, limit: usize) -> StoreResult<Vec<Run>> {
        let mut runs = self.state()?.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    fn list_steps(&self, run_id: &str) -> StoreResult<Vec<Step>> {
        let mut steps = self
            .state()?
            .steps
            .iter()
            .filter(|step| step.run_id == run_id)
            .cloned()
            .collect::<Vec<_>>();
        // Stable: equal indices keep insertion order.
        steps.sort_by_key(|step| step.idx);
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::contract;

    #[test]
    fn create_get_and_end_run() {
        contract::create_get_and_end_run(&MemoryStore::new());
    }

    #[test]
    fn unknown_runs_are_not_found() {
        contract::unknown_runs_are_not_found(&MemoryStore::new());
    }

    #[test]
    fn steps_come_back_in_idx_order() {
        contract::steps_come_back_in_idx_order(&MemoryStore::new());
    }

    #[test]
    fn runs_listed_newest_first() {
        contract::runs_listed_newest_first(&MemoryStore::new());
    }
}
