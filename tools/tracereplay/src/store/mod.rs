//! Durable keyed storage for runs and their ordered steps.
//!
//! Steps are append-only; a run's only mutable field is its end time. Callers
//! depend on [`TraceStore`] and never on a concrete backend.

pub mod memory;
pub mod sqlite;

use crate::errors::TraceError;
use crate::types::{NewStep, Payload, Run, Step};
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, TraceError>;

pub const DEFAULT_LIST_LIMIT: usize = 20;

pub trait TraceStore: Send + Sync {
    /// Idempotent schema setup.
    fn init(&self) -> StoreResult<()>;

    fn create_run(&self, name: &str, started_at: DateTime<Utc>, meta: &Payload)
        -> StoreResult<String>;

    /// Fails with `RunNotFound` when `run_id` does not exist.
    fn end_run(&self, run_id: &str, ended_at: DateTime<Utc>) -> StoreResult<()>;

    fn add_step(&self, run_id: &str, step: &NewStep) -> StoreResult<String>;

    fn get_run(&self, run_id: &str) -> StoreResult<Run>;

    /// Most recently started first.
    fn list_runs(&self, limit: usize) -> StoreResult<Vec<Run>>;

    /// Ascending `idx`.
    fn list_steps(&self, run_id: &str) -> StoreResult<Vec<Step>>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
