//! Trace replay: integrity checking of a recorded run and deterministic
//! substitution of tool results.
//!
//! A replay does not re-execute the agent. The [`Replayer`] verifies that a
//! stored run has a gap-free step sequence, and a [`ToolMocker`] hands the
//! recorded tool outputs back to a re-running agent in their original order so
//! that external side effects never happen twice.

pub mod mocker;
pub mod replayer;

pub use mocker::ToolMocker;
pub use replayer::{ReplayReport, Replayer};
