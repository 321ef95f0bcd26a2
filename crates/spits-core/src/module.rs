//! The opaque computation module ABI (§6.3): a pluggable loader exposing
//! `job_manager_new/next_task/finalize`, `worker_new/run/finalize`, and
//! `committer_new/commit_pit/commit_job/finalize`. Out of scope per §1 —
//! this module only defines the boundary the JM/TM core calls across.
//!
//! Two implementations ship: [`static_module::EchoModule`], a compile-time
//! linked module used by every test in this workspace, and
//! [`dynamic::DynamicModule`], a `libloading`-backed loader for a real
//! deployment's shared-library modules.

use crate::error::{ContextMismatchError, ModuleError, ModuleStatusError};

/// Context handed to the module alongside `jobid` on construction.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub jobid: String,
    pub run_id: i64,
}

/// Result of one `next_task` call.
pub enum NextTaskOutcome {
    /// A task was generated; `ctx` must equal the `next_id` the caller
    /// supplied or the caller raises `ContextMismatchError`.
    Task { bytes: Vec<u8>, ctx: i64 },
    /// The module signalled end of generation (status 0).
    NoMoreTasks,
}

/// Result of one `worker_run` call.
pub struct TaskOutcome {
    pub status: i64,
    /// `None` corresponds to the module returning no answer
    /// (`res_module_noans`); the caller logs and drops the task.
    pub bytes: Option<Vec<u8>>,
    pub ctx: i64,
}

/// Result of the final `commit_job` call.
pub struct JobOutcome {
    pub status: i64,
    pub bytes: Option<Vec<u8>>,
    pub ctx: i64,
}

/// Per-run JM-side module state.
pub trait JmState: Send {
    fn next_task(&mut self, next_id: i64) -> Result<NextTaskOutcome, ModuleError>;
    fn finalize(&mut self) {}
}

/// Per-worker-thread TM-side module state.
pub trait WorkerState: Send {
    fn run(&mut self, task_bytes: &[u8], ctx: i64) -> Result<TaskOutcome, ModuleError>;
    fn finalize(&mut self) {}
}

/// Per-run committer-side module state.
pub trait CommitterState: Send {
    fn commit_pit(&mut self, result_bytes: &[u8]) -> Result<i64, ModuleError>;
    fn commit_job(&mut self, ctx: i64) -> Result<JobOutcome, ModuleError>;
    fn finalize(&mut self) {}
}

/// The loaded computation module: a factory for the three state kinds.
pub trait Module: Send + Sync {
    fn job_manager_new(
        &self,
        argv: &[String],
        jobinfo: &JobInfo,
    ) -> Result<Box<dyn JmState>, ModuleError>;

    fn worker_new(&self, argv: &[String]) -> Result<Box<dyn WorkerState>, ModuleError>;

    fn committer_new(
        &self,
        argv: &[String],
        jobinfo: &JobInfo,
    ) -> Result<Box<dyn CommitterState>, ModuleError>;
}

/// Verify an echoed context against the expected value, surfacing
/// `ContextMismatchError` on mismatch. Called by the pusher after
/// `next_task`, by the TM worker loop after `run`, and by the orchestrator
/// after `commit_job` — the one place §6.3's "all echoed_ctx values MUST
/// match" rule is enforced.
pub fn check_ctx(expected: i64, echoed: i64) -> Result<(), ModuleError> {
    ContextMismatchError::check(expected, echoed).map_err(ModuleError::from)
}

pub fn status_ok(status: i64, detail: impl Into<String>) -> Result<(), ModuleError> {
    if status == 0 {
        Ok(())
    } else {
        Err(ModuleError::from(ModuleStatusError {
            status,
            detail: detail.into(),
        }))
    }
}

pub mod static_module;

pub mod dynamic;
