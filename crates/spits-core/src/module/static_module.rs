//! A compile-time linked module, satisfying §9's "compile-time statically
//! linked module for tests" requirement without the `unsafe` FFI surface of
//! [`super::dynamic`]. Generates a fixed number of identical tasks, a
//! worker that echoes its input, and a committer that counts commits.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{
    CommitterState, JmState, JobInfo, JobOutcome, Module, NextTaskOutcome, TaskOutcome,
    WorkerState,
};
use crate::error::ModuleError;

/// Echoes `payload` back as the result of every task, `task_count` times.
#[derive(Clone)]
pub struct EchoModule {
    task_count: i64,
    payload: Vec<u8>,
    commits: Arc<AtomicI64>,
}

impl EchoModule {
    pub fn new(task_count: i64, payload: Vec<u8>) -> Self {
        Self {
            task_count,
            payload,
            commits: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Number of `commit_pit` calls observed so far across all committer
    /// instances produced by this module (there is one committer per run).
    pub fn commit_count(&self) -> i64 {
        self.commits.load(Ordering::SeqCst)
    }
}

impl Module for EchoModule {
    fn job_manager_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn JmState>, ModuleError> {
        Ok(Box::new(EchoJmState {
            generated: 0,
            total: self.task_count,
            payload: self.payload.clone(),
        }))
    }

    fn worker_new(&self, _argv: &[String]) -> Result<Box<dyn WorkerState>, ModuleError> {
        Ok(Box::new(EchoWorker))
    }

    fn committer_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn CommitterState>, ModuleError> {
        Ok(Box::new(EchoCommitter {
            commits: self.commits.clone(),
            seen: 0,
        }))
    }
}

struct EchoJmState {
    generated: i64,
    total: i64,
    payload: Vec<u8>,
}

impl JmState for EchoJmState {
    fn next_task(&mut self, next_id: i64) -> Result<NextTaskOutcome, ModuleError> {
        if self.generated >= self.total {
            return Ok(NextTaskOutcome::NoMoreTasks);
        }
        self.generated += 1;
        Ok(NextTaskOutcome::Task {
            bytes: self.payload.clone(),
            ctx: next_id,
        })
    }
}

struct EchoWorker;

impl WorkerState for EchoWorker {
    fn run(&mut self, task_bytes: &[u8], ctx: i64) -> Result<TaskOutcome, ModuleError> {
        Ok(TaskOutcome {
            status: 0,
            bytes: Some(task_bytes.to_vec()),
            ctx,
        })
    }
}

struct EchoCommitter {
    commits: Arc<AtomicI64>,
    seen: i64,
}

impl CommitterState for EchoCommitter {
    fn commit_pit(&mut self, _result_bytes: &[u8]) -> Result<i64, ModuleError> {
        self.seen += 1;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn commit_job(&mut self, ctx: i64) -> Result<JobOutcome, ModuleError> {
        Ok(JobOutcome {
            status: 0,
            bytes: Some(self.seen.to_string().into_bytes()),
            ctx,
        })
    }
}

/// A module whose `next_task` always echoes `ctx + 1`, used to exercise the
/// context-mismatch path (spec §8 scenario 5).
pub struct FaultyCtxModule;

impl Module for FaultyCtxModule {
    fn job_manager_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn JmState>, ModuleError> {
        Ok(Box::new(FaultyJmState))
    }

    fn worker_new(&self, _argv: &[String]) -> Result<Box<dyn WorkerState>, ModuleError> {
        Ok(Box::new(EchoWorker))
    }

    fn committer_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn CommitterState>, ModuleError> {
        Ok(Box::new(EchoCommitter {
            commits: Arc::new(AtomicI64::new(0)),
            seen: 0,
        }))
    }
}

struct FaultyJmState;

impl JmState for FaultyJmState {
    fn next_task(&mut self, next_id: i64) -> Result<NextTaskOutcome, ModuleError> {
        Ok(NextTaskOutcome::Task {
            bytes: b"bad".to_vec(),
            ctx: next_id + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_exactly_task_count_tasks() {
        let module = EchoModule::new(3, b"hi".to_vec());
        let jobinfo = JobInfo {
            jobid: "j".into(),
            run_id: 1,
        };
        let mut state = module.job_manager_new(&[], &jobinfo).unwrap();

        for id in 1..=3 {
            match state.next_task(id).unwrap() {
                NextTaskOutcome::Task { ctx, bytes } => {
                    assert_eq!(ctx, id);
                    assert_eq!(bytes, b"hi");
                }
                NextTaskOutcome::NoMoreTasks => panic!("expected a task at id {id}"),
            }
        }
        assert!(matches!(
            state.next_task(4).unwrap(),
            NextTaskOutcome::NoMoreTasks
        ));
    }

    #[test]
    fn worker_echoes_input() {
        let module = EchoModule::new(1, b"hi".to_vec());
        let mut worker = module.worker_new(&[]).unwrap();
        let outcome = worker.run(b"payload", 42).unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.bytes.unwrap(), b"payload");
        assert_eq!(outcome.ctx, 42);
    }

    #[test]
    fn committer_counts_commits() {
        let module = EchoModule::new(1, b"hi".to_vec());
        let jobinfo = JobInfo {
            jobid: "j".into(),
            run_id: 1,
        };
        let mut committer = module.committer_new(&[], &jobinfo).unwrap();
        committer.commit_pit(b"r1").unwrap();
        committer.commit_pit(b"r2").unwrap();
        assert_eq!(module.commit_count(), 2);
        let outcome = committer.commit_job(0x12345678).unwrap();
        assert_eq!(outcome.ctx, 0x12345678);
        assert_eq!(outcome.bytes.unwrap(), b"2");
    }
}
