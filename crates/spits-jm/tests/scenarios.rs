//! Integration coverage for the concrete scenarios catalogued for this
//! system: backpressure, a late-joining TM, and a module context mismatch.
//! Each test brings up one or more real `spits_tm` servers over loopback
//! TCP and drives them with the real pusher/committer/orchestrator code.
//!
//! The terminate-verb scenario is not exercised here: the TM's handler
//! calls `std::process::exit(0)` on that verb by protocol requirement,
//! which would take the test binary down with it.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spits_core::error::ModuleStatusError;
use spits_core::module::static_module::{EchoModule, FaultyCtxModule};
use spits_core::module::{
    CommitterState, JobInfo, JobOutcome, JmState, Module, NextTaskOutcome, TaskOutcome,
    WorkerState,
};
use spits_core::ModuleError;
use spits_jm::orchestrator::Orchestrator;
use spits_jm::scheduler::SchedulerConfig;
use spits_jm::JmError;
use spits_tm::pool::TaskPool;
use spits_tm::server::{ServerConfig, TmServer};
use tokio::net::TcpListener;

async fn spawn_tm(module: Arc<dyn Module>, max_threads: usize, overfill: usize) -> u16 {
    let pool = Arc::new(TaskPool::new(max_threads, overfill));
    pool.start(module, vec![]);
    let server_config = ServerConfig {
        jobid: "j".into(),
        recv_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(120),
    };
    let tm = Arc::new(TmServer::new(pool, server_config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(Arc::clone(&tm).serve_tcp(listener));
    port
}

fn scheduler_config(registry_dir: std::path::PathBuf) -> SchedulerConfig {
    SchedulerConfig {
        registry_dir,
        jobid: "j".into(),
        connect_timeout: Duration::from_millis(300),
        recv_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        send_backoff: Duration::from_millis(15),
        recv_backoff: Duration::from_millis(15),
    }
}

/// A worker that sleeps before echoing, to force `send_full` under a small
/// pool (spec §8 scenario 3).
struct SlowEchoModule {
    task_count: i64,
    sleep: Duration,
    commits: Arc<AtomicI64>,
}

impl Module for SlowEchoModule {
    fn job_manager_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn JmState>, ModuleError> {
        Ok(Box::new(CountingJmState {
            generated: 0,
            total: self.task_count,
        }))
    }

    fn worker_new(&self, _argv: &[String]) -> Result<Box<dyn WorkerState>, ModuleError> {
        Ok(Box::new(SlowWorker { sleep: self.sleep }))
    }

    fn committer_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn CommitterState>, ModuleError> {
        Ok(Box::new(CountingCommitter {
            commits: self.commits.clone(),
        }))
    }
}

struct CountingJmState {
    generated: i64,
    total: i64,
}

impl JmState for CountingJmState {
    fn next_task(&mut self, next_id: i64) -> Result<NextTaskOutcome, ModuleError> {
        if self.generated >= self.total {
            return Ok(NextTaskOutcome::NoMoreTasks);
        }
        self.generated += 1;
        Ok(NextTaskOutcome::Task {
            bytes: vec![],
            ctx: next_id,
        })
    }
}

struct SlowWorker {
    sleep: Duration,
}

impl WorkerState for SlowWorker {
    fn run(&mut self, _task_bytes: &[u8], ctx: i64) -> Result<TaskOutcome, ModuleError> {
        std::thread::sleep(self.sleep);
        Ok(TaskOutcome {
            status: 0,
            bytes: Some(vec![]),
            ctx,
        })
    }
}

struct CountingCommitter {
    commits: Arc<AtomicI64>,
}

impl CommitterState for CountingCommitter {
    fn commit_pit(&mut self, _result_bytes: &[u8]) -> Result<i64, ModuleError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn commit_job(&mut self, ctx: i64) -> Result<JobOutcome, ModuleError> {
        Ok(JobOutcome {
            status: 0,
            bytes: Some(self.commits.load(Ordering::SeqCst).to_string().into_bytes()),
            ctx,
        })
    }
}

/// Scenario 3: `max_threads=2, overfill=0`, a slow worker, 30 tasks pushed.
/// The pool fills repeatedly but every task still ends up committed.
#[tokio::test]
async fn tm_full_backpressure_still_commits_every_task() {
    let commits = Arc::new(AtomicI64::new(0));
    let module: Arc<dyn Module> = Arc::new(SlowEchoModule {
        task_count: 30,
        sleep: Duration::from_millis(40),
        commits: commits.clone(),
    });
    let port = spawn_tm(Arc::clone(&module), 2, 0).await;

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("nodes.txt"), format!("node 127.0.0.1:{port}\n")).unwrap();

    let orchestrator = Orchestrator::new(module, vec![], scheduler_config(dir.path().to_path_buf()));
    let outcome = tokio::time::timeout(Duration::from_secs(20), orchestrator.run(1))
        .await
        .expect("run should complete despite repeated send_full")
        .unwrap();

    assert_eq!(outcome.status, 0);
    assert_eq!(commits.load(Ordering::SeqCst), 30);
}

/// Scenario 4: the JM starts against an empty registry; a TM announces
/// itself partway through the run. No tasks are lost.
#[tokio::test]
async fn late_joining_tm_still_receives_all_tasks() {
    let module: Arc<dyn Module> = Arc::new(EchoModule::new(8, b"hi".to_vec()));
    let port = spawn_tm(Arc::clone(&module), 2, 0).await;

    let dir = tempfile::tempdir().unwrap();
    // No nodes.txt yet — the registry starts empty.

    let registry_dir = dir.path().to_path_buf();
    let announce_dir = registry_dir.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        fs::write(
            announce_dir.join("nodes.txt"),
            format!("node 127.0.0.1:{port}\n"),
        )
        .unwrap();
    });

    let orchestrator = Orchestrator::new(module, vec![], scheduler_config(registry_dir));
    let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(1))
        .await
        .expect("run should complete once the TM announces itself")
        .unwrap();

    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.result_bytes.unwrap(), b"8");
}

/// Scenario 5: the module's `next_task` echoes `ctx + 1` instead of `ctx`.
/// The pusher must abort with `ContextMismatchError` rather than push a
/// mistagged task.
#[tokio::test]
async fn context_mismatch_aborts_the_run() {
    let module: Arc<dyn Module> = Arc::new(FaultyCtxModule);
    let port = spawn_tm(Arc::clone(&module), 1, 0).await;

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("nodes.txt"), format!("node 127.0.0.1:{port}\n")).unwrap();

    let orchestrator = Orchestrator::new(module, vec![], scheduler_config(dir.path().to_path_buf()));
    let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(1))
        .await
        .expect("the pusher should abort quickly rather than hang");

    match result {
        Err(JmError::Module(ModuleError::ContextMismatch(e))) => {
            assert_eq!(e.expected, 1);
            assert_eq!(e.echoed, 2);
        }
        other => panic!("expected a ContextMismatchError, got {other:?}"),
    }
}

/// A module whose worker fails the first delivery of a chosen set of task
/// ids (modelling a TM that crashed before producing a result) and
/// succeeds on redelivery. Shared across both TM pools and the JM's own
/// driving role, so the failure is observed regardless of which TM a given
/// attempt lands on.
struct FlakyModule {
    task_count: i64,
    doomed: Arc<HashSet<i64>>,
    attempts: Arc<Mutex<HashMap<i64, u32>>>,
    commits: Arc<AtomicI64>,
}

impl Module for FlakyModule {
    fn job_manager_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn JmState>, ModuleError> {
        Ok(Box::new(CountingJmState {
            generated: 0,
            total: self.task_count,
        }))
    }

    fn worker_new(&self, _argv: &[String]) -> Result<Box<dyn WorkerState>, ModuleError> {
        Ok(Box::new(FlakyWorker {
            doomed: self.doomed.clone(),
            attempts: self.attempts.clone(),
        }))
    }

    fn committer_new(
        &self,
        _argv: &[String],
        _jobinfo: &JobInfo,
    ) -> Result<Box<dyn CommitterState>, ModuleError> {
        Ok(Box::new(CountingCommitter {
            commits: self.commits.clone(),
        }))
    }
}

struct FlakyWorker {
    doomed: Arc<HashSet<i64>>,
    attempts: Arc<Mutex<HashMap<i64, u32>>>,
}

impl WorkerState for FlakyWorker {
    fn run(&mut self, _task_bytes: &[u8], ctx: i64) -> Result<TaskOutcome, ModuleError> {
        if self.doomed.contains(&ctx) {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(ctx).or_insert(0);
            *count += 1;
            if *count == 1 {
                return Err(ModuleStatusError {
                    status: 1,
                    detail: "simulated crash before producing a result".into(),
                }
                .into());
            }
        }
        Ok(TaskOutcome {
            status: 0,
            bytes: Some(vec![]),
            ctx,
        })
    }
}

/// Scenario 2 (approximated): 20 tasks across two TMs; three task ids fail
/// on their first delivery and only succeed once the pusher's resubmission
/// path redelivers them after generation finishes. Expected: all 20 ids are
/// still committed exactly once each.
#[tokio::test]
async fn crashed_delivery_is_resubmitted_and_eventually_commits() {
    let doomed: Arc<HashSet<i64>> = Arc::new([5, 9, 14].into_iter().collect());
    let commits = Arc::new(AtomicI64::new(0));
    let module: Arc<dyn Module> = Arc::new(FlakyModule {
        task_count: 20,
        doomed,
        attempts: Arc::new(Mutex::new(HashMap::new())),
        commits: commits.clone(),
    });

    let port_a = spawn_tm(Arc::clone(&module), 2, 0).await;
    let port_b = spawn_tm(Arc::clone(&module), 2, 0).await;

    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("nodes.txt"),
        format!("node 127.0.0.1:{port_a}\nnode 127.0.0.1:{port_b}\n"),
    )
    .unwrap();

    let orchestrator = Orchestrator::new(module, vec![], scheduler_config(dir.path().to_path_buf()));
    let outcome = tokio::time::timeout(Duration::from_secs(20), orchestrator.run(1))
        .await
        .expect("run should complete once the doomed ids are resubmitted")
        .unwrap();

    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.result_bytes.unwrap(), b"20");
}
