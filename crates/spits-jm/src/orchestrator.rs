//! Run orchestrator (spec §4.5.3/§4.7): drives one run ordinal to
//! completion — fresh state, spawn pusher+committer, commit the job, return
//! the module's final status and bytes.
//!
//! The module ABI this workspace exposes (§6.3) has no "request another run"
//! hook, so unlike the original's `spits_main` callback loop this
//! orchestrator drives exactly one run ordinal per process invocation; the
//! decision is recorded in `DESIGN.md`.

use std::sync::Arc;

use spits_core::module::{check_ctx, JobInfo, Module};
use tracing::info;

use crate::error::JmError;
use crate::scheduler::{run_committer, run_pusher, SchedulerConfig, SchedulerState};

/// A single run ordinal's outcome, handed back to whatever drove this run.
pub struct RunOutcome {
    pub status: i64,
    pub result_bytes: Option<Vec<u8>>,
}

pub struct Orchestrator {
    module: Arc<dyn Module>,
    module_args: Vec<String>,
    config: SchedulerConfig,
}

impl Orchestrator {
    pub fn new(module: Arc<dyn Module>, module_args: Vec<String>, config: SchedulerConfig) -> Self {
        Self {
            module,
            module_args,
            config,
        }
    }

    /// Runs one run ordinal end to end (spec §4.5.3 steps 1-6).
    pub async fn run(&self, run_id: i64) -> Result<RunOutcome, JmError> {
        let jobinfo = JobInfo {
            jobid: self.config.jobid.clone(),
            run_id,
        };

        // Step 1: fresh pending/completed, generation_done=false.
        let state = Arc::new(SchedulerState::new(run_id));

        // Step 2: build JM state and committer state.
        let jm_state = self.module.job_manager_new(&self.module_args, &jobinfo)?;
        let mut committer_state = self.module.committer_new(&self.module_args, &jobinfo)?;

        // Step 3: spawn pusher and committer, await both. If either errors
        // first (e.g. the pusher hits a `ContextMismatchError`), the other
        // would otherwise spin forever waiting on `generation_done`/pending
        // to drain — abort it rather than leak the task.
        let pusher_state = Arc::clone(&state);
        let pusher_config = self.config.clone();
        // `run_pusher` hands `jm_state` back on success so the orchestrator
        // can still finalize it in step 5.
        let mut pusher = tokio::spawn(async move { run_pusher(pusher_state, jm_state, pusher_config).await });

        let committer_run_state = Arc::clone(&state);
        let committer_config = self.config.clone();
        // `run_committer` hands the state back on success so the
        // orchestrator can still call `commit_job` on it in step 4.
        let mut committer = tokio::spawn(async move {
            run_committer(committer_run_state, committer_state, committer_config).await
        });

        let (mut jm_state, mut committer_state) = tokio::select! {
            result = &mut pusher => {
                let pusher_result = result.map_err(|e| JmError::Fatal(format!("pusher task panicked: {e}")))?;
                let jm_state = match pusher_result {
                    Ok(jm_state) => jm_state,
                    Err(e) => {
                        committer.abort();
                        return Err(e);
                    }
                };
                let committer_state = committer
                    .await
                    .map_err(|e| JmError::Fatal(format!("committer task panicked: {e}")))??;
                (jm_state, committer_state)
            }
            result = &mut committer => {
                let committer_result = result.map_err(|e| JmError::Fatal(format!("committer task panicked: {e}")))?;
                match committer_result {
                    Err(e) => {
                        pusher.abort();
                        return Err(e);
                    }
                    Ok(committer_state) => {
                        let jm_state = pusher
                            .await
                            .map_err(|e| JmError::Fatal(format!("pusher task panicked: {e}")))??;
                        (jm_state, committer_state)
                    }
                }
            }
        };

        // Step 4: commit the job.
        let outcome = committer_state.commit_job(0x12345678)?;
        check_ctx(0x12345678, outcome.ctx)?;

        // Step 5: finalize every module state the run touched.
        jm_state.finalize();
        committer_state.finalize();

        info!(run_id, status = outcome.status, "run ordinal complete");

        // Step 6: hand back the final status and bytes.
        Ok(RunOutcome {
            status: outcome.status,
            result_bytes: outcome.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spits_core::module::static_module::EchoModule;
    use spits_tm::pool::TaskPool;
    use spits_tm::server::{ServerConfig, TmServer};
    use std::fs;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Brings up a real TM (pool + server) bound to loopback, registers it
    /// via a `nodes.txt`, and drives one full orchestrator run against it —
    /// exercising push, worker execution, pull, and commit end to end (spec
    /// §8 scenario 1: single TM, N tasks, all committed).
    #[tokio::test]
    async fn single_tm_run_commits_every_task() {
        let module: Arc<dyn Module> = Arc::new(EchoModule::new(5, b"payload".to_vec()));

        let pool = Arc::new(TaskPool::new(2, 0));
        pool.start(Arc::clone(&module), vec![]);
        let server_config = ServerConfig {
            jobid: "j".into(),
            recv_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
        };
        let tm = Arc::new(TmServer::new(pool, server_config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(Arc::clone(&tm).serve_tcp(listener));

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nodes.txt"), format!("node 127.0.0.1:{port}\n")).unwrap();

        let config = SchedulerConfig {
            registry_dir: dir.path().to_path_buf(),
            jobid: "j".into(),
            connect_timeout: Duration::from_millis(500),
            recv_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            send_backoff: Duration::from_millis(20),
            recv_backoff: Duration::from_millis(20),
        };
        let orchestrator = Orchestrator::new(module, vec![], config);
        let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(1))
            .await
            .expect("run should complete against a live TM")
            .unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.result_bytes.unwrap(), b"5");
    }
}
