//! JM scheduler (spec §4.5): the pusher and committer loops, sharing the
//! pending/completed maps under one mutex each ("avoid holding both
//! simultaneously", §9).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use spits_core::module::{check_ctx, CommitterState, JmState, NextTaskOutcome};
use spits_net::proto::*;
use spits_net::registry::{self, Registry};
use spits_net::{check_jobid, FramedEndpoint};
use tracing::{debug, error, warn};

use crate::error::JmError;

/// JM-side view of one generated, not-yet-committed task.
#[derive(Clone)]
pub struct PendingEntry {
    pub attempt_count: u32,
    pub task_bytes: Vec<u8>,
}

/// JM-side record of a committed task's outcome.
#[derive(Clone, Copy)]
pub struct CompletedEntry {
    pub worker_status: i64,
    pub commit_status: i64,
}

/// State shared by the pusher and committer for one run.
pub struct SchedulerState {
    pending: Mutex<HashMap<i64, PendingEntry>>,
    completed: Mutex<HashMap<i64, CompletedEntry>>,
    /// Separate from `completed`'s key space — see `SPEC_FULL.md` §3 for
    /// why the `completed[0]` sentinel is represented this way instead of
    /// overloading the map's value type.
    generation_done: AtomicBool,
    next_task_id: AtomicI64,
    pub run_id: i64,
}

impl SchedulerState {
    pub fn new(run_id: i64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            generation_done: AtomicBool::new(false),
            next_task_id: AtomicI64::new(1),
            run_id,
        }
    }

    pub fn generation_done(&self) -> bool {
        self.generation_done.load(Ordering::SeqCst)
    }

    fn set_generation_done(&self) {
        self.generation_done.store(true, Ordering::SeqCst);
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }

    pub fn completed_snapshot(&self) -> HashMap<i64, CompletedEntry> {
        self.completed.lock().unwrap().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Snapshot of each pending task's retransmission count, for test
    /// observability of the resubmission path (spec §8 scenario 2).
    pub fn pending_attempts(&self) -> HashMap<i64, u32> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| (*id, entry.attempt_count))
            .collect()
    }
}

/// Configuration for one pusher/committer cycle.
#[derive(Clone)]
pub struct SchedulerConfig {
    pub registry_dir: PathBuf,
    pub jobid: String,
    pub connect_timeout: Duration,
    pub recv_timeout: Duration,
    pub send_timeout: Duration,
    pub send_backoff: Duration,
    pub recv_backoff: Duration,
}

/// Runs the pusher loop (spec §4.5.1) to completion: generates tasks via
/// `jm_state`, pushes them to each registered TM, and — once generation has
/// finished — resubmits outstanding tasks from the submission log until the
/// pending map drains. Hands `jm_state` back on success so the caller can
/// finalize it, mirroring `run_committer`'s handback of `committer_state`.
pub async fn run_pusher(
    state: std::sync::Arc<SchedulerState>,
    mut jm_state: Box<dyn JmState>,
    config: SchedulerConfig,
) -> Result<Box<dyn JmState>, JmError> {
    let mut registry = Registry::default();
    // (task_id, task_bytes) in the order sent; source of retransmission.
    let mut submission_log: Vec<(i64, Vec<u8>)> = Vec::new();
    let mut buffered: Option<(i64, Vec<u8>)> = None;

    loop {
        registry = registry::reload(&config.registry_dir, &registry);

        for (name, endpoint) in registry.endpoints.clone() {
            let addr = format!("{}:{}", endpoint.address, endpoint.port);
            let mut conn = match FramedEndpoint::connect_tcp(&addr, config.connect_timeout).await
            {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(tm = %name, error = %e, "pusher: connect failed");
                    continue;
                }
            };

            if conn.write_string(&config.jobid).await.is_err() {
                continue;
            }
            if conn.write_int64(MSG_SEND_TASK).await.is_err() {
                continue;
            }
            let peer_jobid = match conn.read_string(config.recv_timeout).await {
                Ok(id) => id,
                Err(_) => continue,
            };
            if let Err(e) = check_jobid(&config.jobid, &peer_jobid) {
                warn!(tm = %name, error = %e, "pusher: jobid check failed");
                conn.close().await;
                continue;
            }
            match conn.read_int64(config.recv_timeout).await {
                Ok(MSG_SEND_MORE) => {}
                Ok(MSG_SEND_FULL) => {
                    conn.close().await;
                    continue;
                }
                _ => {
                    conn.close().await;
                    continue;
                }
            }

            loop {
                if buffered.is_none() && !state.generation_done() {
                    let next_id = state.next_task_id.load(Ordering::SeqCst);
                    match jm_state.next_task(next_id) {
                        Ok(NextTaskOutcome::Task { bytes, ctx }) => {
                            check_ctx(next_id, ctx)?;
                            state.next_task_id.store(next_id + 1, Ordering::SeqCst);
                            state.pending.lock().unwrap().insert(
                                next_id,
                                PendingEntry {
                                    attempt_count: 0,
                                    task_bytes: bytes.clone(),
                                },
                            );
                            buffered = Some((next_id, bytes));
                        }
                        Ok(NextTaskOutcome::NoMoreTasks) => {
                            state.set_generation_done();
                        }
                        Err(e) => return Err(JmError::Module(e)),
                    }
                }

                let Some((task_id, bytes)) = buffered.clone() else {
                    break;
                };

                if conn.write_int64(task_id).await.is_err()
                    || conn.write_int64(state.run_id).await.is_err()
                    || conn.write_blob(&bytes).await.is_err()
                {
                    break;
                }

                match conn.read_int64(config.recv_timeout).await {
                    Ok(MSG_SEND_MORE) => {
                        submission_log.push((task_id, bytes));
                        buffered = None;
                    }
                    Ok(MSG_SEND_FULL) => {
                        submission_log.push((task_id, bytes));
                        buffered = None;
                        break;
                    }
                    Ok(MSG_SEND_RJCT) => {
                        warn!(tm = %name, task_id, "pusher: task rejected by TM");
                        break;
                    }
                    other => {
                        error!(tm = %name, task_id, ?other, "pusher: unexpected push response");
                        break;
                    }
                }
            }

            conn.close().await;
        }

        if state.generation_done() && state.pending_is_empty() {
            return Ok(jm_state);
        }

        if state.generation_done() && buffered.is_none() {
            // Resubmission path (§4.5.1 step 4), gated on generation having
            // finished per the spec's Open Question resolution.
            let pending = state.pending.lock().unwrap();
            if let Some((task_id, bytes)) = submission_log
                .iter()
                .find(|(task_id, _)| pending.contains_key(task_id))
                .cloned()
            {
                drop(pending);
                state
                    .pending
                    .lock()
                    .unwrap()
                    .entry(task_id)
                    .and_modify(|e| e.attempt_count += 1);
                buffered = Some((task_id, bytes));
            }
        }

        submission_log.retain(|(task_id, _)| state.pending.lock().unwrap().contains_key(task_id));

        tokio::time::sleep(config.send_backoff).await;
    }
}

/// Runs the committer loop (spec §4.5.2) to completion: drains results from
/// each registered TM, discards stale/duplicate deliveries, and commits the
/// rest via `committer_state`.
pub async fn run_committer(
    state: std::sync::Arc<SchedulerState>,
    mut committer_state: Box<dyn CommitterState>,
    config: SchedulerConfig,
) -> Result<Box<dyn CommitterState>, JmError> {
    let mut registry = Registry::default();

    loop {
        registry = registry::reload(&config.registry_dir, &registry);

        for (name, endpoint) in registry.endpoints.clone() {
            let addr = format!("{}:{}", endpoint.address, endpoint.port);
            let mut conn = match FramedEndpoint::connect_tcp(&addr, config.connect_timeout).await
            {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(tm = %name, error = %e, "committer: connect failed");
                    continue;
                }
            };

            if conn.write_string(&config.jobid).await.is_err() {
                continue;
            }
            if conn.write_int64(MSG_READ_RESULT).await.is_err() {
                continue;
            }
            let peer_jobid = match conn.read_string(config.recv_timeout).await {
                Ok(id) => id,
                Err(_) => continue,
            };
            if let Err(e) = check_jobid(&config.jobid, &peer_jobid) {
                warn!(tm = %name, error = %e, "committer: jobid check failed");
                conn.close().await;
                continue;
            }

            loop {
                let task_id = match conn.read_int64(config.recv_timeout).await {
                    Ok(MSG_READ_EMPTY) => break,
                    Ok(v) => v,
                    Err(_) => break,
                };
                let run_id = match conn.read_int64(config.recv_timeout).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let worker_status = match conn.read_int64(config.recv_timeout).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let result_bytes = match conn.read_blob(config.recv_timeout).await {
                    Ok(v) => v,
                    Err(_) => break,
                };

                if conn.write_int64(MSG_READ_RESULT).await.is_err() {
                    break;
                }

                if run_id < state.run_id {
                    debug!(task_id, run_id, "committer: discarding result from an older run");
                    continue;
                }
                if run_id > state.run_id {
                    error!(task_id, run_id, "committer: result from a future run");
                    continue;
                }

                let already_completed = state.completed.lock().unwrap().contains_key(&task_id);
                if already_completed {
                    state.pending.lock().unwrap().remove(&task_id);
                    continue;
                }

                let commit_status = match committer_state.commit_pit(&result_bytes) {
                    Ok(status) => status,
                    Err(e) => {
                        error!(task_id, error = %e, "committer: commit_pit failed");
                        -1
                    }
                };
                state.completed.lock().unwrap().insert(
                    task_id,
                    CompletedEntry {
                        worker_status,
                        commit_status,
                    },
                );
                state.pending.lock().unwrap().remove(&task_id);
            }

            conn.close().await;
        }

        if state.pending_is_empty() && state.generation_done() {
            return Ok(committer_state);
        }

        tokio::time::sleep(config.recv_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spits_core::module::static_module::EchoModule;
    use spits_core::module::{JobInfo, Module};

    #[test]
    fn completed_never_shares_a_key_with_pending_after_commit() {
        let state = SchedulerState::new(1);
        state.pending.lock().unwrap().insert(
            1,
            PendingEntry {
                attempt_count: 0,
                task_bytes: vec![],
            },
        );
        state.completed.lock().unwrap().insert(
            1,
            CompletedEntry {
                worker_status: 0,
                commit_status: 0,
            },
        );
        state.pending.lock().unwrap().remove(&1);
        assert!(state.pending_is_empty());
        assert_eq!(state.completed_snapshot().len(), 1);
    }

    #[test]
    fn module_wiring_smoke_test() {
        let module = EchoModule::new(1, b"x".to_vec());
        let jobinfo = JobInfo {
            jobid: "j".into(),
            run_id: 1,
        };
        assert!(module.job_manager_new(&[], &jobinfo).is_ok());
    }
}
