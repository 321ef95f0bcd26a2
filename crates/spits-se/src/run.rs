//! Single-executor run loop: the same six `spits_jm::orchestrator` steps,
//! collapsed onto one in-process worker instead of a network of TMs.
//! Out of scope per §1 as a feature, but wired up for CLI-surface parity
//! with `jm`/`tm`.

use spits_core::module::{check_ctx, JobInfo, Module, NextTaskOutcome};

use crate::error::SeError;

pub struct SeOutcome {
    pub status: i64,
    pub result_bytes: Option<Vec<u8>>,
}

/// Drives one run ordinal: generate, run, commit, in a single thread with no
/// framing, registry, or backoff involved.
pub fn run_single_executor(
    module: &dyn Module,
    module_args: &[String],
    jobid: &str,
) -> Result<SeOutcome, SeError> {
    let jobinfo = JobInfo {
        jobid: jobid.to_string(),
        run_id: 1,
    };

    let mut jm_state = module.job_manager_new(module_args, &jobinfo)?;
    let mut worker_state = module.worker_new(module_args)?;
    let mut committer_state = module.committer_new(module_args, &jobinfo)?;

    let mut next_id: i64 = 1;
    loop {
        match jm_state.next_task(next_id)? {
            NextTaskOutcome::Task { bytes, ctx } => {
                check_ctx(next_id, ctx)?;

                let outcome = worker_state.run(&bytes, ctx)?;
                check_ctx(next_id, outcome.ctx)?;

                match outcome.bytes {
                    Some(result_bytes) => {
                        committer_state.commit_pit(&result_bytes)?;
                    }
                    None => {
                        tracing::warn!(task_id = next_id, "worker returned no answer; dropping task");
                    }
                }

                next_id += 1;
            }
            NextTaskOutcome::NoMoreTasks => break,
        }
    }

    let outcome = committer_state.commit_job(0x12345678)?;
    check_ctx(0x12345678, outcome.ctx)?;

    jm_state.finalize();
    worker_state.finalize();
    committer_state.finalize();

    Ok(SeOutcome {
        status: outcome.status,
        result_bytes: outcome.bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spits_core::module::static_module::EchoModule;

    #[test]
    fn runs_every_task_in_process() {
        let module = EchoModule::new(4, b"x".to_vec());
        let outcome = run_single_executor(&module, &[], "j").unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.result_bytes.unwrap(), b"4");
    }
}
