//! `jm` — Job Manager agent entry point.
//!
//! Usage: `jm --key=value... <module-path> [module-args...]`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use spits_core::config::JmArgs;
use spits_core::module::dynamic::DynamicModule;
use spits_core::module::Module;
use spits_core::telemetry::init_tracing;
use spits_jm::heartbeat::{run_heartbeat, HeartbeatConfig};
use spits_jm::orchestrator::Orchestrator;
use spits_jm::scheduler::SchedulerConfig;
use spits_net::proto::MSG_TERMINATE;
use spits_net::registry::load_registry;
use spits_net::FramedEndpoint;
use tokio::sync::watch;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = JmArgs::parse();
    init_tracing(args.shared.verbose);

    match run(args).await {
        Ok(()) => {}
        // §6.4: the runtime suppresses propagation of the module's exit
        // status — log the failure but still return success.
        Err(e) => tracing::error!(error = %e, "jm exited with an error"),
    }
    ExitCode::SUCCESS
}

async fn run(args: JmArgs) -> anyhow::Result<()> {
    let module: Arc<dyn Module> = Arc::new(
        DynamicModule::load(&PathBuf::from(&args.module_path))
            .map_err(|e| anyhow::anyhow!("loading module {}: {e}", args.module_path))?,
    );

    let registry_dir = std::env::current_dir()?;

    let config = SchedulerConfig {
        registry_dir: registry_dir.clone(),
        jobid: args.shared.jobid.clone(),
        connect_timeout: args.connect_timeout(),
        recv_timeout: args.recv_timeout(),
        send_timeout: args.send_timeout(),
        send_backoff: args.send_backoff(),
        recv_backoff: args.recv_backoff(),
    };

    let (finished_tx, finished_rx) = watch::channel(false);
    let heartbeat_config = HeartbeatConfig {
        registry_dir: registry_dir.clone(),
        jobid: args.shared.jobid.clone(),
        connect_timeout: args.htimeout(),
        recv_timeout: args.recv_timeout(),
        heartbeat_interval: args.heartbeat_interval(),
    };
    let heartbeat = tokio::spawn(run_heartbeat(heartbeat_config, finished_rx));

    let orchestrator = Orchestrator::new(module, args.module_args.clone(), config);
    let outcome = orchestrator.run(1).await;

    let _ = finished_tx.send(true);
    let _ = heartbeat.await;

    let outcome = outcome.map_err(|e| anyhow::anyhow!("run failed: {e}"))?;
    tracing::info!(status = outcome.status, "job finished");

    if args.killtms {
        terminate_all_tms(&registry_dir, &args.shared.jobid, args.connect_timeout()).await;
    }

    Ok(())
}

/// Sends `msg_terminate` to every currently registered TM, per `--killtms`
/// (spec §6.4). Best-effort: a TM that's already gone or unreachable is
/// logged and skipped.
async fn terminate_all_tms(registry_dir: &std::path::Path, jobid: &str, connect_timeout: std::time::Duration) {
    let registry = load_registry(registry_dir);
    for (name, endpoint) in registry.endpoints {
        let addr = format!("{}:{}", endpoint.address, endpoint.port);
        let mut conn = match FramedEndpoint::connect_tcp(&addr, connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(tm = %name, error = %e, "killtms: connect failed");
                continue;
            }
        };
        if conn.write_string(jobid).await.is_err() {
            continue;
        }
        let _ = conn.write_int64(MSG_TERMINATE).await;
        conn.close().await;
    }
}
