//! `tm` — Task Manager agent entry point.
//!
//! Usage: `tm --key=value... <module-path> [module-args...]`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use spits_core::config::{Announce, TmArgs, TmMode};
use spits_core::module::dynamic::DynamicModule;
use spits_core::module::Module;
use spits_core::telemetry::init_tracing;
use spits_tm::announce::announce;
use spits_tm::pool::TaskPool;
use spits_tm::server::{ServerConfig, TmServer};
use tokio::net::{TcpListener, UnixListener};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = TmArgs::parse();
    init_tracing(args.shared.verbose);

    match run(args).await {
        Ok(()) => {}
        // §6.4: the runtime suppresses propagation of the module's exit
        // status — log the failure but still return success.
        Err(e) => tracing::error!(error = %e, "tm exited with an error"),
    }
    ExitCode::SUCCESS
}

async fn run(args: TmArgs) -> anyhow::Result<()> {
    let module: Arc<dyn Module> = Arc::new(
        DynamicModule::load(&PathBuf::from(&args.module_path))
            .map_err(|e| anyhow::anyhow!("loading module {}: {e}", args.module_path))?,
    );

    let pool = Arc::new(TaskPool::new(args.max_threads(), args.overfill));
    pool.start(module, args.module_args.clone());

    let server_config = ServerConfig {
        jobid: args.shared.jobid.clone(),
        recv_timeout: args.recv_timeout(),
        send_timeout: args.send_timeout(),
        idle_timeout: args.idle_timeout(),
    };
    let server = Arc::new(TmServer::new(Arc::clone(&pool), server_config));

    let idle_checker = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server.run_idle_checker().await;
        })
    };

    let announce_dir = std::env::current_dir()?;

    match args.tmmode {
        TmMode::Tcp => {
            let listener = TcpListener::bind((args.tmaddr.as_str(), args.tmport)).await?;
            let bound_port = listener.local_addr()?.port();
            if !matches!(args.announce, Announce::None) {
                let connectable = connectable_addr(&args.tmaddr)?;
                announce(&announce_dir, args.announce, &connectable, bound_port)?;
            }
            tracing::info!(addr = %args.tmaddr, port = bound_port, "tm listening (tcp)");
            server.serve_tcp(listener).await?;
        }
        TmMode::Uds => {
            let _ = std::fs::remove_file(&args.tmsock);
            let listener = UnixListener::bind(&args.tmsock)?;
            tracing::info!(path = %args.tmsock, "tm listening (uds)");
            server.serve_uds(listener).await?;
        }
    }

    idle_checker.abort();
    Ok(())
}

/// Resolves the address to publish into the registry. A TM bound to a
/// wildcard address (`0.0.0.0`, `::`) is not itself reachable at that
/// address, so fall back to the local hostname — mirroring
/// `Listener.GetConnectableAddr`'s use of `socket.gethostname()`.
fn connectable_addr(tmaddr: &str) -> anyhow::Result<String> {
    let is_wildcard = tmaddr
        .parse::<std::net::IpAddr>()
        .map(|ip| ip.is_unspecified())
        .unwrap_or(false);
    if !is_wildcard {
        return Ok(tmaddr.to_string());
    }
    hostname::get()?
        .into_string()
        .map_err(|_| anyhow::anyhow!("local hostname is not valid UTF-8"))
}
