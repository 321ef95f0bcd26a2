//! TM server (spec §4.4): accepts JM connections, performs the jobid
//! handshake, then dispatches exactly one of the four protocol verbs per
//! connection. Also runs the idle-timer checker described in the same
//! section.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spits_net::proto::*;
use spits_net::{check_jobid, FramedEndpoint};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, error, info, warn};

use crate::error::TmError;
use crate::pool::TaskPool;

/// Configuration the server needs beyond the pool itself.
#[derive(Clone)]
pub struct ServerConfig {
    pub jobid: String,
    pub recv_timeout: Duration,
    pub send_timeout: Duration,
    pub idle_timeout: Duration,
}

/// Shared handle for the idle timer: seconds-since-epoch of the last verb
/// handled on any connection.
#[derive(Clone)]
struct IdleTracker(Arc<AtomicI64>);

impl IdleTracker {
    fn new() -> Self {
        Self(Arc::new(AtomicI64::new(now_secs())))
    }

    fn touch(&self) {
        self.0.store(now_secs(), Ordering::SeqCst);
    }

    fn idle_for(&self) -> Duration {
        let last = self.0.load(Ordering::SeqCst);
        Duration::from_secs((now_secs() - last).max(0) as u64)
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct TmServer {
    pool: Arc<TaskPool>,
    config: ServerConfig,
    idle: IdleTracker,
}

impl TmServer {
    pub fn new(pool: Arc<TaskPool>, config: ServerConfig) -> Self {
        Self {
            pool,
            config,
            idle: IdleTracker::new(),
        }
    }

    /// Runs the idle-timer checker: exits the process with a non-zero
    /// status once `tm_timeout` seconds pass with the pool empty and no
    /// in-flight workers.
    pub async fn run_idle_checker(&self) -> ! {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.idle.idle_for() >= self.config.idle_timeout
                && self.pool.empty()
                && self.pool.in_flight() == 0
            {
                error!("idle timeout elapsed with no pending work; exiting");
                std::process::exit(1);
            }
        }
    }

    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let endpoint = FramedEndpoint::new(stream, server.config.send_timeout);
                if let Err(e) = server.handle_connection(endpoint).await {
                    debug!(error = %e, "connection ended with an error");
                }
            });
            debug!(%peer, "accepted TM connection");
        }
    }

    pub async fn serve_uds(self: Arc<Self>, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let endpoint = FramedEndpoint::new(stream, server.config.send_timeout);
                if let Err(e) = server.handle_connection(endpoint).await {
                    debug!(error = %e, "connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection<S>(&self, mut endpoint: FramedEndpoint<S>) -> Result<(), TmError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let deadline = self.config.recv_timeout;

        endpoint.write_string(&self.config.jobid).await?;
        let peer_jobid = endpoint.read_string(deadline).await?;
        check_jobid(&self.config.jobid, &peer_jobid)?;

        let verb = endpoint.read_int64(deadline).await?;

        self.idle.touch();

        match verb {
            MSG_TERMINATE => {
                info!("received terminate; exiting");
                std::process::exit(0);
            }
            MSG_SEND_HEART => {
                debug!("heartbeat received");
                Ok(())
            }
            MSG_SEND_TASK => self.handle_push_tasks(endpoint).await,
            MSG_READ_RESULT => self.handle_pull_results(endpoint).await,
            other => Err(TmError::Fatal(format!("unrecognized verb code {other}"))),
        }
    }

    async fn handle_push_tasks<S>(&self, mut endpoint: FramedEndpoint<S>) -> Result<(), TmError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let deadline = self.config.recv_timeout;
        loop {
            if self.pool.full() {
                endpoint.write_int64(MSG_SEND_FULL).await?;
                return Ok(());
            }
            endpoint.write_int64(MSG_SEND_MORE).await?;

            let task_id = endpoint.read_int64(deadline).await?;
            let run_id = endpoint.read_int64(deadline).await?;
            let task_bytes = endpoint.read_blob(deadline).await?;

            self.idle.touch();

            if !self.pool.put(task_id, run_id, task_bytes) {
                endpoint.write_int64(MSG_SEND_RJCT).await?;
                return Ok(());
            }
        }
    }

    async fn handle_pull_results<S>(&self, mut endpoint: FramedEndpoint<S>) -> Result<(), TmError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let deadline = self.config.recv_timeout;
        loop {
            let Some(item) = self.pool.drain_result() else {
                endpoint.write_int64(MSG_READ_EMPTY).await?;
                return Ok(());
            };

            if let Err(e) = async {
                endpoint.write_int64(item.task_id).await?;
                endpoint.write_int64(item.run_id).await?;
                endpoint.write_int64(item.worker_status).await?;
                endpoint.write_blob(&item.result_bytes).await
            }
            .await
            {
                self.pool.push_back_result(item);
                return Err(e.into());
            }

            let ack = match endpoint.read_int64(deadline).await {
                Ok(v) => v,
                Err(e) => {
                    self.pool.push_back_result(item);
                    return Err(e.into());
                }
            };

            if ack != MSG_READ_RESULT {
                warn!(ack, "pull-results: unexpected ack; returning item to queue");
                self.pool.push_back_result(item);
                return Err(TmError::Fatal(format!("unexpected ack code {ack}")));
            }

            self.idle.touch();
        }
    }
}
