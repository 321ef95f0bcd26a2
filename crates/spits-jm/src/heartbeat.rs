//! Heartbeat sweep (spec §4.6): independent of run lifecycle, walks the
//! registry on a fixed cadence and pokes every TM with `msg_send_heart` so
//! its idle timer doesn't fire while a job is still in flight.

use std::path::PathBuf;
use std::time::Duration;

use spits_net::proto::MSG_SEND_HEART;
use spits_net::registry::{self, Registry};
use spits_net::{check_jobid, FramedEndpoint};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HeartbeatConfig {
    pub registry_dir: PathBuf,
    pub jobid: String,
    pub connect_timeout: Duration,
    pub recv_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// Runs until `finished` is set, sending one heartbeat per registered TM
/// every cycle. Grounded in the teacher's `TaskQueueListener::run` shutdown
/// pattern: a `tokio::select!` between the cycle sleep and `changed()` on a
/// `watch::Receiver`, so a late-arriving shutdown doesn't wait out a full
/// sleep.
pub async fn run_heartbeat(config: HeartbeatConfig, mut finished: watch::Receiver<bool>) {
    let mut registry = Registry::default();

    loop {
        registry = registry::reload(&config.registry_dir, &registry);

        for (name, endpoint) in registry.endpoints.clone() {
            let addr = format!("{}:{}", endpoint.address, endpoint.port);
            let mut conn = match FramedEndpoint::connect_tcp(&addr, config.connect_timeout).await
            {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(tm = %name, error = %e, "heartbeat: connect failed");
                    continue;
                }
            };

            if conn.write_string(&config.jobid).await.is_err() {
                continue;
            }
            let peer_jobid = match conn.read_string(config.recv_timeout).await {
                Ok(id) => id,
                Err(_) => {
                    conn.close().await;
                    continue;
                }
            };
            if let Err(e) = check_jobid(&config.jobid, &peer_jobid) {
                warn!(tm = %name, error = %e, "heartbeat: jobid check failed");
                conn.close().await;
                continue;
            }
            let _ = conn.write_int64(MSG_SEND_HEART).await;
            conn.close().await;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.heartbeat_interval) => {}
            result = finished.changed() => {
                if result.is_err() || *finished.borrow() {
                    return;
                }
            }
        }

        if *finished.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exits_promptly_when_finished_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = HeartbeatConfig {
            registry_dir: dir.path().to_path_buf(),
            jobid: "j".into(),
            connect_timeout: Duration::from_millis(50),
            recv_timeout: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(3600),
        };
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_heartbeat(config, rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("heartbeat loop should exit promptly after finished=true")
            .unwrap();
    }
}
