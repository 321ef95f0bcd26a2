use thiserror::Error;

/// Transport- and protocol-level failures (spec §7: `TransportError`,
/// `ProtocolError`). All of these are local to one connection and never
/// fatal to the process. Registry loading is deliberately not modeled as
/// an error here: a missing or malformed registry source is tolerated by
/// design (§4.2) and handled with a logged warning, not a `Result`.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("operation timed out")]
    Timeout,

    #[error("peer closed the connection")]
    SocketClosed,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("jobid mismatch: expected {expected:?}, got {actual:?}")]
    JobIdMismatch { expected: String, actual: String },
}

/// Checks a handshake's echoed jobid against the expected one, surfacing
/// `NetError::JobIdMismatch` on mismatch. Used by the pusher and committer
/// loops and by the TM server's own handshake.
pub fn check_jobid(expected: &str, actual: &str) -> Result<(), NetError> {
    if expected == actual {
        Ok(())
    } else {
        Err(NetError::JobIdMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
