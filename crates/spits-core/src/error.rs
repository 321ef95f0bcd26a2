//! Error taxonomy shared by every crate in the workspace. One `thiserror`
//! enum per concern, following the per-crate error enum convention used
//! throughout the wider codebase this runtime grew out of (one enum per
//! crate, `#[from]` for wrapped causes, no crate-spanning god-enum).

use thiserror::Error;

/// A call into the computation module (§6.3) returned a non-zero status.
/// Recorded in `completed`, logged at error, never retried.
#[derive(Debug, Error)]
#[error("module call failed with status {status}: {detail}")]
pub struct ModuleStatusError {
    pub status: i64,
    pub detail: String,
}

/// An `echoed_ctx` the module handed back did not match the `ctx` supplied.
/// Treated as a module bug: the task is dropped and the run yields
/// `res_module_ctxer`.
#[derive(Debug, Error)]
#[error("module echoed context {echoed} but expected {expected}")]
pub struct ContextMismatchError {
    pub expected: i64,
    pub echoed: i64,
}

impl ContextMismatchError {
    pub fn check(expected: i64, echoed: i64) -> Result<(), Self> {
        if expected == echoed {
            Ok(())
        } else {
            Err(Self { expected, echoed })
        }
    }
}

/// Errors surfaced by the module ABI boundary (loader, call dispatch).
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Status(#[from] ModuleStatusError),

    #[error(transparent)]
    ContextMismatch(#[from] ContextMismatchError),

    #[error("failed to load module at {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("module did not export required symbol: {0}")]
    MissingSymbol(String),
}
