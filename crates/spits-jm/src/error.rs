use thiserror::Error;

#[derive(Debug, Error)]
pub enum JmError {
    #[error(transparent)]
    Net(#[from] spits_net::NetError),

    #[error(transparent)]
    Module(#[from] spits_core::ModuleError),

    #[error("fatal: {0}")]
    Fatal(String),
}
