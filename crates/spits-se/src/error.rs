use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeError {
    #[error(transparent)]
    Module(#[from] spits_core::ModuleError),
}
