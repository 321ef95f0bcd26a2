//! spits-se — single executor: an in-process stand-in for the JM+TM pair
//! that runs the module's full task set with no network involved. Out of
//! scope as a feature (§1); kept only for CLI-surface parity.

pub mod error;
pub mod run;

pub use error::SeError;
pub use run::{run_single_executor, SeOutcome};
