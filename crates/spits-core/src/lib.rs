//! spits-core — shared types for the spits bag-of-tasks dispatch runtime.
//!
//! Holds the pieces every agent (`jm`, `tm`, `se`) needs regardless of
//! transport: the immutable runtime configuration, the error taxonomy, the
//! opaque computation module ABI, and tracing setup.

pub mod config;
pub mod error;
pub mod module;
pub mod telemetry;

pub use config::{Announce, JmArgs, SeArgs, SharedFlags, TmArgs, TmMode};
pub use error::{ContextMismatchError, ModuleError};
