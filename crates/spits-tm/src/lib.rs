//! spits-tm — the Task Manager: a bounded concurrent task pool, the server
//! that dispatches the four protocol verbs over it, and the registry
//! announcer that publishes the TM's address.

pub mod announce;
pub mod error;
pub mod pool;
pub mod server;

pub use error::TmError;
pub use pool::TaskPool;
pub use server::TmServer;
