//! spits-net — the wire-level substrate shared by the JM and TM agents:
//! a length-prefixed framed endpoint over TCP or UDS, the protocol message
//! codes, and the filesystem-backed TM registry loader.

pub mod error;
pub mod frame;
pub mod proto;
pub mod registry;

pub use error::{check_jobid, NetError};
pub use frame::FramedEndpoint;
pub use registry::{Endpoint, Registry};
