//! Domain Layer - Pure types with no I/O
//!
//! - Key material, node IDs and content hashes
//! - Monitor keys and the monitored key registry
//! - Output sinks
//! - Backend event records, peer and transfer snapshots
//! - Verification outcomes, configuration and errors

pub mod block;
pub mod config;
pub mod errors;
pub mod events;
pub mod keys;
pub mod monitor;
pub mod peer;
pub mod registry;
pub mod sink;
pub mod transfer;

pub use block::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use keys::*;
pub use monitor::*;
pub use peer::*;
pub use registry::*;
pub use sink::*;
pub use transfer::*;
