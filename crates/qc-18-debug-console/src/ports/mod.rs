//! # Ports Layer
//!
//! - `inbound` - event hooks the backend calls into the console
//! - `outbound` - the network backend the console drives

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
