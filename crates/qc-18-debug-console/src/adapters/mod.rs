//! # Adapters
//!
//! - `terminal` - the process stdin/stdout session
//! - `websocket` - the `/console` socket server
//! - `memory` - a self-contained backend for local use and tests

pub mod memory;
pub mod terminal;
pub mod websocket;

pub use memory::InMemoryBackend;
pub use terminal::TerminalConsole;
pub use websocket::ConsoleServer;
