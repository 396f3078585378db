//! # Service Layer
//!
//! Wires the domain to the ports:
//!
//! - `filters`: the event hooks registered with the backend
//! - `interpreter`: the command table and command execution
//! - `session`, `input`: the per-session read loop and its cancellable input
//! - `connect`, `verify`, `block`: peer resolution, transfer verification
//!   and block fetching
//! - `render`: text output of the commands
//! - `console`: the process-wide console facade

pub mod block;
pub mod connect;
pub mod console;
pub mod filters;
pub mod input;
pub mod interpreter;
pub mod render;
pub mod session;
pub mod verify;

pub use block::{fetch_block, BlockFetchError};
pub use connect::{debug_connect, parse_target, resolve_peer};
pub use console::DebugConsole;
pub use filters::{ErrorOutputSwitch, EventFilters};
pub use input::{InputBuffer, InputBufferReader, LinePoll, LineSource, ReadLine, SessionInput};
pub use interpreter::{parse_command, Command, CommandInterpreter, ParsedCommand, COMMAND_TABLE};
pub use session::{Session, SessionEnd, SessionKind, SessionRunner};
pub use verify::TransferVerifier;
