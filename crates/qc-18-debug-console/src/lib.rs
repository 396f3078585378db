//! QC-18 Debug Console - Operator diagnostics for a peer-to-peer node.
//!
//! The console runs line-based command sessions against a live network
//! backend. It traces protocol activity for selected keys, resolves and
//! inspects peers, and verifies file transfers end to end against the
//! local warehouse.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     DEBUG CONSOLE (qc-18)                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐      ┌──────────────────┐                       │
//! │   │  Terminal  │      │ /console socket  │   adapters            │
//! │   └─────┬──────┘      └────────┬─────────┘                       │
//! │         │   SessionRunner (one per session)                      │
//! │   ┌─────┴──────────────────────┴─────────┐                       │
//! │   │          CommandInterpreter          │   service             │
//! │   │  connect · verify · block · render   │                       │
//! │   └─────┬──────────────────────▲─────────┘                       │
//! │         │ NetworkBackend       │ EventHooks -> EventFilters      │
//! │         │                      │       │                         │
//! │         │                      │  KeyRegistry -> OutputSink      │
//! └─────────┼──────────────────────┼─────────────────────────────────┘
//!           ▼                      │
//!        Network backend (DHT, transfers, warehouse)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use qc_18_debug_console::{ConsoleConfig, DebugConsole, OutputSink};
//!
//! let console = DebugConsole::new(backend, ConsoleConfig::default(), OutputSink::stdout());
//! let end = TerminalConsole::new(&console).run().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{ConsoleServer, InMemoryBackend, TerminalConsole};
pub use domain::{
    BackendError, ConfigError, ConnectError, ConsoleConfig, ErrorOutput, Hash256, KeyPair,
    KeyRegistry, MonitorKey, NodeId, OutputSink, PublicKey, ServerError,
};
pub use ports::{EventHooks, NetworkBackend, TransferStream};
pub use service::{DebugConsole, Session, SessionEnd, SessionKind};

/// Name shown in the session banner and the backend user agent.
pub const APP_NAME: &str = "Quantum-Chain Debug Console";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
