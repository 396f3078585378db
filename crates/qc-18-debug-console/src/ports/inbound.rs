//! # Driving Ports (Event Hooks)
//!
//! Capability interfaces the backend calls on its own tasks, one per event
//! class. The console supplies its event filters as the implementations.
//!
//! # Contract
//!
//! Hooks run synchronously inside the backend's event path. An
//! implementation must return quickly, must not block on I/O other than a
//! single sink write, and must never panic.

use crate::domain::{IncomingRequest, InboundMessage, OutboundMessage, SearchStep};
use std::fmt;
use std::sync::Arc;

/// Invoked on every step of an outgoing lookup.
pub trait SearchStatusHook: Send + Sync {
    fn on_search_step(&self, step: &SearchStep<'_>);
}

/// Invoked when a peer asks the local node about a key.
pub trait IncomingRequestHook: Send + Sync {
    fn on_incoming_request(&self, request: &IncomingRequest<'_>);
}

/// Invoked for every protocol message received.
pub trait MessageInHook: Send + Sync {
    fn on_message_in(&self, message: &InboundMessage<'_>);
}

/// Invoked for every protocol message sent.
pub trait MessageOutHook: Send + Sync {
    fn on_message_out(&self, message: &OutboundMessage<'_>);
}

/// Invoked when the backend reports an internal error.
pub trait ErrorLogHook: Send + Sync {
    fn on_error(&self, function: &str, message: fmt::Arguments<'_>);
}

/// The full set of hooks registered with a backend.
#[derive(Clone)]
pub struct EventHooks {
    pub search_status: Arc<dyn SearchStatusHook>,
    pub incoming_request: Arc<dyn IncomingRequestHook>,
    pub message_in: Arc<dyn MessageInHook>,
    pub message_out: Arc<dyn MessageOutHook>,
    pub error_log: Arc<dyn ErrorLogHook>,
}

impl EventHooks {
    /// Uses one value implementing every hook for all five slots.
    pub fn from_shared<T>(hooks: Arc<T>) -> Self
    where
        T: SearchStatusHook
            + IncomingRequestHook
            + MessageInHook
            + MessageOutHook
            + ErrorLogHook
            + 'static,
    {
        Self {
            search_status: hooks.clone(),
            incoming_request: hooks.clone(),
            message_in: hooks.clone(),
            message_out: hooks.clone(),
            error_log: hooks,
        }
    }
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHooks").finish_non_exhaustive()
    }
}
