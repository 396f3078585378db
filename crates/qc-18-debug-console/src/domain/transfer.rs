//! Transfer types: live statistics, terminate reasons and verification
//! outcomes.

use crate::domain::keys::{Hash256, PublicKey};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Why a transfer connection ended, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminateReason {
    None,
    RemoteTerminationUpstream,
    SequenceInvalidation,
    FileNotStored,
    ListenerClosed,
    LingerTimerExpired,
    ConnectTimeout,
    RemoteSentShutdown,
    SocketClosed,
    InvalidPacketIdAck,
    InvalidPacketIdNak,
    CorruptPacketNak,
    Signal,
    Unknown(u32),
}

impl TerminateReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::None,
            2 => Self::RemoteTerminationUpstream,
            3 => Self::SequenceInvalidation,
            404 => Self::FileNotStored,
            1000 => Self::ListenerClosed,
            1001 => Self::LingerTimerExpired,
            1002 => Self::ConnectTimeout,
            1003 => Self::RemoteSentShutdown,
            1004 => Self::SocketClosed,
            1005 => Self::InvalidPacketIdAck,
            1006 => Self::InvalidPacketIdNak,
            1007 => Self::CorruptPacketNak,
            1008 => Self::Signal,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::None => 0,
            Self::RemoteTerminationUpstream => 2,
            Self::SequenceInvalidation => 3,
            Self::FileNotStored => 404,
            Self::ListenerClosed => 1000,
            Self::LingerTimerExpired => 1001,
            Self::ConnectTimeout => 1002,
            Self::RemoteSentShutdown => 1003,
            Self::SocketClosed => 1004,
            Self::InvalidPacketIdAck => 1005,
            Self::InvalidPacketIdNak => 1006,
            Self::CorruptPacketNak => 1007,
            Self::Signal => 1008,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_terminated(self) -> bool {
        self != Self::None
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::None => "Virtual connection does not indicate a shutdown.",
            Self::FileNotStored => "Remote peer does not store the file.",
            Self::RemoteTerminationUpstream => "Remote termination signal (upstream)",
            Self::SequenceInvalidation => "Sequence invalidation or expiration (upstream)",
            Self::ListenerClosed => "Listener: The listener was closed.",
            Self::LingerTimerExpired => "Socket: The linger timer expired.",
            Self::ConnectTimeout => {
                "Socket: The connection timed out when sending the initial handshake."
            }
            Self::RemoteSentShutdown => "Remote peer sent a shutdown message.",
            Self::SocketClosed => "Send: Socket closed.",
            Self::InvalidPacketIdAck => "Send: Invalid packet ID received in ACK message.",
            Self::InvalidPacketIdNak => "Send: Invalid packet ID received in NAK message.",
            Self::CorruptPacketNak => "Send: Invalid NAK packet received.",
            Self::Signal => "Send: Terminate signal.",
            Self::Unknown(_) => "Unknown.",
        }
    }
}

/// Header sent by the remote side before file data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHeader {
    /// Total size of the file on the remote side.
    pub file_size: u64,
    /// Number of bytes the remote is about to send.
    pub transfer_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    In,
    Out,
    Bi,
}

impl TransferDirection {
    pub fn label(self) -> &'static str {
        match self {
            Self::In => "In",
            Self::Out => "Out",
            Self::Bi => "Bi",
        }
    }
}

/// Sent/received pair of a transport counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter {
    pub sent: u64,
    pub received: u64,
}

impl Counter {
    pub fn new(sent: u64, received: u64) -> Self {
        Self { sent, received }
    }
}

/// Live transport metrics of one transfer connection.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferMetrics {
    pub data: Counter,
    pub handshake: Counter,
    pub shutdown: Counter,
    pub ack: Counter,
    pub nak: Counter,
    pub ack2: Counter,
    pub data_packets: Counter,
    /// Bytes per second.
    pub speed_send: f64,
    /// Bytes per second.
    pub speed_receive: f64,
    pub started: DateTime<Utc>,
}

/// Inclusive-offset block range of a blockchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferKind {
    File {
        hash: Hash256,
        file_size: u64,
        offset: u64,
        limit: u64,
    },
    Block {
        blockchain: PublicKey,
        target_blocks: Vec<BlockRange>,
        limit_block_count: u64,
        max_block_size: u64,
    },
}

/// A transfer session known to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSnapshot {
    pub id: Uuid,
    pub peer: PublicKey,
    pub direction: TransferDirection,
    pub kind: TransferKind,
    /// `None` until the transport connection is established.
    pub metrics: Option<TransferMetrics>,
    pub terminate_reason: TerminateReason,
}

// =============================================================================
// Verification outcome
// =============================================================================

/// Why a verification run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("file does not exist in local warehouse: {0}")]
    NotStoredLocally(Hash256),

    #[error("peer has no active connection: {0}")]
    PeerNotConnected(crate::domain::keys::NodeId),

    #[error("error opening transfer: {0}")]
    Open(String),

    #[error("error reading file transfer header: {0}")]
    Header(String),

    #[error("expected local file size {local} mismatch with remote file size {remote}")]
    SizeMismatch { local: u64, remote: u64 },

    #[error("remote peer only offering {offered} of total file size {total}")]
    PartialOffer { offered: u64, total: u64 },

    #[error("error reading from remote at offset {offset}: {message}")]
    RemoteRead { offset: u64, message: String },

    #[error("warehouse error reading at offset {offset} length {length}: {message}")]
    LocalRead {
        offset: u64,
        length: usize,
        message: String,
    },

    #[error("data mismatch at offset {offset}")]
    DataMismatch {
        offset: u64,
        remote: Vec<u8>,
        local: Vec<u8>,
    },

    #[error("transferred data {received} mismatch with reported file size {expected}")]
    Incomplete { received: u64, expected: u64 },

    #[error(
        "remote terminated the transfer after {received} bytes: {} {}",
        .reason.code(),
        .reason.describe()
    )]
    RemoteTerminated {
        reason: TerminateReason,
        received: u64,
    },

    #[error("verification cancelled")]
    Cancelled,
}

/// Result of one verification run. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub hash: Hash256,
    pub bytes_compared: u64,
    pub elapsed: Duration,
    pub terminate_reason: Option<TerminateReason>,
    pub result: Result<(), TransferFailure>,
}

impl TransferOutcome {
    /// Outcome of a run that failed before any data was compared.
    pub fn failed_early(hash: Hash256, failure: TransferFailure) -> Self {
        Self {
            hash,
            bytes_compared: 0,
            elapsed: Duration::ZERO,
            terminate_reason: None,
            result: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&TransferFailure> {
        self.result.as_ref().err()
    }

    /// Throughput in KB/s.
    pub fn throughput_kbps(&self) -> f64 {
        throughput_kbps(self.bytes_compared, self.elapsed)
    }
}

/// KB/s for `bytes` moved in `elapsed`; zero when no time has passed.
pub fn throughput_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    bytes as f64 / seconds / 1024.0
}
