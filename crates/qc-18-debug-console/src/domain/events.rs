//! Backend event records
//!
//! Strongly typed payloads handed to the event hooks. Records borrow from
//! the backend's own buffers so that building one for an unmonitored event
//! costs nothing beyond the struct itself.

use crate::domain::keys::{Hash256, NodeId, PublicKey};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// =============================================================================
// Search steps
// =============================================================================

/// Position of a search step in the lookup tree, used for indentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStepKind {
    /// Top level DHT operation (find node, get, store).
    Operation,
    /// A search being started.
    Initiation,
    /// An intermediate step of a running search.
    Step,
    /// An information request sent to a single peer.
    InfoRequest,
}

impl SearchStepKind {
    pub fn from_function(function: &str) -> Self {
        match function {
            "dht.FindNode" | "dht.Get" | "dht.Store" => Self::Operation,
            "search.startSearch" => Self::Initiation,
            "search.sendInfoRequest" => Self::InfoRequest,
            _ => Self::Step,
        }
    }

    pub fn indent(self) -> &'static str {
        match self {
            Self::Operation => " -",
            Self::Initiation => "  >",
            Self::Step => " ->",
            Self::InfoRequest => "    >",
        }
    }
}

/// One step of an outgoing lookup.
///
/// `message` is left unformatted until a filter decides to render it.
#[derive(Clone, Copy)]
pub struct SearchStep<'a> {
    pub function: &'a str,
    pub kind: SearchStepKind,
    /// Target key of the lookup.
    pub key: &'a [u8],
    pub message: fmt::Arguments<'a>,
}

impl<'a> SearchStep<'a> {
    pub fn new(function: &'a str, key: &'a [u8], message: fmt::Arguments<'a>) -> Self {
        Self {
            function,
            kind: SearchStepKind::from_function(function),
            key,
            message,
        }
    }
}

impl fmt::Debug for SearchStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchStep")
            .field("function", &self.function)
            .field("kind", &self.kind)
            .field("key", &hex::encode(self.key))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Incoming requests
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    FindSelf,
    FindPeer,
    FindValue,
    InfoStore,
    Unknown(u8),
}

impl RequestAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::FindSelf => "FIND_SELF",
            Self::FindPeer => "FIND_PEER",
            Self::FindValue => "FIND_VALUE",
            Self::InfoStore => "INFO_STORE",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

/// A peer asking the local node about a key.
#[derive(Debug, Clone, Copy)]
pub struct IncomingRequest<'a> {
    pub peer: NodeId,
    pub action: RequestAction,
    pub key: &'a [u8],
}

impl IncomingRequest<'_> {
    /// The peer is looking up its own node ID.
    pub fn is_self_lookup(&self) -> bool {
        self.action == RequestAction::FindSelf && self.key == self.peer.as_bytes()
    }
}

// =============================================================================
// Protocol messages
// =============================================================================

/// Identity of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    pub public_key: PublicKey,
    pub node_id: NodeId,
}

impl PeerIdentity {
    pub fn from_public_key(public_key: PublicKey) -> Self {
        Self {
            public_key,
            node_id: public_key.node_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCommand {
    Announcement,
    Response,
    Ping,
    Pong,
    LocalDiscovery,
    Traverse,
    Chat,
    Unknown(u8),
}

impl MessageCommand {
    pub fn label(self) -> &'static str {
        match self {
            Self::Announcement => "Announcement",
            Self::Response => "Response",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::LocalDiscovery => "Local Discovery",
            Self::Traverse => "Traverse",
            Self::Chat => "Chat",
            Self::Unknown(_) => "Unknown",
        }
    }
}

/// Fields shared by announcements and responses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerHeader {
    pub protocol: u8,
    pub features: u8,
    pub actions: u8,
    pub blockchain_height: u64,
    pub blockchain_version: u64,
    pub port_internal: u16,
    pub port_external: u16,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoStoreRecord {
    pub hash: Hash256,
    pub file_type: u8,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub header: PeerHeader,
    pub find_peer: Vec<Hash256>,
    pub find_data: Vec<Hash256>,
    pub info_store: Vec<InfoStoreRecord>,
}

/// One reachable address of a peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRecord {
    pub ip: IpAddr,
    pub port: u16,
    pub reported_internal: u16,
    pub reported_external: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub public_key: PublicKey,
    pub node_id: NodeId,
    pub ipv4: Option<AddressRecord>,
    pub ipv6: Option<AddressRecord>,
    pub last_contact: DateTime<Utc>,
}

/// Peers known for a requested hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPeers {
    pub hash: Hash256,
    pub closest: Vec<PeerRecord>,
    pub storing: Vec<PeerRecord>,
    pub is_last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedFile {
    pub hash: Hash256,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: PeerHeader,
    pub hash_peers: Vec<HashPeers>,
    pub files_embedded: Vec<EmbeddedFile>,
    pub hashes_not_found: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traverse {
    pub target_peer: PublicKey,
    pub authorized_relay: PublicKey,
    pub signer: PublicKey,
    pub expires: DateTime<Utc>,
    pub ipv4: Ipv4Addr,
    pub port_ipv4: u16,
    pub port_ipv4_reported_external: u16,
    pub ipv6: Ipv6Addr,
    pub port_ipv6: u16,
    pub port_ipv6_reported_external: u16,
}

/// Payload of a protocol message after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    Announcement(Announcement),
    Response(Response),
    Traverse(Traverse),
    /// Decoded but of a kind this console has no field layout for.
    Unrecognized { payload_len: usize },
}

/// A message received from a peer.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub peer: &'a PeerIdentity,
    pub command: MessageCommand,
    /// Sender key claimed inside the packet.
    pub sender_public_key: PublicKey,
    pub decoded: Option<&'a DecodedMessage>,
}

impl InboundMessage<'_> {
    pub fn sender_mismatch(&self) -> bool {
        self.sender_public_key != self.peer.public_key
    }
}

/// A message the local node sends to a peer.
#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub receiver: &'a PeerIdentity,
    pub command: MessageCommand,
    pub decoded: Option<&'a DecodedMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_from_function() {
        assert_eq!(SearchStepKind::from_function("dht.Get"), SearchStepKind::Operation);
        assert_eq!(
            SearchStepKind::from_function("search.startSearch"),
            SearchStepKind::Initiation
        );
        assert_eq!(
            SearchStepKind::from_function("search.sendInfoRequest"),
            SearchStepKind::InfoRequest
        );
        assert_eq!(SearchStepKind::from_function("search.receive"), SearchStepKind::Step);
    }

    #[test]
    fn test_self_lookup_detection() {
        let peer = NodeId::new([1; 32]);
        let own = IncomingRequest {
            peer,
            action: RequestAction::FindSelf,
            key: peer.as_bytes(),
        };
        let other = IncomingRequest {
            key: &[2; 32],
            ..own
        };
        assert!(own.is_self_lookup());
        assert!(!other.is_self_lookup());
    }
}
