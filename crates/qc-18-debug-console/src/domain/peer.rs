//! Peer and network snapshots reported by the backend.

use crate::domain::events::PeerIdentity;
use crate::domain::keys::{NodeId, PublicKey};
use chrono::{DateTime, Utc};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    Inactive,
    Removed,
    Redundant,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Removed => "removed",
            Self::Redundant => "redundant",
        }
    }
}

/// One connection between the local node and a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    /// Name of the local adapter the connection runs over.
    pub adapter: String,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub last_packet_in: DateTime<Utc>,
    pub last_packet_out: DateTime<Utc>,
    pub rtt: Option<Duration>,
    pub port_internal: u16,
    pub port_external: u16,
}

/// Snapshot of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub identity: PeerIdentity,
    pub is_root: bool,
    pub behind_nat: bool,
    pub firewall_reported: bool,
    /// Known only from a lookup, never contacted.
    pub is_virtual: bool,
    pub rtt: Option<Duration>,
    pub user_agent: String,
    pub blockchain_height: u64,
    pub blockchain_version: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub active_connections: Vec<ConnectionInfo>,
    pub inactive_connections: Vec<ConnectionInfo>,
}

impl PeerInfo {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            identity: PeerIdentity::from_public_key(public_key),
            is_root: false,
            behind_nat: false,
            firewall_reported: false,
            is_virtual: false,
            rtt: None,
            user_agent: String::new(),
            blockchain_height: 0,
            blockchain_version: 0,
            packets_sent: 0,
            packets_received: 0,
            active_connections: Vec::new(),
            inactive_connections: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key
    }

    pub fn is_connection_active(&self) -> bool {
        !self.active_connections.is_empty()
    }
}

/// A local listening network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub adapter: String,
    pub listen: SocketAddr,
    pub multicast: Option<IpAddr>,
    pub broadcast: Vec<IpAddr>,
    pub external_ip: Option<IpAddr>,
    pub external_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet {
    pub ipv4_listen: bool,
    pub ipv6_listen: bool,
    pub firewall: bool,
}

impl FeatureSet {
    /// Comma separated list of enabled features.
    pub fn describe(&self) -> String {
        let mut features = Vec::new();
        if self.ipv4_listen {
            features.push("IPv4");
        }
        if self.ipv6_listen {
            features.push("IPv6");
        }
        if self.firewall {
            features.push("Firewall Reported");
        }
        features.join(", ")
    }
}

/// Root peers first, then by node ID descending.
pub fn sort_peers(peers: &mut [PeerInfo]) {
    peers.sort_by(|a, b| {
        b.is_root
            .cmp(&a.is_root)
            .then_with(|| b.node_id().as_bytes().cmp(a.node_id().as_bytes()))
    });
}
