//! # Driven Ports (Outbound SPI)
//!
//! What the console requires from the node it is attached to. The lookup
//! algorithm, transport and storage engine all live behind these traits.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`: every session, background task
//! and the socket server share one backend handle.

use crate::domain::{
    BackendError, BlockRange, BlockReply, DecodedBlock, FeatureSet, Hash256, KeyPair, NetworkInfo,
    NodeId, PeerInfo, PublicKey, SearchResult, TerminateReason, TransferHeader, TransferMetrics,
    TransferSnapshot,
};
use crate::ports::inbound::EventHooks;
use async_trait::async_trait;
use std::time::Duration;

/// A streaming file transfer opened from a remote peer.
///
/// Dropping the stream must release the underlying transport connection.
#[async_trait]
pub trait TransferStream: Send {
    /// Reads the header the remote sends ahead of the file data.
    async fn read_header(&mut self) -> Result<TransferHeader, BackendError>;

    /// Reads up to `buf.len()` bytes. `Ok(0)` means the remote ended the
    /// stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError>;

    /// Why the transport connection ended, `None` while it is alive.
    fn terminate_reason(&self) -> TerminateReason;

    /// Live transport counters, if the connection is established.
    fn metrics(&self) -> Option<TransferMetrics>;

    /// Closes the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// The node backend.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    // -------------------------------------------------------------------------
    // Self
    // -------------------------------------------------------------------------

    fn key_pair(&self) -> KeyPair;

    fn self_node_id(&self) -> NodeId {
        self.key_pair().node_id()
    }

    fn user_agent(&self) -> String;

    fn features(&self) -> FeatureSet;

    /// Local listening networks.
    fn networks(&self) -> Vec<NetworkInfo>;

    // -------------------------------------------------------------------------
    // Peers
    // -------------------------------------------------------------------------

    fn list_peers(&self) -> Vec<PeerInfo>;

    /// Returns the peer if it is in the local routing table.
    fn is_known_contact(&self, id: &NodeId) -> Option<PeerInfo>;

    /// Looks the node up via the DHT. `Ok(None)` when the lookup finished
    /// without finding it.
    async fn find_node(&self, id: &NodeId, timeout: Duration)
        -> Result<Option<PeerInfo>, BackendError>;

    /// Looks a peer up by its public key: peer list first, then DHT.
    async fn find_peer(
        &self,
        key: &PublicKey,
        timeout: Duration,
    ) -> Result<Option<PeerInfo>, BackendError> {
        let id = key.node_id();
        if let Some(peer) = self.is_known_contact(&id) {
            return Ok(Some(peer));
        }
        self.find_node(&id, timeout).await
    }

    async fn ping(&self, peer: &PeerInfo) -> Result<(), BackendError>;

    async fn send_chat_all(&self, text: &str);

    fn bucket_refresh_disabled(&self) -> bool;

    fn set_bucket_refresh_disabled(&self, disabled: bool);

    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------

    fn get_data_local(&self, hash: &Hash256) -> Option<Vec<u8>>;

    fn store_data_local(&self, data: &[u8]) -> Result<Hash256, BackendError>;

    /// Fetches data via the DHT. Returns the data and the node that sent it.
    async fn get_data_dht(&self, hash: &Hash256)
        -> Result<Option<(Vec<u8>, NodeId)>, BackendError>;

    async fn store_data_dht(&self, data: &[u8]) -> Result<Hash256, BackendError>;

    /// Size of a file in the local warehouse, `None` if it is not stored.
    fn local_file_size(&self, hash: &Hash256) -> Option<u64>;

    /// Reads from a file in the local warehouse at `offset`.
    async fn read_local_file(
        &self,
        hash: &Hash256,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, BackendError>;

    fn search_index(&self, text: &str) -> Vec<SearchResult>;

    // -------------------------------------------------------------------------
    // Transfers
    // -------------------------------------------------------------------------

    async fn request_file_transfer(
        &self,
        peer: &PeerInfo,
        hash: &Hash256,
    ) -> Result<Box<dyn TransferStream>, BackendError>;

    /// Requests a block range of `blockchain` from `peer`.
    async fn request_block(
        &self,
        peer: &PeerInfo,
        blockchain: &PublicKey,
        range: BlockRange,
        max_block_size: u64,
    ) -> Result<BlockReply, BackendError>;

    fn decode_block(&self, raw: &[u8]) -> Result<DecodedBlock, BackendError>;

    /// Transfer sessions currently known to the backend.
    fn transfers(&self) -> Vec<TransferSnapshot>;

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Installs the event hooks. Replaces any previously installed set.
    fn register_hooks(&self, hooks: EventHooks);
}
