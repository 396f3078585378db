//! # In-Memory Backend
//!
//! A self-contained [`NetworkBackend`] with no network underneath. It hosts
//! the console when no node is attached, and it is the backend every test
//! runs against.
//!
//! Lookups, DHT reads and pings raise the same events a real node would,
//! so event filters and watch commands behave as they do on a live node.

use crate::domain::{
    BackendError, BlockAvailability, BlockRange, BlockReply, ConnectionInfo, ConnectionStatus,
    DecodedBlock, FeatureSet, Hash256, InboundMessage, KeyPair, MessageCommand, NetworkInfo,
    NodeId, OutboundMessage, PeerInfo, PublicKey, SearchResult, SearchStep, TerminateReason,
    TransferHeader, TransferMetrics, TransferSnapshot, PUBLIC_KEY_SIZE,
};
use crate::ports::{EventHooks, NetworkBackend, TransferStream};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prefix of the raw block encoding used by this backend.
const BLOCK_MAGIC: &[u8] = b"QCBK";

/// Number of search steps raised by every lookup.
pub const LOOKUP_STEPS: usize = 3;

struct RemoteFile {
    data: Arc<Vec<u8>>,
    header: TransferHeader,
    served: Arc<AtomicU64>,
    /// Reported by the stream once the data runs out.
    end_reason: TerminateReason,
}

pub struct InMemoryBackend {
    key_pair: KeyPair,
    user_agent: String,
    features: FeatureSet,
    networks: RwLock<Vec<NetworkInfo>>,
    /// Local routing table.
    peers: RwLock<HashMap<NodeId, PeerInfo>>,
    /// Peers only reachable through a lookup.
    remote_peers: RwLock<HashMap<NodeId, PeerInfo>>,
    warehouse: RwLock<HashMap<Hash256, Vec<u8>>>,
    dht: RwLock<HashMap<Hash256, (Vec<u8>, NodeId)>>,
    remote_files: RwLock<HashMap<Hash256, RemoteFile>>,
    blocks: RwLock<HashMap<(PublicKey, u64), DecodedBlock>>,
    index: RwLock<Vec<SearchResult>>,
    transfers: RwLock<Vec<TransferSnapshot>>,
    chats: RwLock<Vec<String>>,
    hooks: RwLock<Option<EventHooks>>,
    bucket_refresh_disabled: AtomicBool,
    lookup_delay: RwLock<Duration>,
    lookups: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            user_agent: format!("{}/{}", crate::APP_NAME, crate::VERSION),
            features: FeatureSet {
                ipv4_listen: true,
                ipv6_listen: false,
                firewall: false,
            },
            networks: RwLock::new(Vec::new()),
            peers: RwLock::new(HashMap::new()),
            remote_peers: RwLock::new(HashMap::new()),
            warehouse: RwLock::new(HashMap::new()),
            dht: RwLock::new(HashMap::new()),
            remote_files: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
            index: RwLock::new(Vec::new()),
            transfers: RwLock::new(Vec::new()),
            chats: RwLock::new(Vec::new()),
            hooks: RwLock::new(None),
            bucket_refresh_disabled: AtomicBool::new(false),
            lookup_delay: RwLock::new(Duration::ZERO),
            lookups: AtomicUsize::new(0),
        }
    }

    /// A peer with one active loopback connection.
    pub fn connected_peer(public_key: PublicKey) -> PeerInfo {
        let now = Utc::now();
        let mut peer = PeerInfo::new(public_key);
        peer.user_agent = "memory-peer".to_string();
        peer.active_connections.push(ConnectionInfo {
            status: ConnectionStatus::Active,
            adapter: "lo".to_string(),
            local: SocketAddr::from(([127, 0, 0, 1], 112)),
            remote: SocketAddr::from(([127, 0, 0, 1], 113)),
            last_packet_in: now,
            last_packet_out: now,
            rtt: Some(Duration::from_millis(1)),
            port_internal: 113,
            port_external: 0,
        });
        peer
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    pub fn add_network(&self, network: NetworkInfo) {
        self.networks.write().push(network);
    }

    /// Adds a peer to the local routing table.
    pub fn add_peer(&self, peer: PeerInfo) {
        self.peers.write().insert(peer.node_id(), peer);
    }

    /// Adds a peer that only a DHT lookup finds.
    pub fn add_remote_peer(&self, peer: PeerInfo) {
        self.remote_peers.write().insert(peer.node_id(), peer);
    }

    /// Makes `data` available for transfer from any peer.
    pub fn add_remote_file(&self, hash: Hash256, data: Vec<u8>) {
        let size = data.len() as u64;
        self.add_remote_file_with_header(
            hash,
            data,
            TransferHeader {
                file_size: size,
                transfer_size: size,
            },
        );
    }

    /// Like [`add_remote_file`](Self::add_remote_file) with an explicit
    /// transfer header, which may disagree with the data.
    pub fn add_remote_file_with_header(&self, hash: Hash256, data: Vec<u8>, header: TransferHeader) {
        self.remote_files.write().insert(
            hash,
            RemoteFile {
                data: Arc::new(data),
                header,
                served: Arc::new(AtomicU64::new(0)),
                end_reason: TerminateReason::None,
            },
        );
    }

    /// Makes streams of the remote file `hash` report `reason` when its
    /// data runs out, as a remote that shuts the transfer down would.
    pub fn set_remote_end_reason(&self, hash: &Hash256, reason: TerminateReason) {
        if let Some(file) = self.remote_files.write().get_mut(hash) {
            file.end_reason = reason;
        }
    }

    /// Bytes of the remote file `hash` handed out so far.
    pub fn remote_bytes_served(&self, hash: &Hash256) -> u64 {
        self.remote_files
            .read()
            .get(hash)
            .map_or(0, |file| file.served.load(Ordering::Relaxed))
    }

    /// Publishes block `block.number` of `blockchain`.
    pub fn add_block(&self, blockchain: PublicKey, block: DecodedBlock) {
        self.blocks.write().insert((blockchain, block.number), block);
    }

    pub fn add_index_entry(&self, result: SearchResult) {
        self.index.write().push(result);
    }

    pub fn add_transfer(&self, transfer: TransferSnapshot) {
        self.transfers.write().push(transfer);
    }

    /// Delays every lookup, to test timeouts and cancellation.
    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.write() = delay;
    }

    /// Number of DHT lookups started so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn chats(&self) -> Vec<String> {
        self.chats.read().clone()
    }

    // -------------------------------------------------------------------------
    // Event emission
    // -------------------------------------------------------------------------

    fn hooks(&self) -> Option<EventHooks> {
        self.hooks.read().clone()
    }

    /// Raises the search steps of one lookup for `key`.
    fn emit_lookup(&self, operation: &str, key: &[u8]) {
        let Some(hooks) = self.hooks() else {
            return;
        };
        let self_id = self.key_pair.node_id();
        let hook = &hooks.search_status;
        hook.on_search_step(&SearchStep::new(
            operation,
            key,
            format_args!("Start lookup of {} bytes key", key.len()),
        ));
        hook.on_search_step(&SearchStep::new(
            "search.startSearch",
            key,
            format_args!("Search with {} known contacts", self.peers.read().len()),
        ));
        hook.on_search_step(&SearchStep::new(
            "search.sendInfoRequest",
            key,
            format_args!("Send info request from {self_id}"),
        ));
    }

    fn emit_ping(&self, peer: &PeerInfo) {
        let Some(hooks) = self.hooks() else {
            return;
        };
        hooks.message_out.on_message_out(&OutboundMessage {
            receiver: &peer.identity,
            command: MessageCommand::Ping,
            decoded: None,
        });
        hooks.message_in.on_message_in(&InboundMessage {
            peer: &peer.identity,
            command: MessageCommand::Pong,
            sender_public_key: peer.identity.public_key,
            decoded: None,
        });
    }

    fn encode_block(blockchain: &PublicKey, number: u64) -> Vec<u8> {
        let mut raw = Vec::with_capacity(BLOCK_MAGIC.len() + PUBLIC_KEY_SIZE + 8);
        raw.extend_from_slice(BLOCK_MAGIC);
        raw.extend_from_slice(blockchain.as_bytes());
        raw.extend_from_slice(&number.to_be_bytes());
        raw
    }
}

#[async_trait]
impl NetworkBackend for InMemoryBackend {
    fn key_pair(&self) -> KeyPair {
        self.key_pair.clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn features(&self) -> FeatureSet {
        self.features
    }

    fn networks(&self) -> Vec<NetworkInfo> {
        self.networks.read().clone()
    }

    fn list_peers(&self) -> Vec<PeerInfo> {
        self.peers.read().values().cloned().collect()
    }

    fn is_known_contact(&self, id: &NodeId) -> Option<PeerInfo> {
        self.peers.read().get(id).cloned()
    }

    async fn find_node(
        &self,
        id: &NodeId,
        timeout: Duration,
    ) -> Result<Option<PeerInfo>, BackendError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.emit_lookup("dht.FindNode", id.as_bytes());

        let delay = *self.lookup_delay.read();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(BackendError::Timeout(timeout));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let found = self.remote_peers.read().get(id).cloned();
        if let Some(peer) = &found {
            debug!(peer = %id, "Lookup found peer");
            self.peers.write().insert(*id, peer.clone());
        }
        Ok(found)
    }

    async fn ping(&self, peer: &PeerInfo) -> Result<(), BackendError> {
        self.emit_ping(peer);
        Ok(())
    }

    async fn send_chat_all(&self, text: &str) {
        self.chats.write().push(text.to_string());
        if let Some(hooks) = self.hooks() {
            for peer in self.list_peers() {
                hooks.message_out.on_message_out(&OutboundMessage {
                    receiver: &peer.identity,
                    command: MessageCommand::Chat,
                    decoded: None,
                });
            }
        }
    }

    fn bucket_refresh_disabled(&self) -> bool {
        self.bucket_refresh_disabled.load(Ordering::Relaxed)
    }

    fn set_bucket_refresh_disabled(&self, disabled: bool) {
        self.bucket_refresh_disabled.store(disabled, Ordering::Relaxed);
    }

    fn get_data_local(&self, hash: &Hash256) -> Option<Vec<u8>> {
        self.warehouse.read().get(hash).cloned()
    }

    fn store_data_local(&self, data: &[u8]) -> Result<Hash256, BackendError> {
        let hash = Hash256::digest(data);
        self.warehouse.write().insert(hash, data.to_vec());
        Ok(hash)
    }

    async fn get_data_dht(
        &self,
        hash: &Hash256,
    ) -> Result<Option<(Vec<u8>, NodeId)>, BackendError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.emit_lookup("dht.Get", hash.as_bytes());
        Ok(self.dht.read().get(hash).cloned())
    }

    async fn store_data_dht(&self, data: &[u8]) -> Result<Hash256, BackendError> {
        let hash = Hash256::digest(data);
        self.emit_lookup("dht.Store", hash.as_bytes());
        self.dht
            .write()
            .insert(hash, (data.to_vec(), self.key_pair.node_id()));
        Ok(hash)
    }

    fn local_file_size(&self, hash: &Hash256) -> Option<u64> {
        self.warehouse.read().get(hash).map(|data| data.len() as u64)
    }

    async fn read_local_file(
        &self,
        hash: &Hash256,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, BackendError> {
        let warehouse = self.warehouse.read();
        let data = warehouse
            .get(hash)
            .ok_or_else(|| BackendError::Storage(format!("file {hash} not found")))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    fn search_index(&self, text: &str) -> Vec<SearchResult> {
        let needle = text.to_lowercase();
        self.index
            .read()
            .iter()
            .filter(|result| {
                result
                    .keywords
                    .iter()
                    .any(|keyword| keyword.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    async fn request_file_transfer(
        &self,
        peer: &PeerInfo,
        hash: &Hash256,
    ) -> Result<Box<dyn TransferStream>, BackendError> {
        if !peer.is_connection_active() {
            return Err(BackendError::Unreachable(peer.node_id().to_hex()));
        }
        let stream = match self.remote_files.read().get(hash) {
            Some(file) => MemoryTransferStream::serving(file),
            None => MemoryTransferStream::not_stored(),
        };
        Ok(Box::new(stream))
    }

    async fn request_block(
        &self,
        peer: &PeerInfo,
        blockchain: &PublicKey,
        range: BlockRange,
        max_block_size: u64,
    ) -> Result<BlockReply, BackendError> {
        if !peer.is_connection_active() {
            return Err(BackendError::Unreachable(peer.node_id().to_hex()));
        }
        if !self.blocks.read().contains_key(&(*blockchain, range.offset)) {
            return Ok(BlockReply {
                data: Vec::new(),
                target: range,
                block_size: 0,
                availability: BlockAvailability::NotAvailable,
            });
        }

        let data = Self::encode_block(blockchain, range.offset);
        let block_size = data.len() as u64;
        let availability = if block_size > max_block_size {
            BlockAvailability::SizeExceed
        } else {
            BlockAvailability::Available
        };
        Ok(BlockReply {
            data,
            target: BlockRange {
                offset: range.offset,
                limit: 1,
            },
            block_size,
            availability,
        })
    }

    fn decode_block(&self, raw: &[u8]) -> Result<DecodedBlock, BackendError> {
        let invalid = || BackendError::Other("invalid block encoding".to_string());
        let body = raw.strip_prefix(BLOCK_MAGIC).ok_or_else(invalid)?;
        if body.len() != PUBLIC_KEY_SIZE + 8 {
            return Err(invalid());
        }
        let (key, number) = body.split_at(PUBLIC_KEY_SIZE);
        let blockchain = PublicKey::from_bytes(key).map_err(|_| invalid())?;
        let number = u64::from_be_bytes(number.try_into().map_err(|_| invalid())?);
        self.blocks
            .read()
            .get(&(blockchain, number))
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    fn transfers(&self) -> Vec<TransferSnapshot> {
        self.transfers.read().clone()
    }

    fn register_hooks(&self, hooks: EventHooks) {
        *self.hooks.write() = Some(hooks);
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("node_id", &self.key_pair.node_id())
            .field("peers", &self.peers.read().len())
            .field("warehouse", &self.warehouse.read().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Transfer stream
// =============================================================================

struct MemoryTransferStream {
    data: Arc<Vec<u8>>,
    /// `None` when the remote does not store the file.
    header: Option<TransferHeader>,
    position: usize,
    served: Arc<AtomicU64>,
    closed: bool,
    end_reason: TerminateReason,
    terminate_reason: TerminateReason,
    metrics: TransferMetrics,
}

impl MemoryTransferStream {
    fn serving(file: &RemoteFile) -> Self {
        Self {
            data: Arc::clone(&file.data),
            header: Some(file.header),
            position: 0,
            served: Arc::clone(&file.served),
            closed: false,
            end_reason: file.end_reason,
            terminate_reason: TerminateReason::None,
            metrics: fresh_metrics(),
        }
    }

    fn not_stored() -> Self {
        Self {
            data: Arc::new(Vec::new()),
            header: None,
            position: 0,
            served: Arc::new(AtomicU64::new(0)),
            closed: false,
            end_reason: TerminateReason::FileNotStored,
            terminate_reason: TerminateReason::FileNotStored,
            metrics: fresh_metrics(),
        }
    }
}

fn fresh_metrics() -> TransferMetrics {
    TransferMetrics {
        data: Default::default(),
        handshake: Default::default(),
        shutdown: Default::default(),
        ack: Default::default(),
        nak: Default::default(),
        ack2: Default::default(),
        data_packets: Default::default(),
        speed_send: 0.0,
        speed_receive: 0.0,
        started: Utc::now(),
    }
}

#[async_trait]
impl TransferStream for MemoryTransferStream {
    async fn read_header(&mut self) -> Result<TransferHeader, BackendError> {
        self.header.ok_or_else(|| {
            BackendError::Transfer(self.terminate_reason.describe().to_string())
        })
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        if self.closed {
            return Err(BackendError::StreamClosed);
        }
        let len = buf.len().min(self.data.len() - self.position);
        buf[..len].copy_from_slice(&self.data[self.position..self.position + len]);
        self.position += len;
        self.served.fetch_add(len as u64, Ordering::Relaxed);
        self.metrics.data.received += len as u64;
        self.metrics.data_packets.received += 1;
        if len == 0 && !self.terminate_reason.is_terminated() {
            self.terminate_reason = self.end_reason;
        }
        Ok(len)
    }

    fn terminate_reason(&self) -> TerminateReason {
        self.terminate_reason
    }

    fn metrics(&self) -> Option<TransferMetrics> {
        Some(self.metrics.clone())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if !self.terminate_reason.is_terminated() {
                self.terminate_reason = TerminateReason::Signal;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockRecord, KeyRegistry, MonitorKey, OutputSink, BufferWriter};
    use crate::service::filters::{ErrorOutputSwitch, EventFilters};

    fn make_backend() -> InMemoryBackend {
        InMemoryBackend::new(KeyPair::generate())
    }

    #[tokio::test]
    async fn test_lookup_promotes_remote_peer() {
        let backend = make_backend();
        let peer = InMemoryBackend::connected_peer(KeyPair::generate().public_key());
        backend.add_remote_peer(peer.clone());

        assert!(backend.is_known_contact(&peer.node_id()).is_none());
        let found = backend
            .find_node(&peer.node_id(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(found.map(|p| p.node_id()), Some(peer.node_id()));
        assert!(backend.is_known_contact(&peer.node_id()).is_some());
        assert_eq!(backend.lookups(), 1);
    }

    #[tokio::test]
    async fn test_lookup_times_out() {
        let backend = make_backend();
        backend.set_lookup_delay(Duration::from_secs(5));
        let err = backend
            .find_node(&NodeId::new([1; 32]), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_lookup_raises_search_steps() {
        let backend = make_backend();
        let registry = Arc::new(KeyRegistry::new());
        let buffer = BufferWriter::new();
        let filters = Arc::new(EventFilters::new(
            Arc::clone(&registry),
            OutputSink::stdout(),
            Arc::new(ErrorOutputSwitch::new(Default::default())),
        ));
        backend.register_hooks(EventHooks::from_shared(filters));
        registry.add(MonitorKey::all_searches(), OutputSink::from(buffer.clone()));

        backend
            .find_node(&NodeId::new([0xAA; 32]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(buffer.drain().lines().count(), LOOKUP_STEPS);
    }

    #[tokio::test]
    async fn test_block_round_trip_through_decoder() {
        let backend = make_backend();
        let owner = KeyPair::generate().public_key();
        let peer = InMemoryBackend::connected_peer(owner);
        backend.add_block(
            owner,
            DecodedBlock {
                blockchain_version: 1,
                number: 3,
                records: vec![BlockRecord::Unknown],
            },
        );

        let reply = backend
            .request_block(&peer, &owner, BlockRange { offset: 3, limit: 1 }, 1024)
            .await
            .unwrap();
        assert_eq!(reply.availability, BlockAvailability::Available);
        let block = backend.decode_block(&reply.data).unwrap();
        assert_eq!(block.number, 3);

        let missing = backend
            .request_block(&peer, &owner, BlockRange { offset: 4, limit: 1 }, 1024)
            .await
            .unwrap();
        assert_eq!(missing.availability, BlockAvailability::NotAvailable);
    }

    #[tokio::test]
    async fn test_unknown_file_reports_not_stored() {
        let backend = make_backend();
        let peer = InMemoryBackend::connected_peer(KeyPair::generate().public_key());
        let mut stream = backend
            .request_file_transfer(&peer, &Hash256::digest(b"nothing"))
            .await
            .unwrap();
        assert!(stream.read_header().await.is_err());
        assert_eq!(stream.terminate_reason(), TerminateReason::FileNotStored);
    }
}
