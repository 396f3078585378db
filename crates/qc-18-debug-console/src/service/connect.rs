//! Resolving operator-named peers.
//!
//! Every lookup here races the caller's cancellation token, and every key
//! watched for the duration of a lookup is held by a [`WatchGuard`], so it
//! is unwatched on success, failure, timeout and cancellation alike.

use crate::domain::{
    ConnectError, KeyRegistry, MonitorKey, NodeId, OutputSink, PeerInfo, PeerTarget,
};
use crate::ports::NetworkBackend;
use crate::service::render::{format_duration, peer_connections};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs `future` unless `cancel` fires first.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

/// Parses `text` as a peer ID or node ID and rejects the local node.
pub fn parse_target(text: &str, self_id: &NodeId) -> Result<PeerTarget, ConnectError> {
    let target = PeerTarget::parse(text)?;
    if target.node_id() == *self_id {
        return Err(ConnectError::SelfTarget);
    }
    Ok(target)
}

/// Finds a peer: routing table first, then a bounded DHT lookup.
pub async fn resolve_peer(
    backend: &dyn NetworkBackend,
    target: PeerTarget,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PeerInfo, ConnectError> {
    let node_id = target.node_id();
    if let Some(peer) = backend.is_known_contact(&node_id) {
        return Ok(peer);
    }

    debug!(peer = %node_id, "Resolving peer via DHT");
    let lookup = async {
        match target {
            PeerTarget::PublicKey(key) => backend.find_peer(&key, timeout).await,
            PeerTarget::NodeId(id) => backend.find_node(&id, timeout).await,
        }
    };
    match until_cancelled(cancel, lookup).await {
        None => Err(ConnectError::Cancelled),
        Some(Ok(Some(peer))) => Ok(peer),
        Some(Ok(None)) => Err(ConnectError::NotFound(node_id)),
        Some(Err(e)) => Err(e.into()),
    }
}

/// Writes the closing frame line however `debug_connect` returns.
struct Frame<'a> {
    output: &'a OutputSink,
    node_id: NodeId,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.output.line(format!(
            "---------------- done node {} ----------------",
            self.node_id
        ));
    }
}

/// The `debug connect` command.
///
/// A node that is not in the routing table is watched for the duration of
/// the lookup, so the lookup's packets are traced to `output`.
pub async fn debug_connect(
    backend: &dyn NetworkBackend,
    registry: &Arc<KeyRegistry>,
    output: &OutputSink,
    node_id: NodeId,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PeerInfo, ConnectError> {
    output.line(format!(
        "---------------- Connect to node {node_id} ----------------"
    ));
    let _frame = Frame { output, node_id };

    let peer = match backend.is_known_contact(&node_id) {
        Some(peer) => {
            output.line("* In local routing table: Yes.");
            peer
        }
        None => {
            output.line(format!(
                "* In local routing table: No. Lookup via DHT. Timeout = {}.",
                format_duration(timeout)
            ));

            let _watch = registry.watch_temporarily(MonitorKey::from(node_id), output.clone());

            match until_cancelled(cancel, backend.find_node(&node_id, timeout)).await {
                None => {
                    output.line("* Lookup cancelled.");
                    return Err(ConnectError::Cancelled);
                }
                Some(Err(e)) => {
                    output.line(format!("* Lookup failed: {e}"));
                    return Err(e.into());
                }
                Some(Ok(None)) => {
                    output.line("* Not found via DHT :(");
                    return Err(ConnectError::NotFound(node_id));
                }
                Some(Ok(Some(peer))) => {
                    output.line("* Successfully discovered via DHT.");
                    peer
                }
            }
        }
    };

    output.write(format!(
        "* Peer details:\n  Uncontacted:      {}\n  Root peer:        {}\n  User Agent:       {}\n  Firewall:         {}\n",
        peer.is_virtual, peer.is_root, peer.user_agent, peer.firewall_reported
    ));

    if peer.is_virtual {
        output.line("* Peer is virtual and was not contacted before. Sending out ping.");
        if let Err(e) = backend.ping(&peer).await {
            warn!(peer = %node_id, error = %e, "Ping failed");
            output.line(format!("* Ping failed: {e}"));
        }
    } else {
        output.line("* Connections:");
        output.write(peer_connections(&peer));
    }

    Ok(peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBackend;
    use crate::domain::{BufferWriter, KeyPair};

    fn make_backend() -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend::new(KeyPair::generate()))
    }

    #[test]
    fn test_parse_target_rejects_self() {
        let pair = KeyPair::generate();
        let own = pair.node_id();
        assert!(matches!(
            parse_target(&pair.public_key().to_hex(), &own),
            Err(ConnectError::SelfTarget)
        ));
        assert!(matches!(
            parse_target(&own.to_hex(), &own),
            Err(ConnectError::SelfTarget)
        ));

        let other = KeyPair::generate();
        let target = parse_target(&other.public_key().to_hex(), &own).unwrap();
        assert_eq!(target.node_id(), other.node_id());
        assert_ne!(target.node_id(), own);
    }

    #[tokio::test]
    async fn test_resolve_known_contact_skips_lookup() {
        let backend = make_backend();
        let peer = InMemoryBackend::connected_peer(KeyPair::generate().public_key());
        backend.add_peer(peer.clone());

        let resolved = resolve_peer(
            backend.as_ref(),
            PeerTarget::NodeId(peer.node_id()),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(resolved.node_id(), peer.node_id());
        assert_eq!(backend.lookups(), 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_peer_not_found() {
        let backend = make_backend();
        let id = NodeId::new([7; 32]);
        let err = resolve_peer(
            backend.as_ref(),
            PeerTarget::NodeId(id),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectError::NotFound(found) if found == id));
    }

    #[tokio::test]
    async fn test_debug_connect_unwatches_after_lookup() {
        let backend = make_backend();
        let registry = Arc::new(KeyRegistry::new());
        let buffer = BufferWriter::new();
        let output = OutputSink::from(buffer.clone());
        let remote = InMemoryBackend::connected_peer(KeyPair::generate().public_key());
        backend.add_remote_peer(remote.clone());

        let peer = debug_connect(
            backend.as_ref(),
            &registry,
            &output,
            remote.node_id(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(peer.node_id(), remote.node_id());
        assert!(registry.is_empty());
        let text = buffer.drain();
        assert!(text.contains("* Successfully discovered via DHT."));
        assert!(text.trim_end().ends_with(&format!(
            "---------------- done node {} ----------------",
            remote.node_id()
        )));
    }

    #[tokio::test]
    async fn test_debug_connect_cancel_releases_watch() {
        let backend = make_backend();
        backend.set_lookup_delay(Duration::from_secs(30));
        let registry = Arc::new(KeyRegistry::new());
        let output = OutputSink::from(BufferWriter::new());
        let cancel = CancellationToken::new();
        let id = NodeId::new([9; 32]);

        let canceller = {
            let cancel = cancel.clone();
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                while !registry.contains(&[9; 32]) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let err = debug_connect(
            backend.as_ref(),
            &registry,
            &output,
            id,
            Duration::from_secs(60),
            &cancel,
        )
        .await
        .unwrap_err();

        canceller.await.unwrap();
        assert!(matches!(err, ConnectError::Cancelled));
        assert!(!registry.contains(&[9; 32]));
    }
}
