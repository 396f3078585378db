//! # Event Filters
//!
//! The hooks the console registers with the backend. Each one derives the
//! monitor keys of the event, asks the registry, and only then renders the
//! trace text into the sink bound to the matching key. An unmonitored event
//! never allocates its rendered text.
//!
//! Filters run on the backend's own tasks. Rendering writes into a `String`
//! through `fmt::Write`, which cannot fail, and a filter never returns an
//! error into the backend.

use crate::domain::{
    abbreviate_key, AddressRecord, Announcement, DecodedMessage, ErrorOutput, InboundMessage,
    IncomingRequest, KeyRegistry, OutboundMessage, OutputSink, PeerHeader, PeerRecord, Response,
    SearchStep, Traverse, ALL_INCOMING_REQUESTS, ALL_SEARCHES,
};
use crate::ports::inbound::{
    ErrorLogHook, IncomingRequestHook, MessageInHook, MessageOutHook, SearchStatusHook,
};
use crate::service::render::format_time;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::error;

/// Runtime-switchable target of backend error reports.
#[derive(Debug)]
pub struct ErrorOutputSwitch(AtomicU8);

impl ErrorOutputSwitch {
    pub fn new(output: ErrorOutput) -> Self {
        Self(AtomicU8::new(output.index()))
    }

    pub fn get(&self) -> ErrorOutput {
        ErrorOutput::from_index(i64::from(self.0.load(Ordering::Relaxed))).unwrap_or_default()
    }

    pub fn set(&self, output: ErrorOutput) {
        self.0.store(output.index(), Ordering::Relaxed);
    }
}

/// The console's implementation of every backend event hook.
pub struct EventFilters {
    registry: Arc<KeyRegistry>,
    /// Receives backend error reports routed to the command line.
    console: OutputSink,
    error_output: Arc<ErrorOutputSwitch>,
}

impl EventFilters {
    pub fn new(
        registry: Arc<KeyRegistry>,
        console: OutputSink,
        error_output: Arc<ErrorOutputSwitch>,
    ) -> Self {
        Self {
            registry,
            console,
            error_output,
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }
}

impl fmt::Debug for EventFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilters")
            .field("monitored", &self.registry.len())
            .field("error_output", &self.error_output.get())
            .finish()
    }
}

// =============================================================================
// Search status
// =============================================================================

pub fn render_search_step(step: &SearchStep<'_>) -> String {
    let mut text = String::new();
    let _ = write!(
        text,
        "{} {} [{}] {}",
        step.kind.indent(),
        step.function,
        abbreviate_key(step.key),
        step.message
    );
    let trimmed = text.trim_end_matches('\n').len();
    text.truncate(trimmed);
    text
}

impl SearchStatusHook for EventFilters {
    fn on_search_step(&self, step: &SearchStep<'_>) {
        let Some(sink) = self.registry.is_monitored(&[step.key, ALL_SEARCHES]) else {
            return;
        };
        sink.line(render_search_step(step));
    }
}

// =============================================================================
// Incoming requests
// =============================================================================

pub fn render_incoming_request(request: &IncomingRequest<'_>) -> String {
    if request.is_self_lookup() {
        format!(
            "Info request from {} {}",
            request.peer,
            request.action.label()
        )
    } else {
        format!(
            "Info request from {} {} for key {}",
            request.peer,
            request.action.label(),
            hex::encode(request.key)
        )
    }
}

impl IncomingRequestHook for EventFilters {
    fn on_incoming_request(&self, request: &IncomingRequest<'_>) {
        let Some(sink) = self
            .registry
            .is_monitored(&[request.peer.as_bytes(), ALL_INCOMING_REQUESTS])
        else {
            return;
        };
        sink.line(render_incoming_request(request));
    }
}

// =============================================================================
// Protocol messages
// =============================================================================

fn write_header(text: &mut String, header: &PeerHeader) {
    let _ = writeln!(text, "Fields:\n  Protocol supported    {}", header.protocol);
    let _ = writeln!(text, "  Feature bits          {}", header.features);
    let _ = writeln!(text, "  Action bits           {}", header.actions);
    let _ = writeln!(text, "  Blockchain Height     {}", header.blockchain_height);
    let _ = writeln!(text, "  Blockchain Version    {}", header.blockchain_version);
    let _ = writeln!(text, "  Port Internal         {}", header.port_internal);
    let _ = writeln!(text, "  Port External         {}", header.port_external);
    let _ = writeln!(text, "  User Agent            {}", header.user_agent);
}

fn write_announcement(text: &mut String, announce: &Announcement) {
    write_header(text, &announce.header);
    if !announce.find_peer.is_empty() {
        let _ = writeln!(text, "FIND_PEER {} records:", announce.find_peer.len());
    }
    for hash in &announce.find_peer {
        let _ = writeln!(text, "    - Find peer {hash}");
    }
    if !announce.find_data.is_empty() {
        let _ = writeln!(text, "FIND_VALUE {} records:", announce.find_data.len());
    }
    for hash in &announce.find_data {
        let _ = writeln!(text, "    - Find data {hash}");
    }
    if !announce.info_store.is_empty() {
        let _ = writeln!(text, "INFO_STORE {} records:", announce.info_store.len());
    }
    for info in &announce.info_store {
        let _ = writeln!(
            text,
            "    - Info store {}, type {}, size {}",
            info.hash, info.file_type, info.size
        );
    }
}

fn write_address(text: &mut String, family: &str, address: &AddressRecord) {
    let _ = writeln!(text, "        {family:<32}{}", address.ip);
    let _ = writeln!(text, "        {:<32}{}", format!("Port {family}"), address.port);
    let _ = writeln!(
        text,
        "        {:<32}{}",
        format!("Port {family} Reported Internal"),
        address.reported_internal
    );
    let _ = writeln!(
        text,
        "        {:<32}{}",
        format!("Port {family} Reported External"),
        address.reported_external
    );
}

fn write_peer_record(text: &mut String, record: &PeerRecord) {
    let _ = writeln!(text, "      * Peer ID                         {}", record.public_key);
    let _ = writeln!(text, "        Node ID                         {}", record.node_id);
    if let Some(address) = record.ipv4.as_ref().filter(|a| !a.ip.is_unspecified()) {
        write_address(text, "IPv4", address);
    }
    if let Some(address) = record.ipv6.as_ref().filter(|a| !a.ip.is_unspecified()) {
        write_address(text, "IPv6", address);
    }
    let _ = writeln!(
        text,
        "        Last Contact                    {}",
        format_time(&record.last_contact)
    );
}

fn write_response(text: &mut String, response: &Response) {
    write_header(text, &response.header);
    for hash in &response.hash_peers {
        let last = if hash.is_last {
            " [last result in sequence]"
        } else {
            ""
        };
        let _ = writeln!(text, "    - Peers known for the hash {}{}", hash.hash, last);
        for record in &hash.closest {
            text.push_str("      Close peer:\n");
            write_peer_record(text, record);
        }
        for record in &hash.storing {
            text.push_str("      Peer stores:\n");
            write_peer_record(text, record);
        }
    }
    for file in &response.files_embedded {
        let _ = writeln!(text, "    - File embedded {} ({} bytes)", file.hash, file.size);
    }
    for hash in &response.hashes_not_found {
        let _ = writeln!(text, "    - Hash not found {hash}");
    }
}

fn write_traverse(text: &mut String, traverse: &Traverse) {
    let _ = writeln!(text, "Fields:\n  Target Peer                     {}", traverse.target_peer);
    let _ = writeln!(text, "  Authorized Relay Peer           {}", traverse.authorized_relay);
    let _ = writeln!(text, "  Signer Public Key               {}", traverse.signer);
    let _ = writeln!(text, "  Expires                         {}", traverse.expires);
    let _ = writeln!(text, "  IPv4                            {}", traverse.ipv4);
    let _ = writeln!(text, "  Port IPv4                       {}", traverse.port_ipv4);
    let _ = writeln!(
        text,
        "  Port IPv4 Reported External     {}",
        traverse.port_ipv4_reported_external
    );
    let _ = writeln!(text, "  IPv6                            {}", traverse.ipv6);
    let _ = writeln!(text, "  Port IPv6                       {}", traverse.port_ipv6);
    let _ = writeln!(
        text,
        "  Port IPv6 Reported External     {}",
        traverse.port_ipv6_reported_external
    );
}

fn write_decoded(text: &mut String, decoded: Option<&DecodedMessage>) {
    match decoded {
        None => text.push_str("(no message decoded)\n"),
        Some(DecodedMessage::Announcement(announce)) => write_announcement(text, announce),
        Some(DecodedMessage::Response(response)) => write_response(text, response),
        Some(DecodedMessage::Traverse(traverse)) => write_traverse(text, traverse),
        Some(DecodedMessage::Unrecognized { payload_len }) => {
            let _ = writeln!(text, "(unrecognized payload, {payload_len} bytes)");
        }
    }
}

pub fn render_message_in(message: &InboundMessage<'_>) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "-------- Node {} Incoming {} --------",
        message.peer.node_id,
        message.command.label()
    );
    let _ = writeln!(text, "Sender Peer ID: {}", message.peer.public_key);
    if message.sender_mismatch() {
        let _ = writeln!(
            text,
            "WARNING: Mismatch of public keys, sender {} and packet indicates {}",
            message.peer.public_key, message.sender_public_key
        );
    }
    write_decoded(&mut text, message.decoded);
    text.push_str("--------\n");
    text
}

pub fn render_message_out(message: &OutboundMessage<'_>) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "-------- Node {} Outgoing {} --------",
        message.receiver.node_id,
        message.command.label()
    );
    let _ = writeln!(text, "Receiver Peer ID: {}", message.receiver.public_key);
    if let Some(decoded) = message.decoded {
        write_decoded(&mut text, Some(decoded));
    }
    text.push_str("--------\n");
    text
}

impl MessageInHook for EventFilters {
    fn on_message_in(&self, message: &InboundMessage<'_>) {
        let Some(sink) = self
            .registry
            .is_monitored(&[message.peer.node_id.as_bytes()])
        else {
            return;
        };
        sink.write(render_message_in(message));
    }
}

impl MessageOutHook for EventFilters {
    fn on_message_out(&self, message: &OutboundMessage<'_>) {
        let Some(sink) = self
            .registry
            .is_monitored(&[message.receiver.node_id.as_bytes()])
        else {
            return;
        };
        sink.write(render_message_out(message));
    }
}

// =============================================================================
// Error log
// =============================================================================

impl ErrorLogHook for EventFilters {
    fn on_error(&self, function: &str, message: fmt::Arguments<'_>) {
        let output = self.error_output.get();
        if output.to_log() {
            error!(function, "{}", message);
        }
        if output.to_console() {
            self.console.line(format!("Error in {function}: {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BufferWriter, HashPeers, KeyPair, MessageCommand, MonitorKey, NodeId, PeerIdentity,
        RequestAction,
    };
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn make_filters() -> (EventFilters, Arc<BufferWriter>) {
        let console = BufferWriter::new();
        let filters = EventFilters::new(
            Arc::new(KeyRegistry::new()),
            OutputSink::from(console.clone()),
            Arc::new(ErrorOutputSwitch::new(ErrorOutput::LogFile)),
        );
        (filters, console)
    }

    fn make_identity() -> PeerIdentity {
        PeerIdentity::from_public_key(KeyPair::generate().public_key())
    }

    // =========================================================================
    // Search steps
    // =========================================================================

    #[test]
    fn test_unmonitored_search_step_writes_nothing() {
        let (filters, _) = make_filters();
        let out = BufferWriter::new();
        filters
            .registry()
            .add(MonitorKey::from_slice(&[1; 32]), OutputSink::from(out.clone()));

        filters.on_search_step(&SearchStep::new("dht.Get", &[2; 32], format_args!("x\n")));
        assert!(out.contents().is_empty());
    }

    #[test]
    fn test_search_step_by_key_and_by_sentinel() {
        let (filters, _) = make_filters();
        let out = BufferWriter::new();
        filters
            .registry()
            .add(MonitorKey::all_searches(), OutputSink::from(out.clone()));

        let key = [0xAA; 32];
        filters.on_search_step(&SearchStep::new(
            "search.startSearch",
            &key,
            format_args!("start {} peers\n", 3),
        ));

        assert_eq!(
            out.drain(),
            "  > search.startSearch [aaaaaaaaaaaaaaaa] start 3 peers\n"
        );
    }

    #[test]
    fn test_search_step_indentation() {
        let step = SearchStep::new("search.sendInfoRequest", &[1; 4], format_args!("to peer"));
        assert_eq!(render_search_step(&step), "    > search.sendInfoRequest [01010101] to peer");
        let step = SearchStep::new("dht.Store", &[1; 4], format_args!(""));
        assert!(render_search_step(&step).starts_with(" - dht.Store"));
    }

    // =========================================================================
    // Incoming requests
    // =========================================================================

    #[test]
    fn test_incoming_request_phrasing() {
        let peer = NodeId::new([3; 32]);
        let own = IncomingRequest {
            peer,
            action: RequestAction::FindSelf,
            key: peer.as_bytes(),
        };
        assert_eq!(
            render_incoming_request(&own),
            format!("Info request from {peer} FIND_SELF")
        );

        let other = IncomingRequest {
            peer,
            action: RequestAction::FindValue,
            key: &[4; 32],
        };
        assert!(render_incoming_request(&other).ends_with(&format!("for key {}", "04".repeat(32))));
    }

    #[test]
    fn test_incoming_request_needs_peer_or_sentinel() {
        let (filters, _) = make_filters();
        let out = BufferWriter::new();
        let peer = NodeId::new([5; 32]);
        let request = IncomingRequest {
            peer,
            action: RequestAction::FindPeer,
            key: &[6; 32],
        };

        filters.on_incoming_request(&request);
        assert!(out.contents().is_empty());

        filters
            .registry()
            .add(MonitorKey::all_incoming_requests(), OutputSink::from(out.clone()));
        filters.on_incoming_request(&request);
        assert!(out.drain().contains("FIND_PEER"));
    }

    // =========================================================================
    // Messages
    // =========================================================================

    #[test]
    fn test_message_in_flags_sender_mismatch() {
        let peer = make_identity();
        let claimed = KeyPair::generate().public_key();
        let message = InboundMessage {
            peer: &peer,
            command: MessageCommand::Ping,
            sender_public_key: claimed,
            decoded: None,
        };

        let text = render_message_in(&message);
        assert!(text.starts_with(&format!("-------- Node {} Incoming Ping", peer.node_id)));
        assert!(text.contains(&format!("packet indicates {claimed}")));
        assert!(text.contains("(no message decoded)"));
        assert!(text.ends_with("--------\n"));
    }

    #[test]
    fn test_message_in_response_fields() {
        let peer = make_identity();
        let record = PeerRecord {
            public_key: peer.public_key,
            node_id: peer.node_id,
            ipv4: Some(AddressRecord {
                ip: IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
                port: 112,
                reported_internal: 112,
                reported_external: 5000,
            }),
            ipv6: Some(AddressRecord {
                ip: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                port: 0,
                reported_internal: 0,
                reported_external: 0,
            }),
            last_contact: Utc::now(),
        };
        let decoded = DecodedMessage::Response(Response {
            header: PeerHeader {
                user_agent: "Node/1.0".into(),
                ..PeerHeader::default()
            },
            hash_peers: vec![HashPeers {
                hash: crate::domain::Hash256([9; 32]),
                closest: vec![record],
                storing: Vec::new(),
                is_last: true,
            }],
            files_embedded: Vec::new(),
            hashes_not_found: vec![crate::domain::Hash256([8; 32])],
        });
        let message = InboundMessage {
            peer: &peer,
            command: MessageCommand::Response,
            sender_public_key: peer.public_key,
            decoded: Some(&decoded),
        };

        let text = render_message_in(&message);
        assert!(!text.contains("WARNING"));
        assert!(text.contains("User Agent            Node/1.0"));
        assert!(text.contains("[last result in sequence]"));
        assert!(text.contains("Port IPv4 Reported External     5000"));
        assert!(!text.contains("IPv6"));
        assert!(text.contains(&format!("Hash not found {}", "08".repeat(32))));
    }

    #[test]
    fn test_message_filters_ignore_sentinels() {
        let (filters, _) = make_filters();
        let out = BufferWriter::new();
        let sink = OutputSink::from(out.clone());
        filters.registry().add(MonitorKey::all_searches(), sink.clone());
        filters
            .registry()
            .add(MonitorKey::all_incoming_requests(), sink);

        let peer = make_identity();
        filters.on_message_out(&OutboundMessage {
            receiver: &peer,
            command: MessageCommand::Pong,
            decoded: None,
        });
        assert!(out.contents().is_empty());

        filters
            .registry()
            .add(MonitorKey::from(peer.node_id), OutputSink::from(out.clone()));
        filters.on_message_out(&OutboundMessage {
            receiver: &peer,
            command: MessageCommand::Pong,
            decoded: None,
        });
        assert!(out.drain().contains("Outgoing Pong"));
    }

    #[test]
    fn test_error_routing() {
        let (filters, console) = make_filters();
        filters.on_error("store", format_args!("disk full"));
        assert!(console.contents().is_empty());

        filters.error_output.set(ErrorOutput::CommandLine);
        filters.on_error("store", format_args!("disk full"));
        assert_eq!(console.drain(), "Error in store: disk full\n");

        filters.error_output.set(ErrorOutput::None);
        filters.on_error("store", format_args!("disk full"));
        assert!(console.contents().is_empty());
    }
}
