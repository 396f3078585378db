//! Text rendering for command output.
//!
//! Everything here is a pure function from snapshots to text so that the
//! interpreter and the verifier only decide *what* to print.

use crate::domain::{
    BlockRecord, ConnectionInfo, Counter, DecodedBlock, FeatureSet, FileRecord, FileTag, KeyPair,
    NetworkInfo, PeerInfo, ProfileField, ProfileFieldKind, SearchResult, TransferDirection,
    TransferKind, TransferMetrics, TransferSnapshot, shorten_text,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const HELP_TEXT: &str = "Please enter a command:\n\
help                          Show this help\n\
net list                      Lists all network adapters and their IPs\n\
status                        Get current status\n\
chat                          Send text to all peers\n\
peer list                     List current peers\n\
debug key create              Create Public-Private Key pair\n\
debug key self                List current Public-Private Key pair\n\
debug connect                 Attempts to connect to the target peer\n\
debug watch searches          Watch all outgoing DHT searches\n\
debug watch incoming          Watch all incoming information requests\n\
debug watch                   Watch packets and info requests for hash\n\
debug bucket refresh          Enable or disable DHT bucket refresh\n\
probe file transfer           Attempts to transfer and validate a remote file against a local file\n\
hash                          Create blake3 hash of input\n\
warehouse get                 Get data from local warehouse by hash\n\
warehouse store               Store data into local warehouse\n\
dht get                       Get data via DHT by hash\n\
dht store                     Store data into DHT\n\
get block                     Get block from remote peer\n\
log error                     Set error log output\n\
exit                          Exit\n\
search file                   Search globally for files using the local search index\n\
transfer list                 List of transfers\n\
\n";

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(DATE_FORMAT).to_string()
}

/// Round trip time rounded to milliseconds, or `N/A`.
pub fn format_rtt(rtt: Option<Duration>) -> String {
    match rtt {
        Some(rtt) if !rtt.is_zero() => format_duration(rtt),
        _ => "N/A".to_string(),
    }
}

/// Human readable duration with millisecond precision.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let seconds = duration.as_secs_f64();
    if seconds < 60.0 {
        return format!("{seconds:.3}s");
    }
    let minutes = duration.as_secs() / 60;
    format!("{minutes}m{:.3}s", seconds - (minutes * 60) as f64)
}

fn format_counter(counter: Counter) -> String {
    format!("{}-{}", counter.sent, counter.received)
}

// =============================================================================
// Peers and networks
// =============================================================================

pub fn network_list(networks: &[NetworkInfo]) -> String {
    if networks.is_empty() {
        return "No networks.\n".to_string();
    }
    let mut text = String::new();
    for network in networks {
        let _ = writeln!(text, "Interface {}:", network.adapter);
        let _ = writeln!(text, "  IP:         {}", network.listen.ip());
        let _ = writeln!(text, "  Port:       {}", network.listen.port());
        text.push('\n');
    }
    text
}

fn network_table(networks: &[NetworkInfo]) -> String {
    let mut text = String::from(
        "Listen Address                                  Multicast IP out                  External Address\n",
    );
    for network in networks {
        let broadcast = network
            .broadcast
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let out = match network.multicast {
            Some(ip) if network.listen.is_ipv6() => ip.to_string(),
            _ => broadcast,
        };
        let external = match (network.external_ip, network.external_port) {
            (None, 0) => String::new(),
            (Some(ip), 0) => format!("{ip}:"),
            (Some(ip), port) => std::net::SocketAddr::new(ip, port).to_string(),
            (None, port) => format!("[unknown]:{port}"),
        };
        let _ = writeln!(text, "{:<46}  {:<32}  {}", network.listen, out, external);
    }
    text
}

fn peer_flags(peer: &PeerInfo) -> String {
    let mut flags = String::new();
    if peer.is_root {
        flags.push('R');
    }
    if peer.behind_nat {
        flags.push('N');
    }
    if peer.firewall_reported {
        flags.push('F');
    }
    flags
}

/// Output of the `status` command.
pub fn status(
    key_pair: &KeyPair,
    user_agent: &str,
    features: FeatureSet,
    networks: &[NetworkInfo],
    peers: &[PeerInfo],
) -> String {
    let mut text = String::new();
    let _ = write!(
        text,
        "----------------\nPublic Key: {}\nNode ID:    {}\n\n",
        key_pair.public_key(),
        key_pair.node_id()
    );
    let _ = write!(
        text,
        "User Agent: {}\nFeatures:   {}\n\n",
        user_agent,
        features.describe()
    );
    text.push_str(&network_table(networks));

    text.push_str("\nPeer ID                                                             Sent      Received  IP                                   Flags   RTT     \n");
    for peer in peers {
        let address = peer
            .active_connections
            .first()
            .map(|c| c.remote.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let _ = writeln!(
            text,
            "{:<66}  {:<8}  {:<8}  {:<35}  {:<6}  {:<6}",
            peer.public_key(),
            peer.packets_sent,
            peer.packets_received,
            address,
            peer_flags(peer),
            format_rtt(peer.rtt)
        );
    }
    text.push('\n');
    text
}

fn connection_row(text: &mut String, c: &ConnectionInfo) {
    let mut ports = c.port_internal.to_string();
    if c.port_external > 0 {
        let _ = write!(ports, " / {}", c.port_external);
    }
    let _ = writeln!(
        text,
        "  {:<9}  {:<50}  ->  {:<50}  {:<19}  {:<19}  {:<6}  {:<9}  ",
        c.status.label(),
        c.local.to_string(),
        c.remote.to_string(),
        format_time(&c.last_packet_in),
        format_time(&c.last_packet_out),
        format_rtt(c.rtt),
        ports
    );
}

/// Connections of a peer grouped by adapter, active ones first.
pub fn peer_connections(peer: &PeerInfo) -> String {
    let mut by_adapter: BTreeMap<&str, (Vec<&ConnectionInfo>, Vec<&ConnectionInfo>)> =
        BTreeMap::new();
    for c in &peer.active_connections {
        by_adapter.entry(c.adapter.as_str()).or_default().0.push(c);
    }
    for c in &peer.inactive_connections {
        by_adapter.entry(c.adapter.as_str()).or_default().1.push(c);
    }

    let mut text = String::from("  Status     Local                                               ->  Remote                                              Last Packet In       Last Packet Out      RTT     Ports I/E  \n");
    for (adapter, (active, inactive)) in by_adapter {
        let _ = writeln!(text, "  -- adapter '{adapter}' --");
        for c in active.into_iter().chain(inactive) {
            connection_row(&mut text, c);
        }
    }
    text
}

/// Output of the `peer list` command. `peers` must already be sorted.
pub fn peer_list(peers: &[PeerInfo]) -> String {
    let mut text = String::new();
    for peer in peers {
        let mut info = String::new();
        if peer.is_root {
            info.push_str(" [root peer]");
        }
        if peer.behind_nat {
            info.push_str(" [NAT]");
        }
        let _ = write!(
            text,
            "* Peer ID {}{}\n  Node ID {}\n  User Agent: {}\n  Blockchain: height {}, version {}\n\n{}\n  Packets sent:      {}\n  Packets received:  {}\n\n",
            peer.public_key(),
            info,
            peer.node_id(),
            peer.user_agent,
            peer.blockchain_height,
            peer.blockchain_version,
            peer_connections(peer),
            peer.packets_sent,
            peer.packets_received
        );
    }
    text
}

// =============================================================================
// Transfers
// =============================================================================

const FILE_TRANSFER_HEADER: &str = "Lite ID       Peer          Hash          Way  File Size  Offset     Limit    | Write-Read    HS    Shut  ACK      NAK      ACK2     Data     Speed          %       Started              Status\n";
const BLOCK_TRANSFER_HEADER: &str = "Lite ID       Peer          Blockchain    Target Blocks     Way  Limit Count  Max Block Size  | Write-Read    HS    Shut  ACK      NAK      ACK2     Data     Speed          %       Started              Status\n";

/// Size of the file transfer header that precedes the data on the wire.
const TRANSFER_HEADER_SIZE: u64 = 16;

fn transfer_speed(direction: TransferDirection, metrics: &TransferMetrics) -> String {
    match direction {
        TransferDirection::In => format!("{:.2} KB/s", metrics.speed_receive / 1024.0),
        TransferDirection::Out => format!("{:.2} KB/s", metrics.speed_send / 1024.0),
        TransferDirection::Bi => format!(
            "{:.2} KB/s - {:.2} KB/s",
            metrics.speed_send / 1024.0,
            metrics.speed_receive / 1024.0
        ),
    }
}

fn transfer_percent(direction: TransferDirection, file_size: u64, metrics: &TransferMetrics) -> String {
    let moved = match direction {
        TransferDirection::In => metrics.data.received,
        TransferDirection::Out => metrics.data.sent,
        TransferDirection::Bi => return "?".to_string(),
    };
    if file_size == 0 || moved < TRANSFER_HEADER_SIZE {
        return "?".to_string();
    }
    format!(
        "{:.2}%",
        (moved - TRANSFER_HEADER_SIZE) as f64 * 100.0 / file_size as f64
    )
}

fn metrics_columns(
    text: &mut String,
    transfer: &TransferSnapshot,
    metrics: &TransferMetrics,
    percent: &str,
) {
    let status = if transfer.terminate_reason.is_terminated() {
        format!("Terminated. {}", transfer.terminate_reason.describe())
    } else {
        "Active".to_string()
    };
    let _ = writeln!(
        text,
        " | {:<12}  {:<5} {:<5} {:<8} {:<8} {:<8} {:<8} {:<14} {:<7} {}  {}",
        format_counter(metrics.data),
        format_counter(metrics.handshake),
        format_counter(metrics.shutdown),
        format_counter(metrics.ack),
        format_counter(metrics.nak),
        format_counter(metrics.ack2),
        format_counter(metrics.data_packets),
        transfer_speed(transfer.direction, metrics),
        percent,
        format_time(&metrics.started),
        status
    );
}

/// Output of the `transfer list` command.
pub fn transfer_list(transfers: &[TransferSnapshot]) -> String {
    let mut files = String::new();
    let mut blocks = String::new();

    for transfer in transfers {
        let id = shorten_text(&transfer.id.to_string(), 8);
        let peer = shorten_text(&transfer.peer.to_hex(), 8);
        match &transfer.kind {
            TransferKind::File {
                hash,
                file_size,
                offset,
                limit,
            } => {
                let _ = write!(
                    files,
                    "{:<12}  {:<12}  {:<12}  {:<3}  {:<10} {:<10} {:<8}",
                    id,
                    peer,
                    shorten_text(&hash.to_hex(), 8),
                    transfer.direction.label(),
                    file_size,
                    offset,
                    limit
                );
                match &transfer.metrics {
                    Some(metrics) => {
                        let percent = transfer_percent(transfer.direction, *file_size, metrics);
                        metrics_columns(&mut files, transfer, metrics, &percent);
                    }
                    None => files.push_str("  [transport connection not established]\n"),
                }
            }
            TransferKind::Block {
                blockchain,
                target_blocks,
                limit_block_count,
                max_block_size,
            } => {
                let targets = target_blocks
                    .iter()
                    .map(|b| format!("{}-{}", b.offset, b.limit))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = write!(
                    blocks,
                    "{:<12}  {:<12}  {:<12}  {:<17} {:<3}  {:<12} {:<15}",
                    id,
                    peer,
                    shorten_text(&blockchain.to_hex(), 8),
                    targets,
                    transfer.direction.label(),
                    limit_block_count,
                    max_block_size
                );
                match &transfer.metrics {
                    Some(metrics) => metrics_columns(&mut blocks, transfer, metrics, ""),
                    None => blocks.push_str("  [transport connection not established]\n"),
                }
            }
        }
    }

    let mut text = String::new();
    if !files.is_empty() {
        text.push_str(FILE_TRANSFER_HEADER);
        text.push_str(&files);
    }
    if !blocks.is_empty() {
        text.push_str(BLOCK_TRANSFER_HEADER);
        text.push_str(&blocks);
    }
    if text.is_empty() {
        text.push_str("No transfers.\n");
    }
    text
}

// =============================================================================
// Blocks and search results
// =============================================================================

fn file_record(text: &mut String, file: &FileRecord) {
    let _ = writeln!(text, "* File                {}", file.id);
    let _ = writeln!(text, "  Size                {}", file.size);
    let _ = writeln!(text, "  Type                {}", file.file_type);
    let _ = writeln!(text, "  Format              {}", file.format);
    let _ = writeln!(text, "  Hash                {}", file.hash);
    let _ = writeln!(text, "  Merkle Root Hash    {}", file.merkle_root);
    let _ = writeln!(text, "  Fragment Size       {}", file.fragment_size);
    for tag in &file.tags {
        match tag {
            FileTag::Name(name) => {
                let _ = writeln!(text, "  Name                {name}");
            }
            FileTag::Folder(folder) => {
                let _ = writeln!(text, "  Folder              {folder}");
            }
            FileTag::Description(description) => {
                let _ = writeln!(text, "  Description         {description}");
            }
            FileTag::Other { .. } => {}
        }
    }
}

fn profile_field(text: &mut String, field: &ProfileField) {
    let value = String::from_utf8_lossy(&field.data);
    let _ = match field.kind {
        ProfileFieldKind::Name => writeln!(text, "* Profile Name     =  {value}"),
        ProfileFieldKind::Email => writeln!(text, "* Profile Email    =  {value}"),
        ProfileFieldKind::Website => writeln!(text, "* Profile Website  =  {value}"),
        ProfileFieldKind::Twitter => writeln!(text, "* Profile Twitter  =  {value}"),
        ProfileFieldKind::YouTube => writeln!(text, "* Profile YouTube  =  {value}"),
        ProfileFieldKind::Address => writeln!(text, "* Profile Address  =  {value}"),
        ProfileFieldKind::Picture => {
            writeln!(text, "* Profile Picture. Size {}", field.data.len())
        }
        ProfileFieldKind::Other(kind) => {
            writeln!(text, "* Field  {}  =  {}", kind, hex::encode(&field.data))
        }
    };
}

/// Records of a decoded block.
pub fn block_records(block: &DecodedBlock) -> String {
    let mut text = String::new();
    for record in &block.records {
        match record {
            BlockRecord::File(file) => file_record(&mut text, file),
            BlockRecord::Profile(fields) => {
                for field in fields {
                    profile_field(&mut text, field);
                }
            }
            BlockRecord::Unknown => text.push_str("* Unknown record.\n"),
        }
    }
    text
}

pub fn search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }
    let mut text = String::new();
    for result in results {
        let _ = writeln!(text, "- File ID               {}", result.file_id);
        let _ = writeln!(text, "  Public Key            {}", result.public_key);
        let _ = writeln!(text, "  Block Number          {}", result.block_number);
        let _ = writeln!(
            text,
            "  Found via keywords    {}",
            result.keywords.join(", ")
        );
    }
    text
}

// =============================================================================
// Hex dump
// =============================================================================

/// Canonical hex dump: offset, 16 bytes in two groups of 8, ASCII column.
pub fn hex_dump(data: &[u8]) -> String {
    let mut text = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(text, "{:08x}  ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(text, "{byte:02x} ");
                }
                None => text.push_str("   "),
            }
            if i == 7 {
                text.push(' ');
            }
        }
        text.push_str(" |");
        text.extend(chunk.iter().map(|&b| {
            if (0x20..=0x7e).contains(&b) {
                b as char
            } else {
                '.'
            }
        }));
        text.push_str("|\n");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ConnectionStatus, Hash256, KeyPair, TerminateReason, TransferSnapshot,
    };
    use std::net::SocketAddr;
    use uuid::Uuid;

    fn make_connection(adapter: &str, status: ConnectionStatus) -> ConnectionInfo {
        let time = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        ConnectionInfo {
            status,
            adapter: adapter.to_string(),
            local: "10.0.0.1:112".parse::<SocketAddr>().unwrap(),
            remote: "10.0.0.2:113".parse::<SocketAddr>().unwrap(),
            last_packet_in: time,
            last_packet_out: time,
            rtt: Some(Duration::from_millis(12)),
            port_internal: 112,
            port_external: 0,
        }
    }

    #[test]
    fn test_hex_dump_layout() {
        let dump = hex_dump(b"hello world.hello");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00000000  68 65 6c 6c 6f 20 77 6f  72 6c 64 2e 68 65 6c 6c  |hello world.hell|"
        );
        assert!(lines[1].starts_with("00000010  6f "));
        assert!(lines[1].ends_with("|o|"));
    }

    #[test]
    fn test_format_rtt() {
        assert_eq!(format_rtt(None), "N/A");
        assert_eq!(format_rtt(Some(Duration::ZERO)), "N/A");
        assert_eq!(format_rtt(Some(Duration::from_micros(12_400))), "12ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }

    #[test]
    fn test_connections_grouped_by_adapter() {
        let mut peer = PeerInfo::new(KeyPair::generate().public_key());
        peer.active_connections
            .push(make_connection("eth1", ConnectionStatus::Active));
        peer.inactive_connections
            .push(make_connection("eth0", ConnectionStatus::Inactive));

        let text = peer_connections(&peer);
        let eth0 = text.find("-- adapter 'eth0' --").unwrap();
        let eth1 = text.find("-- adapter 'eth1' --").unwrap();
        assert!(eth0 < eth1);
        assert!(text.contains("inactive"));
        assert!(text.contains("12ms"));
    }

    #[test]
    fn test_empty_transfer_list() {
        assert_eq!(transfer_list(&[]), "No transfers.\n");
    }

    #[test]
    fn test_terminated_transfer_shows_reason() {
        let transfer = TransferSnapshot {
            id: Uuid::new_v4(),
            peer: KeyPair::generate().public_key(),
            direction: TransferDirection::In,
            kind: TransferKind::File {
                hash: Hash256::digest(b"file"),
                file_size: 1000,
                offset: 0,
                limit: 0,
            },
            metrics: Some(TransferMetrics {
                data: Counter::new(0, 516),
                handshake: Counter::new(1, 1),
                shutdown: Counter::default(),
                ack: Counter::default(),
                nak: Counter::default(),
                ack2: Counter::default(),
                data_packets: Counter::new(0, 1),
                speed_send: 0.0,
                speed_receive: 2048.0,
                started: Utc::now(),
            }),
            terminate_reason: TerminateReason::FileNotStored,
        };

        let text = transfer_list(&[transfer]);
        assert!(text.starts_with("Lite ID"));
        assert!(text.contains("50.00%"));
        assert!(text.contains("2.00 KB/s"));
        assert!(text.contains("Terminated. Remote peer does not store the file."));
    }

    #[test]
    fn test_search_results_empty() {
        assert_eq!(search_results(&[]), "No results found.\n");
    }
}
