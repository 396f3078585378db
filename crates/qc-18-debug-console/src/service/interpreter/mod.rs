//! # Command Interpreter
//!
//! Maps one input line to one command and executes it against the backend,
//! writing the result to the session's output.
//!
//! ## Matching
//!
//! Lines are matched exactly and case-insensitively against
//! [`COMMAND_TABLE`]. There is no prefix or fuzzy matching. Commands that
//! take a single argument accept it inline (`watch <hash>`); without one they
//! prompt and read one follow-up line from the same session.
//!
//! ## Follow-up lines
//!
//! A command waiting for a follow-up line aborts without side effects when
//! the session is cancelled or its input ends. The abort is reported to the
//! session loop as `Err(SessionEnd)`.


use crate::domain::{
    sort_peers, ConnectError, ConsoleConfig, ErrorOutput, Hash256, KeyPair, KeyRegistry,
    MonitorKey, PeerTarget,
};
use crate::ports::NetworkBackend;
use crate::service::block::print_block;
use crate::service::connect::{debug_connect, parse_target, resolve_peer};
use crate::service::filters::ErrorOutputSwitch;
use crate::service::render::{
    network_list, peer_list, search_results, status, transfer_list, HELP_TEXT,
};
use crate::service::session::{Session, SessionEnd};
use crate::service::verify::TransferVerifier;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    NetList,
    Status,
    Chat,
    PeerList,
    KeyCreate,
    KeySelf,
    Connect,
    WatchSearches,
    WatchIncoming,
    Watch,
    BucketRefresh,
    ProbeTransfer,
    GetBlock,
    Hash,
    WarehouseGet,
    WarehouseStore,
    DhtGet,
    DhtStore,
    LogError,
    SearchFile,
    TransferList,
    Exit,
}

/// One row of the command table.
#[derive(Debug)]
pub struct CommandSpec {
    pub command: Command,
    /// Primary name first, then aliases. All lowercase.
    pub names: &'static [&'static str],
    /// Whether the single argument may be given on the command line itself.
    pub inline_argument: bool,
}

const fn spec(
    command: Command,
    names: &'static [&'static str],
    inline_argument: bool,
) -> CommandSpec {
    CommandSpec {
        command,
        names,
        inline_argument,
    }
}

pub const COMMAND_TABLE: &[CommandSpec] = &[
    spec(Command::Help, &["help", "?"], false),
    spec(Command::NetList, &["net list"], false),
    spec(Command::Status, &["status"], false),
    spec(Command::Chat, &["chat", "chat all"], false),
    spec(Command::PeerList, &["peer list"], false),
    spec(Command::KeyCreate, &["debug key create"], false),
    spec(Command::KeySelf, &["debug key self"], false),
    spec(Command::Connect, &["debug connect", "connect"], true),
    spec(
        Command::WatchSearches,
        &["debug watch searches", "watch all searches"],
        false,
    ),
    spec(
        Command::WatchIncoming,
        &["debug watch incoming", "watch all incoming"],
        false,
    ),
    spec(Command::Watch, &["debug watch", "watch"], true),
    spec(Command::BucketRefresh, &["debug bucket refresh"], true),
    spec(Command::ProbeTransfer, &["probe file transfer"], false),
    spec(Command::GetBlock, &["get block"], false),
    spec(Command::Hash, &["hash"], false),
    spec(Command::WarehouseGet, &["warehouse get"], true),
    spec(Command::WarehouseStore, &["warehouse store"], false),
    spec(Command::DhtGet, &["dht get"], true),
    spec(Command::DhtStore, &["dht store"], false),
    spec(Command::LogError, &["log error"], true),
    spec(Command::SearchFile, &["search file"], false),
    spec(Command::TransferList, &["transfer list"], false),
    spec(Command::Exit, &["exit"], false),
];

/// A matched input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub argument: Option<String>,
}

/// Matches a trimmed input line against the command table.
pub fn parse_command(line: &str) -> Option<ParsedCommand> {
    let line = line.trim();

    for entry in COMMAND_TABLE {
        if entry.names.iter().any(|name| line.eq_ignore_ascii_case(name)) {
            return Some(ParsedCommand {
                command: entry.command,
                argument: None,
            });
        }
    }

    for entry in COMMAND_TABLE.iter().filter(|entry| entry.inline_argument) {
        for name in entry.names {
            if let Some(argument) = strip_command(line, name) {
                return Some(ParsedCommand {
                    command: entry.command,
                    argument: Some(argument.to_string()),
                });
            }
        }
    }
    None
}

fn strip_command<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let head = line.get(..name.len())?;
    let rest = &line[name.len()..];
    if !head.eq_ignore_ascii_case(name) || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let argument = rest.trim();
    (!argument.is_empty()).then_some(argument)
}

const INVALID_TARGET: &str =
    "Invalid peer ID or node ID. It must be hex-encoded and 66 (peer ID) or 64 characters (node ID) long.";
const INVALID_HASH: &str = "Invalid hash. Hex-encoded 64 character hash expected.";
const INVALID_OPTION: &str = "Invalid option.";

type CommandResult = Result<(), SessionEnd>;

pub struct CommandInterpreter {
    backend: Arc<dyn NetworkBackend>,
    registry: Arc<KeyRegistry>,
    config: ConsoleConfig,
    error_output: Arc<ErrorOutputSwitch>,
    verifier: Arc<TransferVerifier>,
    shutdown: watch::Sender<bool>,
}

impl CommandInterpreter {
    pub fn new(
        backend: Arc<dyn NetworkBackend>,
        registry: Arc<KeyRegistry>,
        config: ConsoleConfig,
        error_output: Arc<ErrorOutputSwitch>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        let verifier = Arc::new(TransferVerifier::new(
            Arc::clone(&backend),
            config.transfer.clone(),
        ));
        Self {
            backend,
            registry,
            config,
            error_output,
            verifier,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Executes one input line.
    ///
    /// `Err` means the session must stop: its input ended or it was
    /// cancelled while a command waited for a follow-up line, or the
    /// operator asked to exit.
    pub async fn execute(&self, line: &str, session: &mut Session) -> CommandResult {
        let Some(parsed) = parse_command(line) else {
            session.output().line("Unknown command.");
            return Ok(());
        };
        debug!(session_id = %session.id(), command = ?parsed.command, "Executing command");
        let argument = parsed.argument;

        match parsed.command {
            Command::Help => {
                session.output().write(HELP_TEXT);
                Ok(())
            }
            Command::NetList => {
                session.output().write(network_list(&self.backend.networks()));
                Ok(())
            }
            Command::Status => {
                self.status(session);
                Ok(())
            }
            Command::Chat => self.chat(session).await,
            Command::PeerList => {
                let mut peers = self.backend.list_peers();
                sort_peers(&mut peers);
                session.output().write(peer_list(&peers));
                Ok(())
            }
            Command::KeyCreate => {
                print_key_pair(session, &KeyPair::generate());
                Ok(())
            }
            Command::KeySelf => {
                print_key_pair(session, &self.backend.key_pair());
                Ok(())
            }
            Command::Connect => self.connect(session, argument).await,
            Command::WatchSearches => {
                let enabled = session.toggle_watch(MonitorKey::all_searches());
                session.output().line(format!(
                    "Watching of all outgoing DHT searches {}.",
                    enabled_label(enabled)
                ));
                Ok(())
            }
            Command::WatchIncoming => {
                let enabled = session.toggle_watch(MonitorKey::all_incoming_requests());
                session.output().line(format!(
                    "Watching of all incoming information requests {}.",
                    enabled_label(enabled)
                ));
                Ok(())
            }
            Command::Watch => self.watch(session, argument).await,
            Command::BucketRefresh => self.bucket_refresh(session, argument).await,
            Command::ProbeTransfer => self.probe_transfer(session).await,
            Command::GetBlock => self.get_block(session).await,
            Command::Hash => {
                let text = follow_up(session, None, None).await?;
                session
                    .output()
                    .line(format!("blake3 hash: {}", Hash256::digest(text.as_bytes())));
                Ok(())
            }
            Command::WarehouseGet => self.warehouse_get(session, argument).await,
            Command::WarehouseStore => {
                let text = follow_up(session, None, None).await?;
                match self.backend.store_data_local(text.as_bytes()) {
                    Ok(hash) => session.output().line(format!("Stored via hash: {hash}")),
                    Err(e) => session.output().line(format!("Error storing data: {e}")),
                }
                Ok(())
            }
            Command::DhtGet => self.dht_get(session, argument).await,
            Command::DhtStore => {
                let text = follow_up(session, None, None).await?;
                match self.backend.store_data_dht(text.as_bytes()).await {
                    Ok(hash) => session.output().line(format!("Stored via hash: {hash}")),
                    Err(e) => session.output().line(format!("Error storing data: {e}")),
                }
                Ok(())
            }
            Command::LogError => self.log_error(session, argument).await,
            Command::SearchFile => {
                let text = follow_up(session, None, None).await?;
                session
                    .output()
                    .write(search_results(&self.backend.search_index(&text)));
                Ok(())
            }
            Command::TransferList => {
                session.output().write(transfer_list(&self.backend.transfers()));
                Ok(())
            }
            Command::Exit => {
                info!(session_id = %session.id(), "Graceful exit via console command");
                session.output().line("Shutting down.");
                self.shutdown.send_replace(true);
                Err(SessionEnd::Exit)
            }
        }
    }

    fn status(&self, session: &Session) {
        let mut peers = self.backend.list_peers();
        sort_peers(&mut peers);
        session.output().write(status(
            &self.backend.key_pair(),
            &self.backend.user_agent(),
            self.backend.features(),
            &self.backend.networks(),
            &peers,
        ));
    }

    async fn chat(&self, session: &mut Session) -> CommandResult {
        let text = follow_up(session, None, None).await?;
        self.backend.send_chat_all(&text).await;
        Ok(())
    }

    async fn connect(&self, session: &mut Session, argument: Option<String>) -> CommandResult {
        let prompt =
            "Please specify the target peer to connect to via DHT lookup, either by peer ID or node ID:";
        let text = follow_up(session, argument, Some(prompt)).await?;

        let target = match parse_target(&text, &self.backend.self_node_id()) {
            Ok(target) => target,
            Err(ConnectError::SelfTarget) => {
                session.output().line("Target node is self.");
                return Ok(());
            }
            Err(_) => {
                session.output().line(INVALID_TARGET);
                return Ok(());
            }
        };

        if let Err(e) = debug_connect(
            self.backend.as_ref(),
            &self.registry,
            session.output(),
            target.node_id(),
            self.config.lookup.timeout,
            session.cancel_token(),
        )
        .await
        {
            debug!(
                session_id = %session.id(),
                node_id = %target.node_id(),
                error = %e,
                "Connect ended without a peer"
            );
        }
        Ok(())
    }

    async fn watch(&self, session: &mut Session, argument: Option<String>) -> CommandResult {
        let prompt = "Enter hash of data or node ID to watch. This monitors info requests and packets. Enter same hash again to remove from list.";
        let text = follow_up(session, argument, Some(prompt)).await?;

        let Ok(hash) = Hash256::from_hex(&text) else {
            session.output().line(INVALID_HASH);
            return Ok(());
        };
        if session.toggle_watch(MonitorKey::from(hash)) {
            session.output().line("The hash was added to the monitoring list.");
        } else {
            session.output().line("The hash was removed from the monitoring list.");
        }
        Ok(())
    }

    async fn bucket_refresh(&self, session: &mut Session, argument: Option<String>) -> CommandResult {
        let prompt = format!(
            "Disable (1) or enable (0) bucket refresh. This can be useful to disable bucket refresh when debugging outgoing DHT searches. (current setting: {})",
            self.backend.bucket_refresh_disabled()
        );
        let text = follow_up(session, argument, Some(prompt.as_str())).await?;
        match text.parse::<u8>() {
            Ok(option @ 0..=1) => self.backend.set_bucket_refresh_disabled(option == 1),
            _ => session.output().line(INVALID_OPTION),
        }
        Ok(())
    }

    /// Reads and resolves the peer named in the next follow-up line.
    ///
    /// `Ok(None)` means the failure was already reported to the operator.
    async fn read_peer(
        &self,
        session: &mut Session,
        prompt: &str,
    ) -> Result<Option<PeerTarget>, SessionEnd> {
        let text = follow_up(session, None, Some(prompt)).await?;
        match parse_target(&text, &self.backend.self_node_id()) {
            Ok(target) => Ok(Some(target)),
            Err(ConnectError::SelfTarget) => {
                session.output().line("Target node is self.");
                Ok(None)
            }
            Err(_) => {
                session.output().line("Invalid peer ID or node ID.");
                Ok(None)
            }
        }
    }

    async fn probe_transfer(&self, session: &mut Session) -> CommandResult {
        let target = self
            .read_peer(session, "Enter peer ID or node ID to connect:")
            .await?;
        let hash_text = follow_up(session, None, Some("Enter file hash:")).await?;
        let Some(target) = target else {
            return Ok(());
        };
        let Ok(hash) = Hash256::from_hex(&hash_text) else {
            session.output().line("Invalid file hash.");
            return Ok(());
        };

        let resolved = resolve_peer(
            self.backend.as_ref(),
            target,
            self.config.lookup.timeout,
            session.cancel_token(),
        )
        .await;
        let peer = match resolved {
            Ok(peer) => peer,
            Err(e) => {
                session.output().line(format!("Could not connect to peer: {e}"));
                return Ok(());
            }
        };

        let verifier = Arc::clone(&self.verifier);
        let output = session.output().clone();
        session.spawn(move |cancel| async move {
            verifier.run(&peer, hash, &output, &cancel).await;
        });
        Ok(())
    }

    async fn get_block(&self, session: &mut Session) -> CommandResult {
        let target = self.read_peer(session, "Enter peer ID or node ID:").await?;
        let number_text = follow_up(session, None, Some("Enter block number:")).await?;
        let Some(target) = target else {
            return Ok(());
        };
        let Ok(number) = number_text.parse::<u64>() else {
            session.output().line("Invalid block number.");
            return Ok(());
        };

        let resolved = resolve_peer(
            self.backend.as_ref(),
            target,
            self.config.lookup.timeout,
            session.cancel_token(),
        )
        .await;
        let peer = match resolved {
            Ok(peer) => peer,
            Err(e) => {
                session.output().line(format!("Could not connect to peer: {e}"));
                return Ok(());
            }
        };

        let backend = Arc::clone(&self.backend);
        let max_block_size = self.config.transfer.max_block_size;
        let output = session.output().clone();
        session.spawn(move |cancel| async move {
            print_block(backend.as_ref(), &peer, number, max_block_size, &output, &cancel).await;
        });
        Ok(())
    }

    async fn warehouse_get(&self, session: &mut Session, argument: Option<String>) -> CommandResult {
        let text = follow_up(session, argument, None).await?;
        let Ok(hash) = Hash256::from_hex(&text) else {
            session.output().line(INVALID_HASH);
            return Ok(());
        };
        match self.backend.get_data_local(&hash) {
            Some(data) => session.output().write(format_data(&data)),
            None => session.output().line("Not found."),
        }
        Ok(())
    }

    async fn dht_get(&self, session: &mut Session, argument: Option<String>) -> CommandResult {
        let text = follow_up(session, argument, None).await?;
        let Ok(hash) = Hash256::from_hex(&text) else {
            session.output().line(INVALID_HASH);
            return Ok(());
        };

        let lookup = self.backend.get_data_dht(&hash);
        let result = tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => return Err(SessionEnd::Cancelled),
            result = lookup => result,
        };
        match result {
            Ok(Some((data, sender))) => {
                session
                    .output()
                    .write(format!("\nSender:      {sender}\n{}", format_data(&data)));
            }
            Ok(None) => session.output().line("Not found."),
            Err(e) => session.output().line(format!("Not found: {e}")),
        }
        Ok(())
    }

    async fn log_error(&self, session: &mut Session, argument: Option<String>) -> CommandResult {
        let prompt = "Please choose the target output of error messages:\n0 = Log file (default)\n1 = Command line\n2 = Log file + command line\n3 = None";
        let text = follow_up(session, argument, Some(prompt)).await?;
        match text.parse::<i64>().ok().and_then(ErrorOutput::from_index) {
            Some(target) => self.error_output.set(target),
            None => session.output().line(INVALID_OPTION),
        }
        Ok(())
    }
}

impl fmt::Debug for CommandInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInterpreter")
            .field("monitored", &self.registry.len())
            .field("error_output", &self.error_output.get())
            .finish_non_exhaustive()
    }
}

/// Returns the inline argument, or prompts and reads one follow-up line.
async fn follow_up(
    session: &mut Session,
    inline: Option<String>,
    prompt: Option<&str>,
) -> Result<String, SessionEnd> {
    if let Some(argument) = inline {
        return Ok(argument);
    }
    if let Some(prompt) = prompt {
        session.output().line(prompt);
    }
    session.read_follow_up().await
}

fn print_key_pair(session: &Session, pair: &KeyPair) {
    session.output().write(format!(
        "Private Key: {}\nPublic Key:  {}\n",
        pair.secret_hex(),
        pair.public_key()
    ));
}

fn format_data(data: &[u8]) -> String {
    format!(
        "Data hex:    {}\nData string: {}\n",
        hex::encode(data),
        String::from_utf8_lossy(data)
    )
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
