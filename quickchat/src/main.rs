//! `QuickChat` -- line-oriented direct messaging client.
//!
//! Connects the push channel, keeps unseen counts reconciled, and prints the
//! open conversation as it changes. Logs go to a file so stdout stays free
//! for chat output.
//!
//! ```bash
//! cargo run --bin quickchat -- --server-url http://127.0.0.1:5000 --token tok-bob
//!
//! # Or via environment variables
//! QUICKCHAT_SERVER=http://127.0.0.1:5000 QUICKCHAT_TOKEN=tok-bob cargo run --bin quickchat
//! ```
//!
//! Commands: `/users`, `/open <peer>`, `/quit`; any other line is sent to
//! the open conversation.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use quickchat::api::HttpChatApi;
use quickchat::channel::PushChannel;
use quickchat::config::{CliArgs, ClientConfig};
use quickchat::driver::{DriverHandle, DriverNotice, SessionCommand, SessionDriver};
use quickchat::session::{
    LoadState, Notice, SessionError, SessionSnapshot, SessionState, UnseenMap,
};
use quickchat_proto::message::{Message, MessageBody, MessageId, UserId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let (base_url, channel_config) = match config.base_url().and_then(|base| {
        config.channel_config().map(|channel| (base, channel))
    }) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(server = %base_url, "quickchat starting");

    let api = Arc::new(HttpChatApi::new(base_url, channel_config.token.clone()));
    let channel = PushChannel::spawn(channel_config);
    let subscription = match channel.subscribe() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut handle = SessionDriver::spawn(api, subscription, config.channel_capacity);

    println!("connecting to {} ...", config.server_url);
    run_cli(&mut handle).await;

    handle.shutdown().await;
    channel.shutdown();
    tracing::info!("quickchat exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("quickchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Users,
    Open(UserId),
    Send(String),
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("users"), None) => Input::Users,
        (Some("open"), Some(peer)) => Input::Open(UserId::new(peer)),
        (Some("quit"), None) => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

/// Reads commands from stdin and prints snapshot changes and notices until
/// `/quit`, end of input, or the driver stopping.
async fn run_cli(handle: &mut DriverHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = handle.snapshots();
    let mut printer = Printer::default();
    let mut users = UsersRequest::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let command = match line {
                    Ok(Some(line)) => match parse_input(&line) {
                        Input::Quit => break,
                        Input::Empty => continue,
                        Input::Users => {
                            users.start(&handle.snapshot());
                            SessionCommand::Refresh
                        }
                        Input::Open(peer) => SessionCommand::SelectPeer(peer),
                        Input::Send(text) => SessionCommand::Send(MessageBody::text(text)),
                        Input::Unknown(line) => {
                            println!("unknown command: {line} (try /users, /open <peer>, /quit)");
                            continue;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                if handle.dispatch(command).await.is_err() {
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                printer.render(&snapshot);
                if users.is_answered_by(&snapshot) {
                    print_users(&snapshot);
                }
            }
            notice = handle.next_notice() => {
                match notice {
                    Some(notice) => {
                        println!("! {notice}");
                        if refresh_failed(&notice) && users.cancel() {
                            println!("(cached list)");
                            print_users(&handle.snapshot());
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// A pending `/users`: the list is printed once a sidebar newer than the
/// one current at request time has been applied.
#[derive(Debug, Default)]
struct UsersRequest {
    after: Option<u64>,
}

impl UsersRequest {
    const fn start(&mut self, current: &SessionSnapshot) {
        self.after = Some(current.reconciliations);
    }

    fn is_answered_by(&mut self, snapshot: &SessionSnapshot) -> bool {
        if self.after.is_some_and(|seen| snapshot.reconciliations > seen) {
            self.after = None;
            return true;
        }
        false
    }

    /// Drops the pending request; `true` if there was one.
    const fn cancel(&mut self) -> bool {
        self.after.take().is_some()
    }
}

fn refresh_failed(notice: &DriverNotice) -> bool {
    matches!(
        notice,
        DriverNotice::Session(Notice::SidebarUnavailable(_))
            | DriverNotice::Refused(SessionError::NotConnected)
    )
}

fn print_users(snapshot: &SessionSnapshot) {
    if snapshot.users.is_empty() {
        println!("no other users yet");
        return;
    }
    for user in &snapshot.users {
        let unseen = snapshot.unseen.get(&user.id);
        let marker = if unseen > 0 { format!(" ({unseen} unseen)") } else { String::new() };
        println!("  {} - {}{marker}", user.id, user.full_name);
    }
}

/// Prints only what changed between snapshots.
#[derive(Default)]
struct Printer {
    connected: Option<bool>,
    peer: Option<UserId>,
    failed: bool,
    printed: BTreeSet<MessageId>,
    unseen: UnseenMap,
}

impl Printer {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        let connected = snapshot.state != SessionState::Disconnected;
        if self.connected != Some(connected) {
            self.connected = Some(connected);
            match (&snapshot.me, connected) {
                (Some(me), true) => println!("connected as {me}"),
                _ => println!("disconnected, reconnecting ..."),
            }
        }

        let peer = snapshot.view.as_ref().map(|v| v.peer().clone());
        if peer != self.peer {
            self.peer.clone_from(&peer);
            self.printed.clear();
            self.failed = false;
            if let Some(peer) = &peer {
                println!("-- conversation with {peer} --");
            }
        }

        if let Some(view) = &snapshot.view {
            for message in view.messages() {
                if self.printed.insert(message.id) {
                    println!("{}", format_message(message));
                }
            }
            if view.state() == LoadState::Failed && !self.failed {
                self.failed = true;
                println!("(history unavailable, showing new messages only)");
            }
        }

        if snapshot.unseen != self.unseen {
            self.unseen = snapshot.unseen.clone();
            if !self.unseen.is_empty() {
                let summary: Vec<_> = self
                    .unseen
                    .iter()
                    .map(|(peer, count)| format!("{peer} ({count})"))
                    .collect();
                println!("unseen: {}", summary.join(", "));
            }
        }
    }
}

fn format_message(message: &Message) -> String {
    match (&message.body.text, &message.body.image) {
        (Some(text), Some(image)) => format!("{}: {text} [image: {image}]", message.sender_id),
        (Some(text), None) => format!("{}: {text}", message.sender_id),
        (None, Some(image)) => format!("{}: [image: {image}]", message.sender_id),
        (None, None) => format!("{}:", message.sender_id),
    }
}
