mod commands;
mod terminal_sink;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use client_core::{
    load_settings, load_settings_from, ChatEvent, ChatSession, ChatSnapshot, DesktopPermission,
};
use shared::domain::DirectMessage;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast::error::RecvError, watch},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{HostCommand, HELP},
    terminal_sink::{escape_control, TerminalAlertSink},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PermissionArg {
    Granted,
    Denied,
    Default,
}

impl From<PermissionArg> for DesktopPermission {
    fn from(value: PermissionArg) -> Self {
        match value {
            PermissionArg::Granted => DesktopPermission::Granted,
            PermissionArg::Denied => DesktopPermission::Denied,
            PermissionArg::Default => DesktopPermission::Default,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Terminal client for one-to-one chat")]
struct Args {
    /// Chat server base URL, e.g. http://localhost:8080
    #[arg(long)]
    server_url: Option<String>,
    /// Log in as this user on startup.
    #[arg(long)]
    username: Option<String>,
    /// Settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Answer to the desktop notification permission prompt.
    #[arg(long, value_enum, default_value_t = PermissionArg::Granted)]
    desktop_permission: PermissionArg,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(server_url) = args.server_url {
        settings.api_url = server_url;
    }
    let endpoint = settings.ws_endpoint()?;
    info!(%endpoint, "desktop: starting");

    let sink = Arc::new(TerminalAlertSink::new(args.desktop_permission.into()));
    let session = ChatSession::spawn(&settings, sink).context("failed to start chat session")?;
    let renderer = tokio::spawn(render_snapshots(session.watch()));
    let notices = tokio::spawn(print_events(session.subscribe_events()));

    match &args.username {
        Some(username) => session.login(username).await?,
        None => println!("type /login <id> to connect, /help for commands"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match commands::parse(&line) {
                    None => {}
                    Some(Err(message)) => println!("{message}"),
                    Some(Ok(command)) => {
                        if !handle_command(&session, command).await? {
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    renderer.abort();
    notices.abort();
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_command(session: &ChatSession, command: HostCommand) -> Result<bool> {
    match command {
        HostCommand::Login(user_id) => {
            if let Err(err) = session.login(&user_id).await {
                println!("{}", escape_control(&err.to_string()));
            }
        }
        HostCommand::Select(peer) => session.select_user(peer.as_str())?,
        HostCommand::Send(content) => {
            let snapshot = session.snapshot();
            if snapshot.selected_peer.is_none() {
                println!("select a user first with /select <id>");
            } else {
                session.send_message(content)?;
            }
        }
        HostCommand::Users => print_users(&session.snapshot()),
        HostCommand::ToggleSound => {
            let enabled = session.toggle_sound().await?;
            println!("sound {}", on_off(enabled));
        }
        HostCommand::ToggleDesktop => {
            let enabled = session.toggle_desktop_alert().await?;
            println!("desktop notifications {}", on_off(enabled));
        }
        HostCommand::Focus => session.set_window_focus(true)?,
        HostCommand::Blur => session.set_window_focus(false)?,
        HostCommand::ClearUnread => session.clear_all_unread()?,
        HostCommand::Leave => session.leave_room()?,
        HostCommand::Status => print_status(&session.snapshot()),
        HostCommand::Help => println!("{HELP}"),
        HostCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn print_users(snapshot: &ChatSnapshot) {
    if snapshot.peers.is_empty() {
        println!("nobody else is online");
        return;
    }
    for (id, name) in &snapshot.peers {
        let marker = if snapshot.selected_peer.as_ref() == Some(id) {
            '*'
        } else {
            ' '
        };
        let name = escape_control(name);
        let id_text = escape_control(id.as_str());
        match snapshot.unread_for(id) {
            0 => println!("{marker} {name} ({id_text})"),
            unread => println!("{marker} {name} ({id_text}) [{unread} unread]"),
        }
    }
}

fn print_status(snapshot: &ChatSnapshot) {
    let user = snapshot
        .local_user
        .as_ref()
        .map(|user| escape_control(user.as_str()))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "user: {user}  connection: {:?}  unread: {}  sound: {}  desktop: {} ({:?})",
        snapshot.connection,
        snapshot.total_unread,
        on_off(snapshot.alerts.sound_enabled),
        on_off(snapshot.alerts.desktop_enabled),
        snapshot.desktop_permission,
    );
}

fn print_message(snapshot: &ChatSnapshot, message: &DirectMessage) {
    println!(
        "[{}] {}: {}",
        message.received_at.format("%H:%M:%S"),
        escape_control(snapshot.display_name(&message.sender)),
        escape_control(&message.content)
    );
}

async fn render_snapshots(mut watch: watch::Receiver<ChatSnapshot>) {
    let mut previous = watch.borrow_and_update().clone();
    while watch.changed().await.is_ok() {
        let current = watch.borrow_and_update().clone();

        if current.connection != previous.connection {
            println!("-- {:?}", current.connection);
        }
        if current.peers != previous.peers && current.logged_in {
            let names: Vec<String> = current
                .peers
                .iter()
                .map(|(_, name)| escape_control(name))
                .collect();
            println!("-- online: {}", names.join(", "));
        }
        if current.selected_peer != previous.selected_peer {
            if let Some(peer) = &current.selected_peer {
                println!(
                    "== conversation with {} ==",
                    escape_control(current.display_name(peer))
                );
                for message in &current.visible_thread {
                    print_message(&current, message);
                }
            }
        } else if current.visible_thread.len() > previous.visible_thread.len() {
            for message in &current.visible_thread[previous.visible_thread.len()..] {
                print_message(&current, message);
            }
        }

        previous = current;
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::Connected { user, reconnect }) => {
                let user = escape_control(user.as_str());
                if reconnect {
                    println!("-- reconnected as {user}");
                } else {
                    println!("-- connected as {user}");
                }
            }
            Ok(ChatEvent::LoginFailed(err)) => {
                println!("!! login failed: {}", escape_control(&err.to_string()));
            }
            Ok(ChatEvent::ConnectionLost(err)) => {
                println!("-- disconnected ({}), retrying", escape_control(&err.to_string()));
            }
            Ok(ChatEvent::PayloadRejected(reason)) => warn!(%reason, "desktop: ignored payload"),
            Ok(ChatEvent::LoggedOut) => println!("-- left the room"),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
