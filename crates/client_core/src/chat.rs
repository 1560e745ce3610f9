//! Session coordinator exposed to the UI layer.
//!
//! [`ChatSession`] is a cheap handle onto a single actor task. Every UI call,
//! session event, permission result and title tick is processed there one at
//! a time; observers read the resulting [`ChatSnapshot`] from a watch channel.

use std::{collections::BTreeMap, sync::Arc};

use shared::domain::{self, DirectMessage, PresenceMap, UserId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    alerts::{AlertSink, TitleBlinker},
    config::ClientSettings,
    error::{ChatError, ConfigError, TransportError},
    notifications::{AlertAction, AlertConfig, DesktopPermission, NotificationEngine},
    router::ConversationRouter,
    session_client::{SessionClient, SessionEvent},
    transport::TransportConfig,
};

const CHAT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Everything a view needs to render, rebuilt after each processed input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatSnapshot {
    pub local_user: Option<UserId>,
    /// Set once the first connection succeeds; cleared by leave or login failure.
    pub logged_in: bool,
    pub connection: ConnectionState,
    pub presence: PresenceMap,
    /// Presence without the local user, in id order.
    pub peers: Vec<(UserId, String)>,
    pub selected_peer: Option<UserId>,
    pub visible_thread: Vec<DirectMessage>,
    pub unread: BTreeMap<UserId, usize>,
    pub total_unread: usize,
    pub alerts: AlertConfig,
    pub desktop_permission: DesktopPermission,
    pub window_focused: bool,
    pub title: String,
}

impl ChatSnapshot {
    pub fn unread_for(&self, peer: &UserId) -> usize {
        self.unread.get(peer).copied().unwrap_or(0)
    }

    pub fn display_name<'a>(&'a self, user: &'a UserId) -> &'a str {
        domain::display_name(&self.presence, user)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Connected { user: UserId, reconnect: bool },
    /// The first connection attempt failed; the session is logged out again.
    LoginFailed(TransportError),
    /// An established connection dropped; the transport keeps retrying.
    ConnectionLost(TransportError),
    PayloadRejected(String),
    LoggedOut,
}

enum ChatCommand {
    Login {
        user_id: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    SelectUser(UserId),
    SendMessage(String),
    ToggleSound(oneshot::Sender<bool>),
    ToggleDesktopAlert(oneshot::Sender<bool>),
    ClearAllUnread,
    WindowFocus(bool),
    PermissionResolved {
        generation: u64,
        permission: DesktopPermission,
    },
    TitleTick,
    LeaveRoom,
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct ChatSession {
    commands: mpsc::UnboundedSender<ChatCommand>,
    snapshot: watch::Receiver<ChatSnapshot>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatSession {
    /// Spawn the coordinator. Must be called inside a tokio runtime.
    pub fn spawn(settings: &ClientSettings, sink: Arc<dyn AlertSink>) -> Result<Self, ConfigError> {
        let transport = TransportConfig::from_settings(settings)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let notifications = NotificationEngine::new(settings.title.clone());
        let initial = ChatSnapshot {
            alerts: notifications.alert_config(),
            window_focused: notifications.is_window_focused(),
            title: settings.title.clone(),
            ..ChatSnapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (events, _) = broadcast::channel(CHAT_EVENT_BUFFER);

        let actor = ChatActor {
            sink,
            session: SessionClient::new(transport),
            session_events: None,
            router: None,
            notifications,
            presence: PresenceMap::new(),
            connection: ConnectionState::Disconnected,
            logged_in: false,
            title: settings.title.clone(),
            blinker: TitleBlinker::new(settings.title_blink_interval),
            permission_generation: 0,
            commands: commands_tx.downgrade(),
            snapshot: snapshot_tx,
            events: events.clone(),
        };
        tokio::spawn(actor.run(commands_rx));

        Ok(Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events,
        })
    }

    /// Start connecting as `user_id` (trimmed). Connection progress and any
    /// failure arrive later as [`ChatEvent`]s.
    pub async fn login(&self, user_id: &str) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(ChatCommand::Login {
            user_id: user_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub fn select_user(&self, peer: impl Into<UserId>) -> Result<(), ChatError> {
        self.send(ChatCommand::SelectUser(peer.into()))
    }

    pub fn send_message(&self, content: impl Into<String>) -> Result<(), ChatError> {
        self.send(ChatCommand::SendMessage(content.into()))
    }

    pub async fn toggle_sound(&self) -> Result<bool, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(ChatCommand::ToggleSound(reply))?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    pub async fn toggle_desktop_alert(&self) -> Result<bool, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(ChatCommand::ToggleDesktopAlert(reply))?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    pub fn clear_all_unread(&self) -> Result<(), ChatError> {
        self.send(ChatCommand::ClearAllUnread)
    }

    pub fn set_window_focus(&self, focused: bool) -> Result<(), ChatError> {
        self.send(ChatCommand::WindowFocus(focused))
    }

    pub fn leave_room(&self) -> Result<(), ChatError> {
        self.send(ChatCommand::LeaveRoom)
    }

    /// Leave the room and stop the coordinator. Later calls fail with
    /// [`ChatError::SessionClosed`].
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(ChatCommand::Shutdown(done)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: ChatCommand) -> Result<(), ChatError> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::SessionClosed)
    }
}

struct ChatActor {
    sink: Arc<dyn AlertSink>,
    session: SessionClient,
    session_events: Option<mpsc::Receiver<SessionEvent>>,
    router: Option<ConversationRouter>,
    notifications: NotificationEngine,
    presence: PresenceMap,
    connection: ConnectionState,
    logged_in: bool,
    title: String,
    blinker: TitleBlinker,
    permission_generation: u64,
    commands: mpsc::WeakUnboundedSender<ChatCommand>,
    snapshot: watch::Sender<ChatSnapshot>,
    events: broadcast::Sender<ChatEvent>,
}

async fn next_session_event(
    events: &mut Option<mpsc::Receiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl ChatActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ChatCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ChatCommand::Shutdown(done)) => {
                        self.teardown();
                        self.publish_snapshot();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                event = next_session_event(&mut self.session_events) => match event {
                    Some(event) => self.handle_session_event(event),
                    None => self.session_events = None,
                },
            }
            self.publish_snapshot();
        }
        info!("chat: coordinator stopped");
    }

    fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Login { user_id, reply } => {
                let _ = reply.send(self.login(&user_id));
            }
            ChatCommand::SelectUser(peer) => {
                let Some(router) = self.router.as_mut() else {
                    debug!(peer = %peer, "chat: select ignored, not logged in");
                    return;
                };
                let actions = router.select_peer(peer, &mut self.notifications);
                self.apply_actions(actions);
            }
            ChatCommand::SendMessage(content) => {
                let Some(router) = self.router.as_mut() else {
                    debug!("chat: send ignored, not logged in");
                    return;
                };
                if router.compose_and_send(&content, &self.session).is_none() {
                    debug!("chat: nothing sent");
                }
            }
            ChatCommand::ToggleSound(reply) => {
                let _ = reply.send(self.notifications.toggle_sound());
            }
            ChatCommand::ToggleDesktopAlert(reply) => {
                let _ = reply.send(self.notifications.toggle_desktop_alert());
            }
            ChatCommand::ClearAllUnread => {
                let actions = self.notifications.clear_all_unread();
                self.apply_actions(actions);
            }
            ChatCommand::WindowFocus(true) => {
                let actions = self.notifications.on_window_focus_gained();
                self.apply_actions(actions);
            }
            ChatCommand::WindowFocus(false) => self.notifications.on_window_focus_lost(),
            ChatCommand::PermissionResolved {
                generation,
                permission,
            } => {
                if generation == self.permission_generation {
                    info!(?permission, "chat: desktop notification permission resolved");
                    self.notifications.set_desktop_permission(permission);
                }
            }
            ChatCommand::TitleTick => {
                if let Some(title) = self.notifications.on_title_tick() {
                    self.set_title(title);
                }
            }
            ChatCommand::LeaveRoom => self.teardown(),
            ChatCommand::Shutdown(_) => {}
        }
    }

    fn login(&mut self, raw: &str) -> Result<(), ChatError> {
        let user_id = raw.trim();
        if user_id.is_empty() {
            return Err(ChatError::EmptyUserId);
        }
        if let Some(router) = &self.router {
            return Err(ChatError::AlreadyLoggedIn(router.local_user().clone()));
        }

        let user = UserId::from(user_id);
        info!(user = %user, "chat: logging in");
        self.router = Some(ConversationRouter::new(user.clone()));
        self.notifications.set_local_user(Some(user.clone()));
        self.connection = ConnectionState::Connecting;
        self.logged_in = false;
        self.session_events = Some(self.session.connect(user));
        self.request_desktop_permission();
        Ok(())
    }

    fn request_desktop_permission(&mut self) {
        self.permission_generation += 1;
        let generation = self.permission_generation;
        let sink = Arc::clone(&self.sink);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let permission = sink.request_desktop_permission().await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(ChatCommand::PermissionResolved {
                    generation,
                    permission,
                });
            }
        });
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { user, reconnect } => {
                self.connection = ConnectionState::Connected;
                self.logged_in = true;
                let _ = self.events.send(ChatEvent::Connected { user, reconnect });
            }
            SessionEvent::MessageReceived(message) => {
                let Some(router) = self.router.as_mut() else {
                    return;
                };
                let active = router
                    .is_active_conversation(&message.sender, self.notifications.is_window_focused());
                let sender_name = domain::display_name(&self.presence, &message.sender).to_string();
                let actions = self
                    .notifications
                    .on_message_received(&message, &sender_name, active);
                router.record_inbound(message);
                self.apply_actions(actions);
            }
            SessionEvent::UsersUpdated(presence) => {
                debug!(users = presence.len(), "chat: presence updated");
                self.presence = presence;
            }
            SessionEvent::ConnectionError(err) => {
                if self.logged_in {
                    self.connection = ConnectionState::Reconnecting;
                    let _ = self.events.send(ChatEvent::ConnectionLost(err));
                } else {
                    warn!(error = %err, "chat: login failed");
                    self.teardown();
                    let _ = self.events.send(ChatEvent::LoginFailed(err));
                }
            }
            SessionEvent::PayloadRejected(reason) => {
                let _ = self.events.send(ChatEvent::PayloadRejected(reason));
            }
            SessionEvent::Disconnected => {
                self.session_events = None;
                self.connection = ConnectionState::Disconnected;
            }
        }
    }

    /// Leave-room teardown, also run on shutdown.
    fn teardown(&mut self) {
        let was_active = self.router.is_some();
        self.session.disconnect();
        self.session_events = None;
        let actions = self.notifications.cleanup();
        self.apply_actions(actions);
        self.blinker.stop();
        self.notifications.set_local_user(None);
        self.router = None;
        self.presence.clear();
        self.connection = ConnectionState::Disconnected;
        self.logged_in = false;
        if was_active {
            info!("chat: left room");
            let _ = self.events.send(ChatEvent::LoggedOut);
        }
    }

    fn apply_actions(&mut self, actions: Vec<AlertAction>) {
        for action in actions {
            match action {
                AlertAction::Desktop(alert) => self.sink.show_desktop(&alert),
                AlertAction::PlayTone(tone) => self.sink.play_tone(&tone),
                AlertAction::SetTitle(title) => self.set_title(title),
                AlertAction::StartTitleBlink => {
                    let commands = self.commands.clone();
                    self.blinker.start(move || match commands.upgrade() {
                        Some(commands) => commands.send(ChatCommand::TitleTick).is_ok(),
                        None => false,
                    });
                }
                AlertAction::StopTitleBlink => self.blinker.stop(),
            }
        }
    }

    fn set_title(&mut self, title: String) {
        if self.title != title {
            self.sink.set_title(&title);
            self.title = title;
        }
    }

    fn publish_snapshot(&self) {
        let next = self.build_snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn build_snapshot(&self) -> ChatSnapshot {
        let local_user = self.router.as_ref().map(|router| router.local_user().clone());
        let peers = match &local_user {
            Some(local) => domain::peers_excluding(&self.presence, local)
                .map(|(id, name)| (id.clone(), name.clone()))
                .collect(),
            None => Vec::new(),
        };
        let (selected_peer, visible_thread) = match &self.router {
            Some(router) => (
                router.selected_peer().cloned(),
                router.visible_thread().cloned().collect(),
            ),
            None => (None, Vec::new()),
        };

        ChatSnapshot {
            local_user,
            logged_in: self.logged_in,
            connection: self.connection,
            presence: self.presence.clone(),
            peers,
            selected_peer,
            visible_thread,
            unread: self.notifications.unread().to_sorted(),
            total_unread: self.notifications.total_unread(),
            alerts: self.notifications.alert_config(),
            desktop_permission: self.notifications.desktop_permission(),
            window_focused: self.notifications.is_window_focused(),
            title: self.title.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
