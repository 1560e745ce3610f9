use serde::Serialize;
use shared::{
    domain::{DirectMessage, PresenceMap, UserId},
    protocol::{self, Announcement, SendMessageRequest, SEND_DESTINATION, USERS_TOPIC},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    transport::{StompTransport, SubscriptionId, TransportConfig, TransportEvent, TransportHandle},
};

/// Bounded so a slow consumer pushes back on the socket instead of losing events.
pub const SESSION_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Subscriptions are live and JOIN has been published. `reconnect` is set
    /// for every connection after the first.
    Connected { user: UserId, reconnect: bool },
    MessageReceived(DirectMessage),
    UsersUpdated(PresenceMap),
    ConnectionError(TransportError),
    /// A frame arrived on a known subscription but its payload did not decode.
    /// The connection stays up.
    PayloadRejected(String),
    /// The transport has stopped after an explicit disconnect.
    Disconnected,
}

/// Anything that can hand a direct message to the broker.
pub trait MessagePublisher {
    /// Returns `false` when the message was dropped because nothing is connected.
    fn send_message(&self, message: &DirectMessage) -> bool;
}

struct LiveSession {
    user: UserId,
    transport: TransportHandle,
    pump: JoinHandle<()>,
}

/// Per-user chat session on top of a [`StompTransport`].
pub struct SessionClient {
    config: TransportConfig,
    live: Option<LiveSession>,
}

impl SessionClient {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, live: None }
    }

    /// Open a connection for `user` and return its event stream. The stream
    /// has a single owner and is never lossy: while it is full, frames wait
    /// in the transport. Each call starts a fresh stream.
    pub fn connect(&mut self, user: UserId) -> mpsc::Receiver<SessionEvent> {
        if let Some(previous) = self.live.take() {
            warn!(user = %previous.user, "session: connect called twice, dropping previous session");
            previous.transport.disconnect();
        }

        let (transport, transport_events) = StompTransport::connect(self.config.clone());
        let private = transport.subscribe(protocol::private_queue(&user));
        let presence = transport.subscribe(USERS_TOPIC);
        info!(user = %user, endpoint = %self.config.endpoint, "session: connecting");

        let (events, receiver) = mpsc::channel(SESSION_EVENT_BUFFER);
        let pump = tokio::spawn(pump_transport_events(
            user.clone(),
            transport.clone(),
            transport_events,
            private,
            presence,
            events,
        ));

        self.live = Some(LiveSession {
            user,
            transport,
            pump,
        });
        receiver
    }

    /// Best-effort LEAVE, then tear the connection down. No-op without a session.
    pub fn disconnect(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        announce(&live.transport, Announcement::leave(live.user.clone()));
        live.transport.disconnect();
        info!(user = %live.user, "session: disconnect requested");
        // The pump ends on its own once the transport reports Closed.
        drop(live.pump);
    }

    pub fn is_connected(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.transport.is_connected())
    }

    pub fn current_user(&self) -> Option<&UserId> {
        self.live.as_ref().map(|live| &live.user)
    }
}

impl MessagePublisher for SessionClient {
    fn send_message(&self, message: &DirectMessage) -> bool {
        let Some(live) = self.live.as_ref() else {
            debug!(receiver = %message.receiver, "session: dropping message, not connected");
            return false;
        };
        match encode_json(&SendMessageRequest::from(message)) {
            Some(body) => live.transport.publish(SEND_DESTINATION, body),
            None => false,
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn announce(transport: &TransportHandle, announcement: Announcement) -> bool {
    match encode_json(&announcement) {
        Some(body) => transport.publish(announcement.kind.destination(), body),
        None => false,
    }
}

fn encode_json<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(body) => Some(body),
        Err(err) => {
            warn!(error = %err, "session: failed to encode payload");
            None
        }
    }
}

async fn pump_transport_events(
    user: UserId,
    transport: TransportHandle,
    mut incoming: mpsc::Receiver<TransportEvent>,
    private: SubscriptionId,
    presence: SubscriptionId,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut reconnect = false;

    while let Some(event) = incoming.recv().await {
        let session_event = match event {
            TransportEvent::Connected { attempt } => {
                announce(&transport, Announcement::join(user.clone()));
                info!(user = %user, attempt, reconnect, "session: joined");
                let connected = SessionEvent::Connected {
                    user: user.clone(),
                    reconnect,
                };
                reconnect = true;
                connected
            }
            TransportEvent::Message {
                subscription,
                destination,
                body,
            } => {
                if subscription == private {
                    match protocol::decode_direct_message(&body) {
                        Ok(message) => SessionEvent::MessageReceived(message),
                        Err(err) => {
                            warn!(%destination, error = %err, "session: rejected direct message");
                            SessionEvent::PayloadRejected(err.to_string())
                        }
                    }
                } else if subscription == presence {
                    match protocol::decode_presence(&body) {
                        Ok(snapshot) => SessionEvent::UsersUpdated(snapshot),
                        Err(err) => {
                            warn!(%destination, error = %err, "session: rejected presence snapshot");
                            SessionEvent::PayloadRejected(err.to_string())
                        }
                    }
                } else {
                    debug!(
                        subscription = subscription.as_str(),
                        %destination,
                        "session: frame for unknown subscription"
                    );
                    continue;
                }
            }
            TransportEvent::Error(err) => SessionEvent::ConnectionError(err),
            TransportEvent::Closed => {
                let _ = events.send(SessionEvent::Disconnected).await;
                break;
            }
        };
        // Keep draining the transport after the consumer is gone so it can
        // still reach Closed.
        if events.send(session_event).await.is_err() {
            debug!(user = %user, "session: event consumer dropped");
        }
    }
}
