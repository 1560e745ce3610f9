//! Client engine for one-to-one chat over a STOMP broker.
//!
//! Layers, bottom up: [`transport`] keeps a WebSocket STOMP connection alive,
//! [`session_client`] turns it into typed per-user events, [`notifications`]
//! and [`router`] hold the unread and conversation state, and [`chat`]
//! coordinates all of them behind the [`ChatSession`] handle.

pub mod alerts;
pub mod chat;
pub mod config;
pub mod error;
pub mod notifications;
pub mod router;
pub mod session_client;
pub mod transport;

pub use alerts::{AlertSink, TitleBlinker, TracingAlertSink};
pub use chat::{ChatEvent, ChatSession, ChatSnapshot, ConnectionState};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use error::{ChatError, ConfigError, TransportError};
pub use notifications::{
    AlertAction, AlertConfig, DesktopAlert, DesktopPermission, NotificationEngine, Tone,
    UnreadState,
};
pub use router::ConversationRouter;
pub use session_client::{MessagePublisher, SessionClient, SessionEvent};
pub use transport::{StompTransport, TransportConfig, TransportEvent, TransportHandle};

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;
