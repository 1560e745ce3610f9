use shared::domain::{DirectMessage, UserId};
use tracing::debug;

use crate::{
    notifications::{AlertAction, NotificationEngine},
    session_client::MessagePublisher,
};

/// Session message log plus the currently selected peer.
///
/// Sent messages are appended optimistically once the publisher accepts them.
/// Broker echoes of our own messages are therefore dropped on receipt so the
/// log never holds the same message twice.
#[derive(Debug, Clone)]
pub struct ConversationRouter {
    local_user: UserId,
    log: Vec<DirectMessage>,
    selected: Option<UserId>,
}

impl ConversationRouter {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            log: Vec::new(),
            selected: None,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn selected_peer(&self) -> Option<&UserId> {
        self.selected.as_ref()
    }

    /// Select `peer` and clear its unread count.
    pub fn select_peer(
        &mut self,
        peer: UserId,
        notifications: &mut NotificationEngine,
    ) -> Vec<AlertAction> {
        let actions = notifications.on_peer_selected(&peer);
        self.selected = Some(peer);
        actions
    }

    /// The sender is the selected peer and the window is focused.
    pub fn is_active_conversation(&self, sender: &UserId, window_focused: bool) -> bool {
        window_focused && self.selected.as_ref() == Some(sender)
    }

    /// Append an inbound message. Returns `false` for echoes of our own sends.
    pub fn record_inbound(&mut self, message: DirectMessage) -> bool {
        if message.sender == self.local_user {
            debug!(receiver = %message.receiver, "router: dropping echo of own message");
            return false;
        }
        self.log.push(message);
        true
    }

    /// Messages between the local user and the selected peer, oldest first.
    pub fn visible_thread(&self) -> impl Iterator<Item = &DirectMessage> + '_ {
        let peer = self.selected.as_ref();
        self.log.iter().filter(move |message| match peer {
            Some(peer) => message.is_between(&self.local_user, peer),
            None => false,
        })
    }

    /// Trim `content` and send it to the selected peer. Nothing is sent or
    /// logged for blank content, without a selected peer, or when the
    /// publisher drops the message.
    pub fn compose_and_send(
        &mut self,
        content: &str,
        publisher: &impl MessagePublisher,
    ) -> Option<&DirectMessage> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let peer = self.selected.clone()?;

        let message = DirectMessage::new(self.local_user.clone(), peer, content);
        if !publisher.send_message(&message) {
            return None;
        }
        self.log.push(message);
        self.log.last()
    }

    pub fn log(&self) -> &[DirectMessage] {
        &self.log
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
