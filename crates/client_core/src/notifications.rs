//! Unread accounting and alert decisions.
//!
//! [`NotificationEngine`] performs no I/O. Every transition returns the
//! [`AlertAction`]s the host should carry out, in order.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use shared::domain::{DirectMessage, UserId};

pub const PREVIEW_CHARS: usize = 50;
pub const PREVIEW_ELLIPSIS: &str = "...";
pub const ALERT_TAG: &str = "chat-message";
pub const ALERT_AUTO_CLOSE: Duration = Duration::from_secs(3);

/// Short sine "ding" played for incoming messages.
pub const MESSAGE_TONE: Tone = Tone {
    frequency_hz: 800.0,
    start_gain: 0.3,
    end_gain: 0.01,
    duration: Duration::from_millis(500),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesktopPermission {
    /// Not asked yet, or the user dismissed the prompt.
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertConfig {
    pub sound_enabled: bool,
    pub desktop_enabled: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            desktop_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopAlert {
    pub title: String,
    pub body: String,
    pub tag: &'static str,
    pub auto_close: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub start_gain: f32,
    pub end_gain: f32,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertAction {
    Desktop(DesktopAlert),
    PlayTone(Tone),
    SetTitle(String),
    StartTitleBlink,
    StopTitleBlink,
}

/// `total` always equals the sum of `per_peer`; peers with nothing unread
/// have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadState {
    total: usize,
    per_peer: HashMap<UserId, usize>,
}

impl UnreadState {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn count(&self, peer: &UserId) -> usize {
        self.per_peer.get(peer).copied().unwrap_or(0)
    }

    pub fn per_peer(&self) -> &HashMap<UserId, usize> {
        &self.per_peer
    }

    /// Sorted copy for rendering.
    pub fn to_sorted(&self) -> BTreeMap<UserId, usize> {
        self.per_peer
            .iter()
            .map(|(peer, count)| (peer.clone(), *count))
            .collect()
    }

    fn increment(&mut self, peer: &UserId) {
        *self.per_peer.entry(peer.clone()).or_insert(0) += 1;
        self.total += 1;
    }

    /// Returns how many were cleared.
    fn clear(&mut self, peer: &UserId) -> usize {
        let cleared = self.per_peer.remove(peer).unwrap_or(0);
        self.total -= cleared;
        cleared
    }

    fn clear_all(&mut self) {
        self.per_peer.clear();
        self.total = 0;
    }
}

/// Truncate `content` to [`PREVIEW_CHARS`] characters, marking the cut.
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}{PREVIEW_ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct NotificationEngine {
    local_user: Option<UserId>,
    unread: UnreadState,
    config: AlertConfig,
    permission: DesktopPermission,
    window_focused: bool,
    animating: bool,
    blink_on: bool,
    original_title: String,
}

impl NotificationEngine {
    pub fn new(original_title: impl Into<String>) -> Self {
        Self {
            local_user: None,
            unread: UnreadState::default(),
            config: AlertConfig::default(),
            permission: DesktopPermission::Default,
            window_focused: true,
            animating: false,
            blink_on: false,
            original_title: original_title.into(),
        }
    }

    pub fn set_local_user(&mut self, user: Option<UserId>) {
        self.local_user = user;
    }

    pub fn set_desktop_permission(&mut self, permission: DesktopPermission) {
        self.permission = permission;
    }

    /// `is_active_conversation` is true when the sender is the selected peer
    /// and the window has focus.
    pub fn on_message_received(
        &mut self,
        message: &DirectMessage,
        sender_name: &str,
        is_active_conversation: bool,
    ) -> Vec<AlertAction> {
        if self.local_user.as_ref() == Some(&message.sender) || is_active_conversation {
            return Vec::new();
        }

        self.unread.increment(&message.sender);

        let mut actions = Vec::new();
        if self.config.desktop_enabled && self.permission == DesktopPermission::Granted {
            actions.push(AlertAction::Desktop(DesktopAlert {
                title: format!("New message from {sender_name}"),
                body: preview(&message.content),
                tag: ALERT_TAG,
                auto_close: ALERT_AUTO_CLOSE,
            }));
        }
        if self.config.sound_enabled {
            actions.push(AlertAction::PlayTone(MESSAGE_TONE));
        }
        actions.push(AlertAction::SetTitle(self.counted_title()));
        self.start_animation(&mut actions);
        actions
    }

    /// Clears `peer`'s unread count in O(1). Nothing happens when the peer had
    /// nothing unread.
    pub fn on_peer_selected(&mut self, peer: &UserId) -> Vec<AlertAction> {
        let mut actions = Vec::new();
        if self.unread.clear(peer) == 0 {
            return actions;
        }
        if self.unread.total() == 0 {
            self.restore_title(&mut actions);
        } else {
            actions.push(AlertAction::SetTitle(self.counted_title()));
        }
        actions
    }

    /// Stops the animation but leaves unread counts alone.
    pub fn on_window_focus_gained(&mut self) -> Vec<AlertAction> {
        self.window_focused = true;
        let mut actions = Vec::new();
        self.stop_animation(&mut actions);
        if self.unread.total() > 0 {
            actions.push(AlertAction::SetTitle(self.counted_title()));
        }
        actions
    }

    pub fn on_window_focus_lost(&mut self) {
        self.window_focused = false;
    }

    /// Next title for the running animation, or `None` when it is stopped.
    pub fn on_title_tick(&mut self) -> Option<String> {
        if !self.animating {
            return None;
        }
        self.blink_on = !self.blink_on;
        Some(if self.blink_on {
            format!("🔔 New message ({})", self.unread.total())
        } else {
            self.original_title.clone()
        })
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.config.sound_enabled = !self.config.sound_enabled;
        self.config.sound_enabled
    }

    pub fn toggle_desktop_alert(&mut self) -> bool {
        self.config.desktop_enabled = !self.config.desktop_enabled;
        self.config.desktop_enabled
    }

    pub fn clear_all_unread(&mut self) -> Vec<AlertAction> {
        self.unread.clear_all();
        let mut actions = Vec::new();
        self.restore_title(&mut actions);
        actions
    }

    /// Session teardown: stop animating and forget every unread count.
    pub fn cleanup(&mut self) -> Vec<AlertAction> {
        self.clear_all_unread()
    }

    pub fn unread(&self) -> &UnreadState {
        &self.unread
    }

    pub fn unread_count(&self, peer: &UserId) -> usize {
        self.unread.count(peer)
    }

    pub fn total_unread(&self) -> usize {
        self.unread.total()
    }

    pub fn alert_config(&self) -> AlertConfig {
        self.config
    }

    pub fn is_sound_enabled(&self) -> bool {
        self.config.sound_enabled
    }

    pub fn is_desktop_enabled(&self) -> bool {
        self.config.desktop_enabled
    }

    pub fn desktop_permission(&self) -> DesktopPermission {
        self.permission
    }

    pub fn is_window_focused(&self) -> bool {
        self.window_focused
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn original_title(&self) -> &str {
        &self.original_title
    }

    fn counted_title(&self) -> String {
        format!("({}) {}", self.unread.total(), self.original_title)
    }

    fn start_animation(&mut self, actions: &mut Vec<AlertAction>) {
        if self.animating {
            return;
        }
        self.animating = true;
        self.blink_on = false;
        actions.push(AlertAction::StartTitleBlink);
    }

    fn restore_title(&mut self, actions: &mut Vec<AlertAction>) {
        if self.animating {
            self.stop_animation(actions);
        } else {
            actions.push(AlertAction::SetTitle(self.original_title.clone()));
        }
    }

    fn stop_animation(&mut self, actions: &mut Vec<AlertAction>) {
        if !self.animating {
            return;
        }
        self.animating = false;
        self.blink_on = false;
        actions.push(AlertAction::StopTitleBlink);
        actions.push(AlertAction::SetTitle(self.original_title.clone()));
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
