use std::cell::RefCell;

use super::*;

struct RecordingPublisher {
    accept: bool,
    sent: RefCell<Vec<DirectMessage>>,
}

impl RecordingPublisher {
    fn accepting() -> Self {
        Self {
            accept: true,
            sent: RefCell::new(Vec::new()),
        }
    }

    fn disconnected() -> Self {
        Self {
            accept: false,
            sent: RefCell::new(Vec::new()),
        }
    }
}

impl MessagePublisher for RecordingPublisher {
    fn send_message(&self, message: &DirectMessage) -> bool {
        if self.accept {
            self.sent.borrow_mut().push(message.clone());
        }
        self.accept
    }
}

fn user(id: &str) -> UserId {
    UserId::from(id)
}

fn inbound(from: &str, to: &str, content: &str) -> DirectMessage {
    DirectMessage::new(user(from), user(to), content)
}

fn contents<'a>(thread: impl Iterator<Item = &'a DirectMessage>) -> Vec<&'a str> {
    thread.map(|message| message.content.as_str()).collect()
}

#[test]
fn no_selection_means_empty_thread() {
    let mut router = ConversationRouter::new(user("alice"));
    router.record_inbound(inbound("bob", "alice", "hi"));
    assert_eq!(router.visible_thread().count(), 0);
}

#[test]
fn thread_holds_both_directions_in_order() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    let publisher = RecordingPublisher::accepting();

    router.record_inbound(inbound("bob", "alice", "one"));
    router.record_inbound(inbound("carol", "alice", "other"));
    router.select_peer(user("bob"), &mut notifications);
    router.compose_and_send("two", &publisher);
    router.record_inbound(inbound("bob", "alice", "three"));

    assert_eq!(contents(router.visible_thread()), vec!["one", "two", "three"]);
    assert_eq!(router.log().len(), 4);

    router.select_peer(user("carol"), &mut notifications);
    assert_eq!(contents(router.visible_thread()), vec!["other"]);
}

#[test]
fn blank_content_is_neither_sent_nor_logged() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    let publisher = RecordingPublisher::accepting();
    router.select_peer(user("bob"), &mut notifications);

    assert!(router.compose_and_send("", &publisher).is_none());
    assert!(router.compose_and_send("   ", &publisher).is_none());
    assert!(publisher.sent.borrow().is_empty());
    assert!(router.log().is_empty());
}

#[test]
fn nothing_is_sent_without_selected_peer() {
    let mut router = ConversationRouter::new(user("alice"));
    let publisher = RecordingPublisher::accepting();

    assert!(router.compose_and_send("hello", &publisher).is_none());
    assert!(publisher.sent.borrow().is_empty());
}

#[test]
fn sent_message_is_trimmed_and_appended() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    let publisher = RecordingPublisher::accepting();
    router.select_peer(user("bob"), &mut notifications);

    let sent = router
        .compose_and_send("  hello bob \n", &publisher)
        .cloned()
        .expect("sent");
    assert_eq!(sent.sender, user("alice"));
    assert_eq!(sent.receiver, user("bob"));
    assert_eq!(sent.content, "hello bob");
    assert_eq!(publisher.sent.borrow().as_slice(), &[sent.clone()]);
    assert_eq!(router.log(), &[sent]);
}

#[test]
fn dropped_publish_is_not_logged() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    let publisher = RecordingPublisher::disconnected();
    router.select_peer(user("bob"), &mut notifications);

    assert!(router.compose_and_send("hello", &publisher).is_none());
    assert!(router.log().is_empty());
}

#[test]
fn echo_of_own_message_is_not_duplicated() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    let publisher = RecordingPublisher::accepting();
    router.select_peer(user("bob"), &mut notifications);

    router.compose_and_send("hello", &publisher);
    assert!(!router.record_inbound(inbound("alice", "bob", "hello")));
    assert_eq!(contents(router.visible_thread()), vec!["hello"]);
}

#[test]
fn selecting_peer_clears_its_unread_count() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    notifications.set_local_user(Some(user("alice")));

    let message = inbound("bob", "alice", "hi");
    notifications.on_message_received(&message, "Bob", false);
    router.record_inbound(message);
    assert_eq!(notifications.unread_count(&user("bob")), 1);

    router.select_peer(user("bob"), &mut notifications);
    assert_eq!(notifications.unread_count(&user("bob")), 0);
    assert_eq!(router.selected_peer(), Some(&user("bob")));
    assert_eq!(contents(router.visible_thread()), vec!["hi"]);
}

#[test]
fn active_conversation_needs_selection_and_focus() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    router.select_peer(user("bob"), &mut notifications);

    assert!(router.is_active_conversation(&user("bob"), true));
    assert!(!router.is_active_conversation(&user("bob"), false));
    assert!(!router.is_active_conversation(&user("carol"), true));
}

#[test]
fn unfocused_message_from_selected_peer_still_counts() {
    let mut router = ConversationRouter::new(user("alice"));
    let mut notifications = NotificationEngine::new("1:1 Chat");
    notifications.set_local_user(Some(user("alice")));
    notifications.set_desktop_permission(crate::notifications::DesktopPermission::Granted);
    router.select_peer(user("bob"), &mut notifications);
    notifications.on_window_focus_lost();

    let message = inbound("bob", "alice", "hi");
    let active = router.is_active_conversation(&message.sender, notifications.is_window_focused());
    let actions = notifications.on_message_received(&message, "Bob", active);
    router.record_inbound(message);

    assert_eq!(notifications.unread_count(&user("bob")), 1);
    assert!(actions.iter().any(|action| matches!(
        action,
        AlertAction::Desktop(alert) if alert.title.contains("Bob")
    )));
    assert_eq!(contents(router.visible_thread()), vec!["hi"]);
}
