use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque user identifier supplied at login. Not validated against any
/// directory; any non-empty string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Snapshot of every connected user, keyed by id, valued by display name.
/// Each broker update replaces the previous snapshot wholesale.
pub type PresenceMap = BTreeMap<UserId, String>;

/// A one-to-one message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    /// Local receipt (or send) time; never read from or written to the wire.
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl DirectMessage {
    pub fn new(sender: UserId, receiver: UserId, content: impl Into<String>) -> Self {
        Self {
            sender,
            receiver,
            content: content.into(),
            received_at: Utc::now(),
        }
    }

    /// True when the message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender == a && &self.receiver == b) || (&self.sender == b && &self.receiver == a)
    }
}

/// Display name for `user`, falling back to the raw id when the user is not
/// present in the snapshot.
pub fn display_name<'a>(presence: &'a PresenceMap, user: &'a UserId) -> &'a str {
    presence
        .get(user)
        .map(String::as_str)
        .unwrap_or_else(|| user.as_str())
}

/// Presence entries with the local user removed, in id order.
pub fn peers_excluding<'a>(
    presence: &'a PresenceMap,
    local: &'a UserId,
) -> impl Iterator<Item = (&'a UserId, &'a String)> + 'a {
    presence.iter().filter(move |(id, _)| *id != local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_between_matches_both_directions() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let carol = UserId::from("carol");

        let msg = DirectMessage::new(bob.clone(), alice.clone(), "hi");
        assert!(msg.is_between(&alice, &bob));
        assert!(msg.is_between(&bob, &alice));
        assert!(!msg.is_between(&alice, &carol));
    }

    #[test]
    fn peers_excluding_drops_local_user() {
        let mut presence = PresenceMap::new();
        presence.insert(UserId::from("alice"), "Alice".to_string());
        presence.insert(UserId::from("bob"), "Bob".to_string());

        let local = UserId::from("alice");
        let peers: Vec<_> = peers_excluding(&presence, &local)
            .map(|(id, name)| (id.as_str(), name.as_str()))
            .collect();
        assert_eq!(peers, vec![("bob", "Bob")]);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let presence = PresenceMap::new();
        let ghost = UserId::from("ghost");
        assert_eq!(display_name(&presence, &ghost), "ghost");
    }
}
