//! Client-side message list for the active conversation.
//!
//! Every entry carries its own send state. An optimistic entry starts
//! `Pending` and either becomes `Confirmed` (server response or server echo)
//! or is removed as a failed send. A logical message is present at most once.

use crate::delivery::DeliveryState;
use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub local_id: LocalId,
    pub state: EntryState,
    pub message: Message,
}

/// An optimistic entry rolled back after its send failed.
#[derive(Debug, Clone)]
pub struct FailedSend {
    pub local_id: LocalId,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Appended(LocalId),
    /// The push described an entry already in the store.
    Duplicate(LocalId),
}

pub struct MessageStore {
    entries: Vec<Entry>,
    next_local: u64,
    dedup_window_ms: i64,
}

impl MessageStore {
    pub fn new(dedup_window_ms: i64) -> Self {
        Self {
            entries: Vec::new(),
            next_local: 0,
            dedup_window_ms,
        }
    }

    fn allocate(&mut self) -> LocalId {
        self.next_local += 1;
        LocalId(self.next_local)
    }

    /// Replaces the store with server history, oldest first.
    pub fn load_history(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.created_at);
        self.entries.clear();
        for message in messages {
            let local_id = self.allocate();
            self.entries.push(Entry {
                local_id,
                state: EntryState::Confirmed,
                message,
            });
        }
    }

    pub fn append_optimistic(&mut self, mut message: Message) -> LocalId {
        message.id = None;
        message.delivery = DeliveryState::Sent;
        let local_id = self.allocate();
        self.entries.push(Entry {
            local_id,
            state: EntryState::Pending,
            message,
        });
        local_id
    }

    /// Merges a message that arrived over the push channel.
    pub fn reconcile(&mut self, pushed: Message) -> Reconciled {
        if let Some(id) = pushed.id.as_deref() {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.message.id.as_deref() == Some(id))
            {
                entry.message.delivery.advance(pushed.delivery);
                return Reconciled::Duplicate(entry.local_id);
            }
        }

        let window = self.dedup_window_ms;
        let pushed_has_id = pushed.id.is_some();
        let candidate = self.entries.iter_mut().find(|e| {
            (!pushed_has_id || e.message.id.is_none())
                && e.message.sender == pushed.sender
                && e.message.content == pushed.content
                && (e.message.created_at - pushed.created_at)
                    .num_milliseconds()
                    .abs()
                    <= window
        });

        if let Some(entry) = candidate {
            if entry.state == EntryState::Pending && pushed_has_id {
                tracing::debug!("Echo confirmed pending message {:?}", entry.local_id);
                entry.state = EntryState::Confirmed;
                entry.message.id = pushed.id;
                entry.message.created_at = pushed.created_at;
            } else if entry.message.id.is_none() {
                entry.message.id = pushed.id;
            }
            entry.message.delivery.advance(pushed.delivery);
            return Reconciled::Duplicate(entry.local_id);
        }

        let local_id = self.allocate();
        self.entries.push(Entry {
            local_id,
            state: EntryState::Confirmed,
            message: pushed,
        });
        Reconciled::Appended(local_id)
    }

    /// Applies the server's response to an optimistic send. Returns false if
    /// the entry is no longer in the store.
    pub fn confirm(&mut self, local_id: LocalId, server: Message) -> bool {
        let Some(pos) = self.position(local_id) else {
            return false;
        };

        if let Some(id) = server.id.as_deref() {
            let duplicate = self
                .entries
                .iter()
                .any(|e| e.local_id != local_id && e.message.id.as_deref() == Some(id));
            if duplicate {
                // The echo got here first and was appended on its own.
                self.entries.remove(pos);
                return true;
            }
        }

        let entry = &mut self.entries[pos];
        if entry.state == EntryState::Pending {
            entry.state = EntryState::Confirmed;
            entry.message.created_at = server.created_at;
        }
        if server.id.is_some() {
            entry.message.id = server.id;
        }
        entry.message.delivery.advance(server.delivery);
        true
    }

    /// Rolls back a pending send. Confirmed entries are kept.
    pub fn fail(&mut self, local_id: LocalId) -> Option<FailedSend> {
        let pos = self.position(local_id)?;
        if self.entries[pos].state != EntryState::Pending {
            return None;
        }
        let entry = self.entries.remove(pos);
        Some(FailedSend {
            local_id: entry.local_id,
            message: entry.message,
        })
    }

    pub fn mark_delivered(&mut self, id: &str) -> bool {
        self.advance(id, DeliveryState::Delivered)
    }

    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.advance(id, DeliveryState::Seen)
    }

    fn advance(&mut self, id: &str, to: DeliveryState) -> bool {
        self.entries
            .iter_mut()
            .find(|e| e.message.id.as_deref() == Some(id))
            .map(|e| e.message.delivery.advance(to))
            .unwrap_or(false)
    }

    /// Marks every message not sent by `me` as seen; returns how many changed.
    pub fn mark_inbound_seen(&mut self, me: &str) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| e.message.sender != me) {
            if entry.message.delivery.advance(DeliveryState::Seen) {
                changed += 1;
            }
        }
        changed
    }

    pub fn latest_inbound(&self, me: &str) -> Option<&Message> {
        self.entries
            .iter()
            .rev()
            .map(|e| &e.message)
            .find(|m| m.sender != me)
    }

    pub fn get(&self, local_id: LocalId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.local_id == local_id)
    }

    fn position(&self, local_id: LocalId) -> Option<usize> {
        self.entries.iter().position(|e| e.local_id == local_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::ConversationKey;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn key() -> ConversationKey {
        ConversationKey::direct("alice", "bob")
    }

    fn server_msg(id: &str, sender: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Some(id.to_string()),
            conversation: key(),
            sender: sender.to_string(),
            content: content.to_string(),
            created_at: at,
            delivery: DeliveryState::Sent,
        }
    }

    fn contents(store: &MessageStore) -> Vec<&str> {
        store.messages().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_history_is_sorted_and_replaces() {
        let mut store = MessageStore::new(1000);
        store.append_optimistic(Message::optimistic(key(), "alice", "stale", t0()));
        store.load_history(vec![
            server_msg("m2", "bob", "second", t0() + Duration::seconds(5)),
            server_msg("m1", "alice", "first", t0()),
        ]);
        assert_eq!(contents(&store), vec!["first", "second"]);
        assert!(store.iter().all(|e| e.state == EntryState::Confirmed));
    }

    #[test]
    fn test_echo_of_optimistic_is_not_duplicated() {
        let mut store = MessageStore::new(1000);
        let local = store.append_optimistic(Message::optimistic(key(), "alice", "hello", t0()));

        let echo = server_msg("m1", "alice", "hello", t0() + Duration::milliseconds(400));
        assert_eq!(store.reconcile(echo.clone()), Reconciled::Duplicate(local));
        assert_eq!(store.len(), 1);

        let entry = store.get(local).unwrap();
        assert_eq!(entry.state, EntryState::Confirmed);
        assert_eq!(entry.message.id.as_deref(), Some("m1"));

        // The HTTP response arriving afterwards keeps a single entry.
        assert!(store.confirm(local, echo.clone()));
        assert_eq!(store.len(), 1);

        // A second echo by id is also dropped.
        assert_eq!(store.reconcile(echo), Reconciled::Duplicate(local));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_confirm_then_echo() {
        let mut store = MessageStore::new(1000);
        let local = store.append_optimistic(Message::optimistic(key(), "alice", "hi", t0()));
        let server = server_msg("m7", "alice", "hi", t0() + Duration::milliseconds(30));

        assert!(store.confirm(local, server.clone()));
        assert_eq!(store.get(local).unwrap().state, EntryState::Confirmed);
        assert_eq!(store.reconcile(server), Reconciled::Duplicate(local));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_echo_outside_window_is_appended() {
        let mut store = MessageStore::new(1000);
        store.append_optimistic(Message::optimistic(key(), "alice", "hello", t0()));
        let late = server_msg("m1", "alice", "hello", t0() + Duration::milliseconds(1500));
        assert!(matches!(store.reconcile(late), Reconciled::Appended(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_echo_appended_before_confirm_collapses() {
        let mut store = MessageStore::new(1000);
        let local = store.append_optimistic(Message::optimistic(key(), "alice", "ping", t0()));
        let server = server_msg("m3", "alice", "ping", t0() + Duration::seconds(3));

        assert!(matches!(store.reconcile(server.clone()), Reconciled::Appended(_)));
        assert_eq!(store.len(), 2);

        assert!(store.confirm(local, server));
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages().next().unwrap().id.as_deref(), Some("m3"));
    }

    #[test]
    fn test_distinct_confirmed_messages_with_same_content() {
        let mut store = MessageStore::new(1000);
        store.reconcile(server_msg("m1", "bob", "ok", t0()));
        let again = server_msg("m2", "bob", "ok", t0() + Duration::milliseconds(200));
        assert!(matches!(store.reconcile(again), Reconciled::Appended(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_peer_message_goes_after_own_messages() {
        let mut store = MessageStore::new(1000);
        store.load_history(vec![server_msg("m1", "bob", "earlier", t0())]);
        let mine = Message::optimistic(key(), "bob", "mine", t0() + Duration::seconds(1));
        let own = store.append_optimistic(mine);
        store.confirm(own, server_msg("m2", "bob", "mine", t0() + Duration::seconds(1)));

        store.reconcile(server_msg("m3", "alice", "hello", t0() + Duration::seconds(2)));
        assert_eq!(contents(&store), vec!["earlier", "mine", "hello"]);
        let hellos = store
            .messages()
            .filter(|m| m.content == "hello" && m.sender == "alice")
            .count();
        assert_eq!(hellos, 1);
    }

    fn anonymous(sender: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: None,
            ..server_msg("", sender, content, at)
        }
    }

    #[test]
    fn test_idless_push_near_confirmed_entry_is_duplicate() {
        let mut store = MessageStore::new(1000);
        store.load_history(vec![server_msg("m1", "bob", "hey", t0())]);
        let local = store.iter().next().unwrap().local_id;

        let push = anonymous("bob", "hey", t0() + Duration::milliseconds(600));
        assert_eq!(store.reconcile(push), Reconciled::Duplicate(local));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(local).unwrap().message.id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_dedup_window_is_inclusive() {
        let mut store = MessageStore::new(1000);
        store.load_history(vec![server_msg("m1", "bob", "hey", t0())]);

        let edge = anonymous("bob", "hey", t0() + Duration::milliseconds(1000));
        assert!(matches!(store.reconcile(edge), Reconciled::Duplicate(_)));
        assert_eq!(store.len(), 1);

        let past = anonymous("bob", "hey", t0() + Duration::milliseconds(1001));
        assert!(matches!(store.reconcile(past), Reconciled::Appended(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_idless_push_leaves_pending_entry_pending() {
        let mut store = MessageStore::new(1000);
        let local = store.append_optimistic(Message::optimistic(key(), "alice", "hello", t0()));

        let push = anonymous("alice", "hello", t0() + Duration::milliseconds(200));
        assert_eq!(store.reconcile(push), Reconciled::Duplicate(local));
        let entry = store.get(local).unwrap();
        assert_eq!(entry.state, EntryState::Pending);
        assert!(entry.message.id.is_none());

        // Still a pending send, so a failed request rolls it back.
        assert!(store.fail(local).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_send_is_rolled_back() {
        let mut store = MessageStore::new(1000);
        store.load_history(vec![server_msg("m1", "bob", "hey", t0())]);
        let local = store.append_optimistic(Message::optimistic(key(), "alice", "lost", t0()));

        let failed = store.fail(local).unwrap();
        assert_eq!(failed.message.content, "lost");
        assert_eq!(contents(&store), vec!["hey"]);
        assert!(store.fail(local).is_none());
    }

    #[test]
    fn test_confirmed_entry_survives_fail() {
        let mut store = MessageStore::new(1000);
        let local = store.append_optimistic(Message::optimistic(key(), "alice", "sent", t0()));
        store.reconcile(server_msg("m1", "alice", "sent", t0()));
        assert!(store.fail(local).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delivery_marks_are_monotonic() {
        let mut store = MessageStore::new(1000);
        store.load_history(vec![server_msg("m1", "alice", "x", t0())]);

        assert!(store.mark_delivered("m1"));
        assert!(store.mark_seen("m1"));
        assert!(!store.mark_delivered("m1"));
        assert!(store.messages().next().unwrap().seen());

        assert!(!store.mark_seen("missing"));
    }

    #[test]
    fn test_inbound_seen() {
        let mut store = MessageStore::new(1000);
        store.load_history(vec![
            server_msg("m1", "bob", "a", t0()),
            server_msg("m2", "alice", "b", t0() + Duration::seconds(1)),
            server_msg("m3", "bob", "c", t0() + Duration::seconds(2)),
        ]);
        assert_eq!(store.latest_inbound("alice").unwrap().id.as_deref(), Some("m3"));
        assert_eq!(store.mark_inbound_seen("alice"), 2);
        assert_eq!(store.mark_inbound_seen("alice"), 0);
        assert!(!store.messages().find(|m| m.sender == "alice").unwrap().seen());
    }
}
