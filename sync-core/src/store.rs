//! Ordered message log for the open conversation.
//!
//! The store holds the messages of one `(viewer, counterparty)` pair that
//! the viewer is allowed to see, sorted by `(created, id)` and deduplicated
//! by id. Every apply operation is idempotent so push events can be
//! replayed safely:
//!
//! 1. `begin_loading()` - switch to a counterparty, queue incoming events
//! 2. `load()` - install the fetched snapshot, replay the queue
//! 3. `apply_remote_*()` - live updates
//! 4. `reset()` - conversation closed or session torn down
//!
//! Conflicting concurrent edits resolve last-write-wins: the most recently
//! applied server state replaces the local copy. Two transitions are
//! terminal and never undone by a late event: a tombstone, and a message
//! the viewer hid for themselves.

use std::collections::{BTreeMap, HashMap, HashSet};
use sync_types::{Message, MessageId, Timestamp, UserId};

use crate::visibility::{Rendered, VisibilityPolicy};

/// Outcome of applying a mutation to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new message entered the log.
    Inserted,
    /// An existing entry was replaced with different state.
    Replaced,
    /// An entry left the log.
    Removed,
    /// Nothing changed (duplicate, hidden, out of scope, or absent).
    Unchanged,
    /// Queued until the pending load completes.
    Staged,
}

impl Applied {
    /// True when the visible log changed.
    pub fn changed(&self) -> bool {
        matches!(self, Applied::Inserted | Applied::Replaced | Applied::Removed)
    }
}

#[derive(Debug, Clone)]
enum StagedEvent {
    Create(Message),
    Update(Message),
    Delete(MessageId),
}

/// Sorted, id-deduplicated log of the viewer's conversation with one counterparty.
#[derive(Debug, Clone)]
pub struct MessageStore {
    viewer: UserId,
    counterparty: Option<UserId>,
    policy: VisibilityPolicy,
    entries: BTreeMap<(Timestamp, MessageId), Message>,
    index: HashMap<MessageId, Timestamp>,
    /// Ids the viewer hid locally; late echoes must not bring them back.
    hidden: HashSet<MessageId>,
    /// `Some` between `begin_loading` and `load`.
    staged: Option<Vec<StagedEvent>>,
}

impl MessageStore {
    /// Empty store for `viewer` with no conversation selected.
    pub fn new(viewer: UserId, policy: VisibilityPolicy) -> Self {
        Self {
            viewer,
            counterparty: None,
            policy,
            entries: BTreeMap::new(),
            index: HashMap::new(),
            hidden: HashSet::new(),
            staged: None,
        }
    }

    /// The viewer this store renders for.
    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    /// The counterparty of the current conversation, if any.
    pub fn counterparty(&self) -> Option<&UserId> {
        self.counterparty.as_ref()
    }

    /// The visibility policy in use.
    pub fn policy(&self) -> &VisibilityPolicy {
        &self.policy
    }

    /// True between `begin_loading` and `load`.
    pub fn is_loading(&self) -> bool {
        self.staged.is_some()
    }

    /// Clear all state and scope the store to `counterparty`.
    ///
    /// Remote events arriving before [`load`](Self::load) are queued and
    /// replayed on top of the snapshot.
    pub fn begin_loading(&mut self, counterparty: UserId) {
        self.reset();
        self.counterparty = Some(counterparty);
        self.staged = Some(Vec::new());
    }

    /// Replace the log wholesale with `initial`.
    ///
    /// Messages outside the pair or hidden for the viewer are dropped; input
    /// order does not matter. Events queued since `begin_loading` are then
    /// replayed in arrival order. Returns the number of visible messages.
    pub fn load<I>(&mut self, initial: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        let staged = self.staged.take().unwrap_or_default();
        self.entries.clear();
        self.index.clear();
        self.hidden.clear();

        if self.counterparty.is_none() {
            return 0;
        }

        for msg in initial {
            if self.in_scope(&msg) && self.policy.is_visible(&msg, &self.viewer) {
                self.upsert(msg);
            }
        }

        for event in staged {
            match event {
                StagedEvent::Create(msg) => self.apply_remote_create(msg),
                StagedEvent::Update(msg) => self.apply_remote_update(msg),
                StagedEvent::Delete(id) => self.apply_remote_delete(&id),
            };
        }

        self.entries.len()
    }

    /// Insert a message announced by a `create` push event.
    ///
    /// A create for an id already present (the local echo of our own send
    /// racing the push) is a no-op.
    pub fn apply_remote_create(&mut self, msg: Message) -> Applied {
        if let Some(staged) = self.staged.as_mut() {
            staged.push(StagedEvent::Create(msg));
            return Applied::Staged;
        }
        if !self.in_scope(&msg)
            || self.index.contains_key(&msg.id)
            || self.hidden.contains(&msg.id)
        {
            return Applied::Unchanged;
        }
        if !self.policy.is_visible(&msg, &self.viewer) {
            return Applied::Unchanged;
        }
        self.upsert(msg)
    }

    /// Apply an `update` push event.
    ///
    /// A message that became hidden for the viewer leaves the log. A visible
    /// one is upserted, which also covers updates for messages never loaded.
    /// An update that would revive a tombstone or a locally hidden message
    /// is stale and ignored.
    pub fn apply_remote_update(&mut self, msg: Message) -> Applied {
        if let Some(staged) = self.staged.as_mut() {
            staged.push(StagedEvent::Update(msg));
            return Applied::Staged;
        }
        if !self.in_scope(&msg) || self.hidden.contains(&msg.id) {
            return Applied::Unchanged;
        }
        if !msg.is_deleted && self.get(&msg.id).is_some_and(|old| old.is_deleted) {
            return Applied::Unchanged;
        }
        if !self.policy.is_visible(&msg, &self.viewer) {
            return match self.remove(&msg.id) {
                Some(_) => Applied::Removed,
                None => Applied::Unchanged,
            };
        }
        self.upsert(msg)
    }

    /// Remove a message deleted from storage. Unconditional.
    pub fn apply_remote_delete(&mut self, id: &MessageId) -> Applied {
        if let Some(staged) = self.staged.as_mut() {
            staged.push(StagedEvent::Delete(id.clone()));
            return Applied::Staged;
        }
        match self.remove(id) {
            Some(_) => Applied::Removed,
            None => Applied::Unchanged,
        }
    }

    /// Optimistically drop a message the viewer is hiding for themselves.
    ///
    /// Returns the removed message so a failed write can [`restore`](Self::restore) it.
    pub fn hide_locally(&mut self, id: &MessageId) -> Option<Message> {
        let removed = self.remove(id)?;
        self.hidden.insert(id.clone());
        Some(removed)
    }

    /// Roll back a failed optimistic hide.
    pub fn restore(&mut self, msg: Message) -> Applied {
        if self.staged.is_some() || !self.in_scope(&msg) || !self.hidden.remove(&msg.id) {
            return Applied::Unchanged;
        }
        if self.index.contains_key(&msg.id) {
            return Applied::Unchanged;
        }
        self.upsert(msg)
    }

    /// Drop all messages, any queued events, and the counterparty.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.hidden.clear();
        self.staged = None;
        self.counterparty = None;
    }

    /// Messages in order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.values()
    }

    /// Render-ready view in order.
    pub fn rendered(&self) -> Vec<Rendered> {
        self.entries
            .values()
            .filter_map(|msg| self.policy.render(msg, &self.viewer))
            .collect()
    }

    /// Look up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let created = self.index.get(id)?;
        self.entries.get(&(*created, id.clone()))
    }

    /// True when `id` is in the log.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of visible messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of messages the viewer received and has not read, in order.
    pub fn unread_ids(&self) -> Vec<MessageId> {
        self.entries
            .values()
            .filter(|msg| msg.is_unread_for(&self.viewer))
            .map(|msg| msg.id.clone())
            .collect()
    }

    fn in_scope(&self, msg: &Message) -> bool {
        match &self.counterparty {
            Some(counterparty) => msg.is_between(&self.viewer, counterparty),
            None => false,
        }
    }

    fn upsert(&mut self, msg: Message) -> Applied {
        let existing = match self.index.get(&msg.id) {
            Some(created) => self.entries.remove(&(*created, msg.id.clone())),
            None => None,
        };
        let outcome = match &existing {
            Some(old) if *old == msg => Applied::Unchanged,
            Some(_) => Applied::Replaced,
            None => Applied::Inserted,
        };
        self.index.insert(msg.id.clone(), msg.created);
        self.entries.insert((msg.created, msg.id.clone()), msg);
        outcome
    }

    fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let created = self.index.remove(id)?;
        self.entries.remove(&(created, id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::msg;

    fn store_for(viewer: &str, counterparty: &str) -> MessageStore {
        let mut store = MessageStore::new(UserId::new(viewer), VisibilityPolicy::default());
        store.begin_loading(UserId::new(counterparty));
        store.load(Vec::new());
        store
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.messages().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn new_store_has_no_conversation() {
        let mut store = MessageStore::new(UserId::new("alice"), VisibilityPolicy::default());
        assert!(store.counterparty().is_none());
        assert_eq!(
            store.apply_remote_create(msg("m1", "bob", "alice", 1)),
            Applied::Unchanged
        );
        assert!(store.is_empty());
    }

    #[test]
    fn load_sorts_and_filters() {
        let mut store = MessageStore::new(UserId::new("alice"), VisibilityPolicy::default());
        store.begin_loading(UserId::new("bob"));

        let mut hidden = msg("m2", "alice", "bob", 20);
        hidden.deleted_by_sender = true;
        let count = store.load(vec![
            msg("m3", "bob", "alice", 30),
            hidden,
            msg("m1", "alice", "bob", 10),
            msg("x", "carol", "alice", 5),
        ]);

        assert_eq!(count, 2);
        assert_eq!(ids(&store), vec!["m1", "m3"]);
        assert!(!store.is_loading());
    }

    #[test]
    fn load_replaces_previous_state() {
        let mut store = store_for("alice", "bob");
        store.apply_remote_create(msg("old", "bob", "alice", 1));

        store.begin_loading(UserId::new("bob"));
        store.load(vec![msg("new", "bob", "alice", 2)]);

        assert_eq!(ids(&store), vec!["new"]);
    }

    #[test]
    fn duplicate_create_is_idempotent() {
        let mut store = store_for("alice", "bob");
        let m = msg("m1", "alice", "bob", 1);

        assert_eq!(store.apply_remote_create(m.clone()), Applied::Inserted);
        let mut echo = m.clone();
        echo.content = "different".into();
        assert_eq!(store.apply_remote_create(echo), Applied::Unchanged);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&m.id).unwrap().content, "content of m1");
    }

    #[test]
    fn out_of_order_arrival_is_sorted() {
        let mut store = store_for("alice", "bob");

        store.apply_remote_create(msg("t2", "alice", "bob", 200));
        store.apply_remote_create(msg("t3", "bob", "alice", 300));
        store.apply_remote_create(msg("t1", "alice", "bob", 100));

        assert_eq!(ids(&store), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let mut store = store_for("alice", "bob");

        store.apply_remote_create(msg("b", "alice", "bob", 100));
        store.apply_remote_create(msg("c", "bob", "alice", 100));
        store.apply_remote_create(msg("a", "alice", "bob", 100));

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn create_hidden_for_viewer_is_dropped() {
        let mut store = store_for("bob", "alice");
        let mut m = msg("m1", "alice", "bob", 1);
        m.deleted_by_receiver = true;

        assert_eq!(store.apply_remote_create(m), Applied::Unchanged);
        assert!(store.is_empty());
    }

    #[test]
    fn create_from_other_conversation_is_ignored() {
        let mut store = store_for("alice", "bob");
        assert_eq!(
            store.apply_remote_create(msg("m1", "carol", "alice", 1)),
            Applied::Unchanged
        );
        assert!(store.is_empty());
    }

    #[test]
    fn delete_removes_only_that_id() {
        let mut store = MessageStore::new(UserId::new("alice"), VisibilityPolicy::default());
        store.begin_loading(UserId::new("bob"));
        store.load(vec![
            msg("m1", "alice", "bob", 1),
            msg("m2", "bob", "alice", 2),
            msg("m3", "alice", "bob", 3),
        ]);

        assert_eq!(
            store.apply_remote_delete(&MessageId::new("m2")),
            Applied::Removed
        );
        assert_eq!(ids(&store), vec!["m1", "m3"]);
        assert_eq!(
            store.apply_remote_delete(&MessageId::new("m2")),
            Applied::Unchanged
        );
    }

    #[test]
    fn update_replaces_content() {
        let mut store = store_for("alice", "bob");
        let m = msg("m1", "bob", "alice", 1);
        store.apply_remote_create(m.clone());

        let mut edited = m.clone();
        edited.content = "edited".into();
        edited.is_edited = true;

        assert_eq!(store.apply_remote_update(edited.clone()), Applied::Replaced);
        assert_eq!(store.get(&m.id).unwrap().content, "edited");
        assert_eq!(store.apply_remote_update(edited), Applied::Unchanged);
    }

    #[test]
    fn update_that_hides_removes() {
        let mut store = store_for("alice", "bob");
        let m = msg("m1", "alice", "bob", 1);
        store.apply_remote_create(m.clone());

        let mut hidden = m.clone();
        hidden.deleted_by_sender = true;
        assert_eq!(store.apply_remote_update(hidden.clone()), Applied::Removed);
        assert!(store.is_empty());
        assert_eq!(store.apply_remote_update(hidden), Applied::Unchanged);
    }

    #[test]
    fn update_for_other_side_hide_keeps_message() {
        let mut store = store_for("alice", "bob");
        let m = msg("m1", "alice", "bob", 1);
        store.apply_remote_create(m.clone());

        let mut hidden_for_bob = m;
        hidden_for_bob.deleted_by_receiver = true;
        assert_eq!(store.apply_remote_update(hidden_for_bob), Applied::Replaced);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_for_unknown_message_inserts_in_order() {
        let mut store = store_for("alice", "bob");
        store.apply_remote_create(msg("m1", "alice", "bob", 10));
        store.apply_remote_create(msg("m3", "alice", "bob", 30));

        assert_eq!(
            store.apply_remote_update(msg("m2", "bob", "alice", 20)),
            Applied::Inserted
        );
        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn mark_read_echo_is_noop_in_view() {
        let mut store = store_for("bob", "alice");
        let m = msg("m1", "alice", "bob", 1);
        store.apply_remote_create(m.clone());

        let mut read = m;
        read.read = true;
        let before = store.rendered();
        store.apply_remote_update(read.clone());
        store.apply_remote_update(read);

        let after = store.rendered();
        assert_eq!(after.len(), 1);
        assert_eq!(before[0].content, after[0].content);
        assert!(after[0].read);
    }

    #[test]
    fn events_during_load_are_replayed() {
        let mut store = MessageStore::new(UserId::new("alice"), VisibilityPolicy::default());
        store.begin_loading(UserId::new("bob"));

        assert_eq!(
            store.apply_remote_create(msg("late", "bob", "alice", 50)),
            Applied::Staged
        );
        assert_eq!(
            store.apply_remote_delete(&MessageId::new("gone")),
            Applied::Staged
        );

        store.load(vec![
            msg("early", "alice", "bob", 10),
            msg("gone", "bob", "alice", 20),
        ]);

        assert_eq!(ids(&store), vec!["early", "late"]);
    }

    #[test]
    fn replayed_create_does_not_duplicate_snapshot() {
        let mut store = MessageStore::new(UserId::new("alice"), VisibilityPolicy::default());
        store.begin_loading(UserId::new("bob"));
        store.apply_remote_create(msg("m1", "bob", "alice", 10));
        store.load(vec![msg("m1", "bob", "alice", 10)]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn hide_and_restore() {
        let mut store = store_for("alice", "bob");
        store.apply_remote_create(msg("m1", "alice", "bob", 1));
        store.apply_remote_create(msg("m2", "alice", "bob", 2));

        let removed = store.hide_locally(&MessageId::new("m1")).unwrap();
        assert_eq!(ids(&store), vec!["m2"]);

        assert_eq!(store.restore(removed), Applied::Inserted);
        assert_eq!(ids(&store), vec!["m1", "m2"]);
    }

    #[test]
    fn late_echo_does_not_revive_hidden_message() {
        let mut store = store_for("alice", "bob");
        let m = msg("m1", "alice", "bob", 1);
        store.apply_remote_create(m.clone());
        store.hide_locally(&m.id).unwrap();

        assert_eq!(store.apply_remote_create(m.clone()), Applied::Unchanged);
        assert_eq!(store.apply_remote_update(m.clone()), Applied::Unchanged);
        assert!(store.is_empty());

        // A failed write still rolls back.
        assert_eq!(store.restore(m), Applied::Inserted);
    }

    #[test]
    fn restore_without_hide_is_ignored() {
        let mut store = store_for("alice", "bob");
        assert_eq!(
            store.restore(msg("m1", "alice", "bob", 1)),
            Applied::Unchanged
        );
        assert!(store.is_empty());
    }

    #[test]
    fn tombstone_is_terminal() {
        let mut store = store_for("alice", "bob");
        let m = msg("m1", "alice", "bob", 1);
        store.apply_remote_create(m.clone());

        let mut tombstoned = m.clone();
        tombstoned.is_deleted = true;
        tombstoned.content = "gone".into();
        assert_eq!(store.apply_remote_update(tombstoned), Applied::Replaced);

        let mut stale_edit = m;
        stale_edit.content = "edited".into();
        stale_edit.is_edited = true;
        assert_eq!(store.apply_remote_update(stale_edit), Applied::Unchanged);
        assert!(store.messages().next().unwrap().is_deleted);
    }

    #[test]
    fn restore_after_switch_is_ignored() {
        let mut store = store_for("alice", "bob");
        store.apply_remote_create(msg("m1", "alice", "bob", 1));
        let removed = store.hide_locally(&MessageId::new("m1")).unwrap();

        store.begin_loading(UserId::new("carol"));
        store.load(Vec::new());
        assert_eq!(store.restore(removed), Applied::Unchanged);
        assert!(store.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = store_for("alice", "bob");
        store.apply_remote_create(msg("m1", "alice", "bob", 1));

        store.reset();

        assert!(store.is_empty());
        assert!(store.counterparty().is_none());
        assert!(!store.contains(&MessageId::new("m1")));
    }

    #[test]
    fn unread_ids_only_counts_incoming() {
        let mut store = store_for("bob", "alice");
        store.apply_remote_create(msg("in1", "alice", "bob", 1));
        store.apply_remote_create(msg("out", "bob", "alice", 2));
        let mut read = msg("in2", "alice", "bob", 3);
        read.read = true;
        store.apply_remote_create(read);

        assert_eq!(store.unread_ids(), vec![MessageId::new("in1")]);
    }

    #[test]
    fn rendered_uses_placeholder() {
        let mut store = store_for("bob", "alice");
        let mut m = msg("m1", "alice", "bob", 1);
        m.is_deleted = true;
        store.apply_remote_create(m);

        let view = store.rendered();
        assert_eq!(view[0].content, crate::DEFAULT_TOMBSTONE_TEXT);
    }
}
