//! Unread counts per counterparty.
//!
//! The index is a cache over message state: for the current user `me`,
//! `count(c)` is the number of messages with `receiver == me`,
//! `sender == c` and `read == false`. It is rebuilt from an authoritative
//! query with [`UnreadIndex::recompute`] and nudged upward by live creates.
//!
//! A recompute whose query was issued before a nudged message existed
//! cannot see it. Nudges are kept until a recompute issued after them
//! lands, and are replayed on top of any older result.
//!
//! Reads never decrement locally. Several devices may mark the same message
//! read concurrently, and a blind decrement per echo would undercount; a
//! read is instead a signal to recompute.

use std::collections::{HashMap, HashSet};
use sync_types::{Message, MessageId, UserId};

/// Ticket identifying one recompute round trip.
///
/// Tickets are issued in increasing order. A result is only applied if no
/// result from a later ticket has been applied already.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecomputeTicket(u64);

/// Unread message counts keyed by sender.
#[derive(Debug, Clone)]
pub struct UnreadIndex {
    me: UserId,
    counts: HashMap<UserId, u32>,
    next_ticket: u64,
    applied: Option<u64>,
    // Nudged messages with the first ticket issued after the nudge.
    nudges: Vec<(u64, Message)>,
}

impl UnreadIndex {
    /// Empty index for `me`.
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            counts: HashMap::new(),
            next_ticket: 0,
            applied: None,
            nudges: Vec::new(),
        }
    }

    /// The user whose inbox this index describes.
    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Reserve a ticket before issuing the authoritative query.
    pub fn begin_recompute(&mut self) -> RecomputeTicket {
        let ticket = RecomputeTicket(self.next_ticket);
        self.next_ticket = self.next_ticket.saturating_add(1);
        ticket
    }

    /// Apply the result of the query started with `ticket`.
    ///
    /// Returns false (and leaves the mapping alone) when a newer result has
    /// already been applied.
    pub fn finish_recompute<'a, I>(&mut self, ticket: RecomputeTicket, unread: I) -> bool
    where
        I: IntoIterator<Item = &'a Message>,
    {
        if matches!(self.applied, Some(applied) if applied > ticket.0) {
            return false;
        }
        self.applied = Some(ticket.0);
        let seen = self.rebuild(unread);

        // Nudges from before the ticket are covered by its query.
        self.nudges.retain(|(horizon, _)| *horizon > ticket.0);
        for (_, msg) in &self.nudges {
            if !seen.contains(&msg.id) {
                let count = self.counts.entry(msg.sender.clone()).or_insert(0);
                *count = count.saturating_add(1);
            }
        }
        true
    }

    /// Rebuild the whole mapping from the set of unread messages.
    ///
    /// Messages not addressed to `me`, self-sent, or already read are ignored,
    /// so a slightly broader result set is harmless.
    pub fn recompute<'a, I>(&mut self, unread: I)
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let ticket = self.begin_recompute();
        self.finish_recompute(ticket, unread);
    }

    fn rebuild<'a, I>(&mut self, unread: I) -> HashSet<MessageId>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        self.counts.clear();
        let mut seen = HashSet::new();
        for msg in unread {
            if msg.is_unread_for(&self.me) && seen.insert(msg.id.clone()) {
                *self.counts.entry(msg.sender.clone()).or_insert(0) += 1;
            }
        }
        seen
    }

    /// Optimistic nudge for a newly created message.
    ///
    /// Returns true if a count was incremented. The next recompute is what
    /// makes the count correct; recomputes already in flight keep the nudge.
    pub fn on_message_created(&mut self, msg: &Message) -> bool {
        if !msg.is_unread_for(&self.me) || self.nudges.iter().any(|(_, m)| m.id == msg.id) {
            return false;
        }
        self.nudges.push((self.next_ticket, msg.clone()));
        let count = self.counts.entry(msg.sender.clone()).or_insert(0);
        *count = count.saturating_add(1);
        true
    }

    /// Whether a read of `msg` calls for a recompute.
    ///
    /// True when `msg` is addressed to `me`, is now read, and the index
    /// still counts unread messages from its sender. Never decrements.
    pub fn on_message_marked_read(&self, msg: &Message) -> bool {
        msg.receiver == self.me
            && msg.sender != self.me
            && msg.read
            && self.count_for(&msg.sender) > 0
    }

    /// Unread count for one sender.
    pub fn count_for(&self, sender: &UserId) -> u32 {
        self.counts.get(sender).copied().unwrap_or(0)
    }

    /// Unread count across all senders.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Non-zero counts sorted by sender id.
    pub fn snapshot(&self) -> Vec<(UserId, u32)> {
        let mut counts: Vec<(UserId, u32)> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(sender, count)| (sender.clone(), *count))
            .collect();
        counts.sort();
        counts
    }

    /// Forget all counts.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.nudges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::msg;

    fn bob_index() -> UnreadIndex {
        UnreadIndex::new(UserId::new("bob"))
    }

    #[test]
    fn recompute_groups_by_sender() {
        let mut index = bob_index();
        let messages = vec![
            msg("1", "alice", "bob", 1),
            msg("2", "alice", "bob", 2),
            msg("3", "carol", "bob", 3),
        ];

        index.recompute(&messages);

        assert_eq!(index.count_for(&UserId::new("alice")), 2);
        assert_eq!(index.count_for(&UserId::new("carol")), 1);
        assert_eq!(index.total(), 3);
    }

    #[test]
    fn recompute_ignores_irrelevant_messages() {
        let mut index = bob_index();
        let mut read = msg("1", "alice", "bob", 1);
        read.read = true;
        let messages = vec![
            read,
            msg("2", "bob", "alice", 2),
            msg("3", "alice", "carol", 3),
            msg("4", "bob", "bob", 4),
        ];

        index.recompute(&messages);

        assert_eq!(index.total(), 0);
        assert!(index.snapshot().is_empty());
    }

    #[test]
    fn recompute_replaces_previous_counts() {
        let mut index = bob_index();
        index.recompute(&vec![msg("1", "alice", "bob", 1)]);
        index.recompute(&Vec::<Message>::new());
        assert_eq!(index.count_for(&UserId::new("alice")), 0);
    }

    #[test]
    fn create_nudges_only_incoming_unread() {
        let mut index = bob_index();

        assert!(index.on_message_created(&msg("1", "alice", "bob", 1)));
        assert!(!index.on_message_created(&msg("2", "bob", "alice", 2)));
        let mut read = msg("3", "alice", "bob", 3);
        read.read = true;
        assert!(!index.on_message_created(&read));

        assert_eq!(index.count_for(&UserId::new("alice")), 1);
    }

    #[test]
    fn read_asks_for_recompute_instead_of_decrementing() {
        let mut index = bob_index();
        let m = msg("1", "alice", "bob", 1);
        index.on_message_created(&m);

        let mut read = m;
        read.read = true;
        assert!(index.on_message_marked_read(&read));
        // Asking twice must not change anything by itself.
        assert!(index.on_message_marked_read(&read));
        assert_eq!(index.count_for(&UserId::new("alice")), 1);

        index.recompute(&Vec::<Message>::new());
        assert!(!index.on_message_marked_read(&read));
    }

    #[test]
    fn unread_update_does_not_trigger_recompute() {
        let mut index = bob_index();
        let m = msg("1", "alice", "bob", 1);
        index.on_message_created(&m);
        assert!(!index.on_message_marked_read(&m));
    }

    #[test]
    fn stale_recompute_result_is_discarded() {
        let mut index = bob_index();
        let older = index.begin_recompute();
        let newer = index.begin_recompute();

        assert!(index.finish_recompute(newer, &vec![msg("1", "alice", "bob", 1)]));
        assert!(!index.finish_recompute(older, &Vec::<Message>::new()));

        assert_eq!(index.count_for(&UserId::new("alice")), 1);
    }

    #[test]
    fn in_order_results_both_apply() {
        let mut index = bob_index();
        let first = index.begin_recompute();
        let second = index.begin_recompute();

        assert!(index.finish_recompute(first, &vec![msg("1", "alice", "bob", 1)]));
        assert!(index.finish_recompute(second, &Vec::<Message>::new()));
        assert_eq!(index.total(), 0);
    }

    #[test]
    fn nudge_survives_recompute_issued_before_it() {
        let mut index = bob_index();
        let in_flight = index.begin_recompute();

        let m = msg("1", "alice", "bob", 1);
        assert!(index.on_message_created(&m));
        assert_eq!(index.count_for(&UserId::new("alice")), 1);

        // The query ran before the message existed.
        assert!(index.finish_recompute(in_flight, &Vec::<Message>::new()));
        assert_eq!(index.count_for(&UserId::new("alice")), 1);
    }

    #[test]
    fn nudge_is_not_counted_twice_when_query_sees_it() {
        let mut index = bob_index();
        let in_flight = index.begin_recompute();

        let m = msg("1", "alice", "bob", 1);
        index.on_message_created(&m);
        assert!(index.finish_recompute(in_flight, &vec![m]));

        assert_eq!(index.count_for(&UserId::new("alice")), 1);
    }

    #[test]
    fn later_recompute_retires_nudge() {
        let mut index = bob_index();
        let m = msg("1", "alice", "bob", 1);
        index.on_message_created(&m);

        // Read elsewhere; a recompute issued after the nudge is authoritative.
        index.recompute(&Vec::<Message>::new());
        assert_eq!(index.count_for(&UserId::new("alice")), 0);

        let next = index.begin_recompute();
        assert!(index.finish_recompute(next, &Vec::<Message>::new()));
        assert_eq!(index.total(), 0);
    }

    #[test]
    fn duplicate_create_nudges_once() {
        let mut index = bob_index();
        let m = msg("1", "alice", "bob", 1);
        assert!(index.on_message_created(&m));
        assert!(!index.on_message_created(&m));
        assert_eq!(index.count_for(&UserId::new("alice")), 1);
    }

    #[test]
    fn snapshot_is_sorted() {
        let mut index = bob_index();
        index.on_message_created(&msg("1", "zed", "bob", 1));
        index.on_message_created(&msg("2", "amy", "bob", 2));

        assert_eq!(
            index.snapshot(),
            vec![(UserId::new("amy"), 1), (UserId::new("zed"), 1)]
        );
    }
}
