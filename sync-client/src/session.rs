//! Per-user session state.
//!
//! All mutable state of a signed-in user lives in one [`SessionState`]
//! behind an async mutex. The lock is taken for short synchronous updates
//! and never held across a store or channel call.
//!
//! The generation counter is bumped on every conversation open, close and
//! teardown. Work that awaits I/O records the generation first and drops
//! its result if the generation moved on in the meantime.

use std::sync::Arc;
use sync_core::{MessageStore, Roster, UnreadIndex, VisibilityPolicy};
use sync_types::{UserId, UserProfile};
use tokio::sync::{watch, Mutex, MutexGuard};

/// Mutable state of one session.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) me: UserId,
    pub(crate) generation: u64,
    pub(crate) torn_down: bool,
    pub(crate) counterparty_profile: Option<UserProfile>,
    pub(crate) store: MessageStore,
    pub(crate) unread: UnreadIndex,
    pub(crate) roster: Roster,
}

impl SessionState {
    fn new(me: UserId, policy: VisibilityPolicy) -> Self {
        Self {
            store: MessageStore::new(me.clone(), policy),
            unread: UnreadIndex::new(me.clone()),
            roster: Roster::new(me.clone()),
            me,
            generation: 0,
            torn_down: false,
            counterparty_profile: None,
        }
    }

    /// Invalidate in-flight work and return the new generation.
    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// True when work started at `generation` may still touch state.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        !self.torn_down && self.generation == generation
    }

    /// Counterparty of the open conversation.
    pub(crate) fn counterparty(&self) -> Option<&UserId> {
        self.store.counterparty()
    }

    /// Close the conversation.
    pub(crate) fn close_conversation(&mut self) -> u64 {
        self.store.reset();
        self.counterparty_profile = None;
        self.bump_generation()
    }

    /// Drop everything. Late events and in-flight results are discarded
    /// from here on.
    pub(crate) fn tear_down(&mut self) {
        self.close_conversation();
        self.unread.clear();
        self.roster.clear();
        self.torn_down = true;
    }
}

/// Shared handle to the session state plus its change notifier.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    state: Arc<Mutex<SessionState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Session {
    pub(crate) fn new(me: UserId, policy: VisibilityPolicy) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(SessionState::new(me, policy))),
            revision: Arc::new(revision),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Tell observers that visible state changed.
    pub(crate) fn notify(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    pub(crate) fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
