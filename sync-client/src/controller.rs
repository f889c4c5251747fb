//! ConversationController - every write the engine issues.
//!
//! The controller fetches a conversation when it is opened, marks what the
//! viewer sees as read, and turns user commands (send, edit, delete) into
//! record store writes. Authorization and validation happen before any
//! write is dispatched.
//!
//! Results of writes are applied to the local store straight away; the
//! push echo that follows is deduplicated by id.

use futures_util::future::join_all;
use std::sync::Arc;
use sync_types::{
    Collection, Filter, Message, MessageId, MessagePatch, NewMessage, Record, Sort, UserId,
    UserProfile,
};
use tracing::{debug, info, warn};

use crate::backend::{RecordStore, StoreError};
use crate::error::ClientError;
use crate::session::Session;

/// Outcome of hiding a whole conversation.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Messages now hidden for the viewer.
    pub hidden: Vec<MessageId>,
    /// Messages whose write failed; they stay visible.
    pub failed: Vec<(MessageId, StoreError)>,
}

impl BatchReport {
    /// True when every write succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Issues fetches and writes for one session.
pub struct ConversationController<S: RecordStore> {
    store: Arc<S>,
    session: Session,
}

impl<S: RecordStore> Clone for ConversationController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            session: self.session.clone(),
        }
    }
}

impl<S: RecordStore> ConversationController<S> {
    pub(crate) fn new(store: Arc<S>, session: Session) -> Self {
        Self { store, session }
    }

    // ===========================================
    // Conversation lifecycle
    // ===========================================

    /// Open the conversation with `counterparty`.
    ///
    /// Returns the number of visible messages loaded. Push events arriving
    /// while the fetch is in flight are applied on top of the snapshot.
    pub async fn open(&self, counterparty: &UserId) -> Result<usize, ClientError> {
        let (me, generation) = {
            let mut state = self.session.lock().await;
            if state.torn_down {
                return Err(ClientError::TornDown);
            }
            let generation = state.bump_generation();
            state.store.begin_loading(counterparty.clone());
            state.counterparty_profile = None;
            (state.me.clone(), generation)
        };
        self.session.notify();
        info!(%counterparty, generation, "opening conversation");

        let profile = self.fetch_profile(counterparty).await;

        let filter = Filter::conversation(&me, counterparty);
        let fetched = self
            .store
            .list(Collection::Messages, Some(&filter), Some(&Sort::chronological()))
            .await;

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                warn!(%counterparty, error = %e, "failed to fetch conversation");
                let mut state = self.session.lock().await;
                if state.is_current(generation) {
                    // Close the load window so live events keep flowing.
                    state.counterparty_profile = profile;
                    state.store.load(Vec::new());
                    drop(state);
                    self.session.notify();
                }
                return Err(e.into());
            }
        };

        let (loaded, unread) = {
            let mut state = self.session.lock().await;
            if !state.is_current(generation) {
                debug!(%counterparty, generation, "discarding superseded conversation fetch");
                return Err(ClientError::Superseded);
            }
            state.counterparty_profile = profile;
            let loaded = state.store.load(parse_messages(records));
            (loaded, state.store.unread_ids())
        };
        self.session.notify();
        info!(%counterparty, loaded, unread = unread.len(), "conversation loaded");

        if !unread.is_empty() {
            self.mark_read(&unread).await;
        }
        if let Err(e) = self.refresh_unread().await {
            warn!(error = %e, "unread recompute after open failed");
        }
        Ok(loaded)
    }

    /// Close the open conversation, if any.
    pub async fn close(&self) {
        let generation = self.session.lock().await.close_conversation();
        self.session.notify();
        debug!(generation, "conversation closed");
    }

    async fn fetch_profile(&self, id: &UserId) -> Option<UserProfile> {
        match self.store.get_one(Collection::Users, id.as_str()).await {
            Ok(record) => match UserProfile::from_record(&record) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(user = %id, error = %e, "invalid counterparty profile");
                    None
                }
            },
            Err(e) => {
                warn!(user = %id, error = %e, "failed to fetch counterparty profile");
                None
            }
        }
    }

    // ===========================================
    // Commands
    // ===========================================

    /// Send `text` to the open conversation.
    ///
    /// On failure the typed text comes back in [`ClientError::SendFailed`].
    pub async fn send(&self, text: &str) -> Result<Message, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let (me, counterparty, generation) = {
            let state = self.session.lock().await;
            if state.torn_down {
                return Err(ClientError::TornDown);
            }
            let counterparty = state
                .counterparty()
                .cloned()
                .ok_or(ClientError::NoOpenConversation)?;
            (state.me.clone(), counterparty, state.generation)
        };

        let fields = NewMessage::new(me, counterparty.clone(), text).to_fields()?;
        let record = self
            .store
            .create(Collection::Messages, fields)
            .await
            .map_err(|source| ClientError::SendFailed {
                draft: text.to_string(),
                source,
            })?;
        let msg = Message::from_record(&record)?;
        info!(id = %msg.id, to = %counterparty, "message sent");

        let mut state = self.session.lock().await;
        if state.is_current(generation) && state.store.apply_remote_create(msg.clone()).changed() {
            drop(state);
            self.session.notify();
        }
        Ok(msg)
    }

    /// Replace the content of a message the viewer sent.
    pub async fn edit(&self, id: &MessageId, text: &str) -> Result<Message, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let (me, generation) = self.session_context().await?;
        let msg = self.resolve(id).await?;
        if msg.sender != me {
            return Err(ClientError::NotAuthorized {
                id: id.clone(),
                reason: "only the sender can edit",
            });
        }
        if msg.is_deleted {
            return Err(ClientError::Tombstoned(id.clone()));
        }

        let updated = self.write(id, &MessagePatch::edit(text)).await?;
        debug!(%id, "message edited");
        self.apply_written(generation, updated).await
    }

    /// Tombstone a message the viewer sent, for both participants.
    ///
    /// Repeating this on a tombstone succeeds without a write.
    pub async fn delete_for_all(&self, id: &MessageId) -> Result<Message, ClientError> {
        let (me, generation) = self.session_context().await?;
        let msg = self.resolve(id).await?;
        if msg.sender != me {
            return Err(ClientError::NotAuthorized {
                id: id.clone(),
                reason: "only the sender can delete for everyone",
            });
        }
        if msg.is_deleted {
            return Ok(msg);
        }

        let placeholder = self.session.lock().await.store.policy().placeholder().to_string();
        let updated = self
            .write(id, &MessagePatch::tombstone(placeholder))
            .await?;
        info!(%id, "message deleted for everyone");
        self.apply_written(generation, updated).await
    }

    /// Hide a message from the viewer's own log. The other side keeps it.
    ///
    /// The message disappears locally at once and comes back if the write
    /// fails.
    pub async fn delete_for_me(&self, id: &MessageId) -> Result<(), ClientError> {
        let (me, generation) = self.session_context().await?;
        let msg = self.resolve(id).await?;
        let side = msg.side_of(&me).ok_or_else(|| ClientError::NotAuthorized {
            id: id.clone(),
            reason: "not a participant",
        })?;
        if msg.is_hidden_for(&me) {
            return Ok(());
        }

        let removed = self.hide_locally(generation, id).await;
        match self.write(id, &MessagePatch::hide_for(side)).await {
            Ok(record) => {
                debug!(%id, "message hidden");
                self.apply_written(generation, record).await?;
                Ok(())
            }
            Err(e) => {
                warn!(%id, error = %e, "hide failed, restoring message");
                self.restore(generation, removed).await;
                Err(e.into())
            }
        }
    }

    /// Hide every loaded message of the open conversation for the viewer.
    ///
    /// Writes run concurrently and independently: a failure restores only
    /// that message, and successes are never rolled back.
    pub async fn delete_conversation(&self) -> Result<BatchReport, ClientError> {
        let (me, generation, targets) = {
            let mut state = self.session.lock().await;
            if state.torn_down {
                return Err(ClientError::TornDown);
            }
            if state.counterparty().is_none() {
                return Err(ClientError::NoOpenConversation);
            }
            let me = state.me.clone();
            let ids: Vec<MessageId> = state.store.messages().map(|m| m.id.clone()).collect();
            let mut targets = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(msg) = state.store.hide_locally(&id) {
                    targets.push(msg);
                }
            }
            (me, state.generation, targets)
        };
        self.session.notify();
        info!(count = targets.len(), "hiding conversation");

        let writes = targets.iter().map(|msg| {
            let patch = msg.side_of(&me).map(MessagePatch::hide_for);
            async move {
                match patch {
                    Some(patch) => self.write(&msg.id, &patch).await,
                    None => Err(StoreError::Rejected("not a participant".into())),
                }
            }
        });
        let results = join_all(writes).await;

        let mut report = BatchReport::default();
        let mut restore = Vec::new();
        for (msg, result) in targets.into_iter().zip(results) {
            match result {
                Ok(_) => report.hidden.push(msg.id),
                Err(e) => {
                    warn!(id = %msg.id, error = %e, "hide failed");
                    report.failed.push((msg.id.clone(), e));
                    restore.push(msg);
                }
            }
        }

        if !restore.is_empty() {
            let mut state = self.session.lock().await;
            if state.is_current(generation) {
                for msg in restore {
                    state.store.restore(msg);
                }
                drop(state);
                self.session.notify();
            }
        }
        info!(
            hidden = report.hidden.len(),
            failed = report.failed.len(),
            "conversation hide finished"
        );
        Ok(report)
    }

    // ===========================================
    // Shared with the multiplexer
    // ===========================================

    /// Mark messages read, one write per id. Failures are logged and not
    /// retried. Returns how many writes succeeded.
    pub async fn mark_read(&self, ids: &[MessageId]) -> usize {
        let generation = self.session.lock().await.generation;
        let patch = MessagePatch::mark_read();
        let results = join_all(ids.iter().map(|id| self.write(id, &patch))).await;

        let mut marked = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(record) => {
                    marked += 1;
                    if let Err(e) = self.apply_written(generation, record).await {
                        warn!(%id, error = %e, "invalid record after mark-read");
                    }
                }
                Err(e) => warn!(%id, error = %e, "mark-read failed"),
            }
        }
        debug!(marked, requested = ids.len(), "marked messages read");
        marked
    }

    /// Rebuild the unread counts from the authoritative query.
    ///
    /// On failure the previous counts stay in place.
    pub async fn refresh_unread(&self) -> Result<(), ClientError> {
        let (me, ticket) = {
            let mut state = self.session.lock().await;
            if state.torn_down {
                return Err(ClientError::TornDown);
            }
            (state.me.clone(), state.unread.begin_recompute())
        };

        let records = self
            .store
            .list(Collection::Messages, Some(&Filter::unread_for(&me)), None)
            .await
            .map_err(|e| {
                warn!(error = %e, "unread recompute failed");
                e
            })?;
        let unread = parse_messages(records);

        let mut state = self.session.lock().await;
        if state.torn_down {
            return Err(ClientError::TornDown);
        }
        if state.unread.finish_recompute(ticket, &unread) {
            debug!(total = state.unread.total(), "unread counts recomputed");
            drop(state);
            self.session.notify();
        } else {
            debug!("discarding stale unread recompute");
        }
        Ok(())
    }

    /// Reload the roster: every user except the viewer, by name.
    pub async fn refresh_roster(&self) -> Result<usize, ClientError> {
        let me = {
            let state = self.session.lock().await;
            if state.torn_down {
                return Err(ClientError::TornDown);
            }
            state.me.clone()
        };

        let records = self
            .store
            .list(
                Collection::Users,
                Some(&Filter::everyone_except(&me)),
                Some(&Sort::by("name").then("id")),
            )
            .await?;
        let users = records.iter().filter_map(|record| {
            UserProfile::from_record(record)
                .map_err(|e| warn!(error = %e, "skipping invalid user record"))
                .ok()
        });

        let mut state = self.session.lock().await;
        if state.torn_down {
            return Err(ClientError::TornDown);
        }
        state.roster.load(users);
        let count = state.roster.len();
        drop(state);
        self.session.notify();
        debug!(count, "roster loaded");
        Ok(count)
    }

    // ===========================================
    // Helpers
    // ===========================================

    async fn session_context(&self) -> Result<(UserId, u64), ClientError> {
        let state = self.session.lock().await;
        if state.torn_down {
            return Err(ClientError::TornDown);
        }
        Ok((state.me.clone(), state.generation))
    }

    /// The local copy when loaded, else the store's.
    async fn resolve(&self, id: &MessageId) -> Result<Message, ClientError> {
        if let Some(msg) = self.session.lock().await.store.get(id).cloned() {
            return Ok(msg);
        }
        let record = self.store.get_one(Collection::Messages, id.as_str()).await?;
        Ok(Message::from_record(&record)?)
    }

    async fn write(&self, id: &MessageId, patch: &MessagePatch) -> Result<Record, StoreError> {
        let fields = patch
            .to_fields()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        self.store
            .update(Collection::Messages, id.as_str(), fields)
            .await
    }

    async fn apply_written(&self, generation: u64, record: Record) -> Result<Message, ClientError> {
        let msg = Message::from_record(&record)?;
        let mut state = self.session.lock().await;
        if state.is_current(generation) && state.store.apply_remote_update(msg.clone()).changed() {
            drop(state);
            self.session.notify();
        }
        Ok(msg)
    }

    async fn hide_locally(&self, generation: u64, id: &MessageId) -> Option<Message> {
        let mut state = self.session.lock().await;
        if !state.is_current(generation) {
            return None;
        }
        let removed = state.store.hide_locally(id);
        drop(state);
        if removed.is_some() {
            self.session.notify();
        }
        removed
    }

    async fn restore(&self, generation: u64, msg: Option<Message>) {
        let Some(msg) = msg else { return };
        let mut state = self.session.lock().await;
        if state.is_current(generation) && state.store.restore(msg).changed() {
            drop(state);
            self.session.notify();
        }
    }
}

/// Typed messages from records, skipping (and logging) invalid ones.
pub(crate) fn parse_messages(records: Vec<Record>) -> Vec<Message> {
    records
        .iter()
        .filter_map(|record| match Message::from_record(record) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(id = record.id().unwrap_or("?"), error = %e, "skipping invalid message record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use sync_core::VisibilityPolicy;
    use sync_types::Fields;
    use tokio::sync::oneshot;

    /// Memory store whose next `list` call can be held until released.
    struct GatedStore {
        inner: MemoryBackend,
        gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                gate: Mutex::new(None),
            }
        }

        /// Hold the next `list`. Returns a receiver that fires once the call
        /// is waiting, and the sender that lets it proceed.
        fn hold_next_list(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
            let (entered_tx, entered_rx) = oneshot::channel();
            let (release_tx, release_rx) = oneshot::channel();
            *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
            (entered_rx, release_tx)
        }
    }

    #[async_trait]
    impl RecordStore for GatedStore {
        async fn create(
            &self,
            collection: Collection,
            fields: Fields,
        ) -> Result<Record, StoreError> {
            self.inner.create(collection, fields).await
        }

        async fn update(
            &self,
            collection: Collection,
            id: &str,
            fields: Fields,
        ) -> Result<Record, StoreError> {
            self.inner.update(collection, id, fields).await
        }

        async fn get_one(&self, collection: Collection, id: &str) -> Result<Record, StoreError> {
            self.inner.get_one(collection, id).await
        }

        async fn list(
            &self,
            collection: Collection,
            filter: Option<&Filter>,
            sort: Option<&Sort>,
        ) -> Result<Vec<Record>, StoreError> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.await;
            }
            self.inner.list(collection, filter, sort).await
        }
    }

    fn seed_message(store: &GatedStore, sender: &str, receiver: &str, text: &str) {
        let fields = NewMessage::new(UserId::new(sender), UserId::new(receiver), text)
            .to_fields()
            .unwrap();
        store.inner.seed(Collection::Messages, fields);
    }

    fn controller_for(store: &Arc<GatedStore>, me: &str) -> ConversationController<GatedStore> {
        let session = Session::new(UserId::new(me), VisibilityPolicy::default());
        ConversationController::new(Arc::clone(store), session)
    }

    // ===========================================
    // Conversation switching
    // ===========================================

    #[tokio::test]
    async fn slow_fetch_is_superseded_by_newer_open() {
        let store = Arc::new(GatedStore::new());
        seed_message(&store, "bob", "alice", "from bob");
        seed_message(&store, "carol", "alice", "from carol");
        let controller = controller_for(&store, "alice");

        let (entered, release) = store.hold_next_list();
        let slow = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.open(&UserId::new("bob")).await })
        };
        entered.await.unwrap();

        assert_eq!(controller.open(&UserId::new("carol")).await.unwrap(), 1);
        release.send(()).unwrap();

        let result = slow.await.unwrap();
        assert!(matches!(result, Err(ClientError::Superseded)));

        let state = controller.session.lock().await;
        assert_eq!(state.counterparty(), Some(&UserId::new("carol")));
        assert!(!state.store.is_loading());
        let contents: Vec<&str> = state.store.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["from carol"]);
    }

    #[tokio::test]
    async fn superseded_open_leaves_old_messages_unread() {
        let store = Arc::new(GatedStore::new());
        let from_bob = {
            let fields = NewMessage::new(UserId::new("bob"), UserId::new("alice"), "hi")
                .to_fields()
                .unwrap();
            store.inner.seed(Collection::Messages, fields)
        };
        let controller = controller_for(&store, "alice");

        let (entered, release) = store.hold_next_list();
        let slow = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.open(&UserId::new("bob")).await })
        };
        entered.await.unwrap();
        controller.close().await;
        release.send(()).unwrap();

        assert!(matches!(slow.await.unwrap(), Err(ClientError::Superseded)));
        let id = from_bob.id().unwrap();
        let record = store.inner.record(Collection::Messages, id).unwrap();
        assert!(!record.get_bool("read"));
        assert!(controller.session.lock().await.counterparty().is_none());
    }
}
