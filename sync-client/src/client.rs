//! ChatClient - the main interface for convo-sync.
//!
//! This module provides [`ChatClient`], which wires an identity, a record
//! store and a push channel to one session, and exposes the conversation
//! commands and read-only views applications render from.
//!
//! # Architecture
//!
//! ```text
//! Application → ChatClient → ConversationController → RecordStore
//!                   ↓                    ↑
//!       SubscriptionMultiplexer ← PushChannel
//!                   ↓
//!          sync-core (pure state)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sync_client::{ChatClient, ChatConfig, MemoryBackend, StaticIdentity};
//!
//! let backend = MemoryBackend::new();
//! let client = ChatClient::new(ChatConfig::default(), backend, &StaticIdentity::new("alice"))?;
//!
//! client.connect().await?;
//! client.open(&"bob".into()).await?;
//! client.send("hi").await?;
//! let view = client.conversation().await;
//! ```

use std::sync::Arc;
use sync_core::Rendered;
use sync_types::{Message, MessageId, UserId, UserProfile};
use tokio::sync::watch;
use tracing::info;

use crate::backend::{Identity, PushChannel, RecordStore};
use crate::config::ChatConfig;
use crate::controller::{BatchReport, ConversationController};
use crate::error::ClientError;
use crate::mux::SubscriptionMultiplexer;
use crate::session::Session;

/// The main chat client.
///
/// Owns one authenticated session over a backend that is both a record
/// store and a push channel.
pub struct ChatClient<B: RecordStore + PushChannel + 'static> {
    config: ChatConfig,
    me: UserId,
    backend: Arc<B>,
    session: Session,
    controller: ConversationController<B>,
    mux: SubscriptionMultiplexer<B>,
}

impl<B: RecordStore + PushChannel + 'static> ChatClient<B> {
    /// Create a client for the user `identity` reports.
    ///
    /// Fails with [`ClientError::NotAuthenticated`] when nobody is signed in,
    /// and with [`ClientError::Config`] when `config` does not validate.
    pub fn new(config: ChatConfig, backend: B, identity: &dyn Identity) -> Result<Self, ClientError> {
        config.validate()?;
        let me = identity
            .current_user()
            .filter(|user| !user.is_empty())
            .ok_or(ClientError::NotAuthenticated)?;

        let backend = Arc::new(backend);
        let session = Session::new(me.clone(), config.policy());
        let controller = ConversationController::new(Arc::clone(&backend), session.clone());
        let mux = SubscriptionMultiplexer::new(
            Arc::clone(&backend),
            controller.clone(),
            session.clone(),
            config.event_buffer,
        );

        Ok(Self {
            config,
            me,
            backend,
            session,
            controller,
            mux,
        })
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    /// Start the push subscriptions, then load the roster and unread counts.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.mux.start().await?;
        self.controller.refresh_roster().await?;
        self.controller.refresh_unread().await?;
        info!(user = %self.me, "connected");
        Ok(())
    }

    /// Resubscribe and reload after a dropped channel.
    pub async fn resync(&self) -> Result<(), ClientError> {
        self.mux.resync().await
    }

    /// Tear the session down. Idempotent; the client is unusable afterwards.
    pub async fn sign_out(&self) {
        self.session.lock().await.tear_down();
        self.mux.shutdown().await;
        self.session.notify();
        info!(user = %self.me, "signed out");
    }

    /// True while push events are being dispatched.
    pub async fn is_connected(&self) -> bool {
        self.mux.is_running().await
    }

    // ===========================================
    // Commands
    // ===========================================

    /// Open the conversation with `counterparty`. See
    /// [`ConversationController::open`].
    pub async fn open(&self, counterparty: &UserId) -> Result<usize, ClientError> {
        self.controller.open(counterparty).await
    }

    /// Close the open conversation.
    pub async fn close(&self) {
        self.controller.close().await
    }

    /// Send a message to the open conversation.
    pub async fn send(&self, text: &str) -> Result<Message, ClientError> {
        self.controller.send(text).await
    }

    /// Edit one of the viewer's messages.
    pub async fn edit(&self, id: &MessageId, text: &str) -> Result<Message, ClientError> {
        self.controller.edit(id, text).await
    }

    /// Delete one of the viewer's messages for both participants.
    pub async fn delete_for_all(&self, id: &MessageId) -> Result<Message, ClientError> {
        self.controller.delete_for_all(id).await
    }

    /// Hide a message from the viewer's own log.
    pub async fn delete_for_me(&self, id: &MessageId) -> Result<(), ClientError> {
        self.controller.delete_for_me(id).await
    }

    /// Hide the whole open conversation from the viewer's own log.
    pub async fn delete_conversation(&self) -> Result<BatchReport, ClientError> {
        self.controller.delete_conversation().await
    }

    /// The controller, for callers that need the full command surface.
    pub fn controller(&self) -> &ConversationController<B> {
        &self.controller
    }

    // ===========================================
    // Views
    // ===========================================

    /// The signed-in user.
    pub fn current_user(&self) -> &UserId {
        &self.me
    }

    /// The configuration in use.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// The backend, for tests and inspection.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Counterparty of the open conversation.
    pub async fn counterparty(&self) -> Option<UserId> {
        self.session.lock().await.counterparty().cloned()
    }

    /// Profile of the open conversation's counterparty, if it could be fetched.
    pub async fn counterparty_profile(&self) -> Option<UserProfile> {
        self.session.lock().await.counterparty_profile.clone()
    }

    /// The open conversation as the viewer sees it, in order.
    pub async fn conversation(&self) -> Vec<Rendered> {
        self.session.lock().await.store.rendered()
    }

    /// Non-zero unread counts per sender.
    pub async fn unread_counts(&self) -> Vec<(UserId, u32)> {
        self.session.lock().await.unread.snapshot()
    }

    /// Unread count for one sender.
    pub async fn unread_for(&self, sender: &UserId) -> u32 {
        self.session.lock().await.unread.count_for(sender)
    }

    /// Unread count across all senders.
    pub async fn total_unread(&self) -> u32 {
        self.session.lock().await.unread.total()
    }

    /// Other users, sorted by name.
    pub async fn roster(&self) -> Vec<UserProfile> {
        self.session.lock().await.roster.users().to_vec()
    }

    /// Revision counter bumped after every visible state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.session.changes()
    }
}
