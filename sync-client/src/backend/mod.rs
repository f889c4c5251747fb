//! Collaborator interfaces for convo-sync.
//!
//! The engine never talks to a concrete database. It consumes three
//! interfaces:
//! - [`RecordStore`] - create/read/update/list over loosely typed records
//! - [`PushChannel`] - live create/update/delete notifications per collection
//! - [`Identity`] - who the current user is
//!
//! [`MemoryBackend`] implements the first two in memory with failure
//! injection, for tests and demos.
//!
//! # Example
//!
//! ```ignore
//! let backend = MemoryBackend::new();
//! let mut sub = backend.subscribe(Collection::Messages, 16).await?;
//! backend.create(Collection::Messages, fields).await?;
//! let event = sub.events.recv().await;
//! ```

mod memory;

pub use memory::{MemoryBackend, WriteOp};

use async_trait::async_trait;
use sync_types::{Collection, Fields, Filter, PushEvent, Record, Sort, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with that id.
    #[error("{collection} record not found: {id}")]
    NotFound {
        /// Collection searched.
        collection: Collection,
        /// Missing id.
        id: String,
    },

    /// The store refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Push channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// This client already holds a live subscription to the collection.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(Collection),

    /// The channel could not be established.
    #[error("push channel unavailable: {0}")]
    Unavailable(String),

    /// The channel was closed.
    #[error("push channel closed")]
    Closed,
}

/// A live subscription to one collection.
///
/// Events arrive in the order the store applied them. The queue is bounded;
/// the receiver yields `None` once the subscription is cancelled.
#[derive(Debug)]
pub struct Subscription {
    /// Subscribed collection.
    pub collection: Collection,
    /// Event queue.
    pub events: mpsc::Receiver<PushEvent>,
}

/// Generic record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record. The store assigns `id` and `created`.
    async fn create(&self, collection: Collection, fields: Fields) -> Result<Record, StoreError>;

    /// Partially update a record, returning it after the change.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<Record, StoreError>;

    /// Fetch one record by id.
    async fn get_one(&self, collection: Collection, id: &str) -> Result<Record, StoreError>;

    /// List records matching `filter`, ordered by `sort`.
    async fn list(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
    ) -> Result<Vec<Record>, StoreError>;
}

/// Source of push events.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a subscription with a queue of `buffer` events.
    async fn subscribe(
        &self,
        collection: Collection,
        buffer: usize,
    ) -> Result<Subscription, ChannelError>;

    /// Cancel this client's subscription. Idempotent.
    async fn unsubscribe(&self, collection: Collection) -> Result<(), ChannelError>;
}

/// Supplies the authenticated user.
pub trait Identity: Send + Sync {
    /// The current user, or `None` when signed out.
    fn current_user(&self) -> Option<UserId>;
}

/// Fixed identity, for tests and embedders that manage auth themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    /// Signed in as `user`.
    pub fn new(user: impl Into<UserId>) -> Self {
        Self(Some(user.into()))
    }

    /// Signed out.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl Identity for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.0.clone()
    }
}
