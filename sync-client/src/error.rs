//! Error types for sync-client.

use sync_types::{MessageId, TypesError};
use thiserror::Error;

use crate::backend::{ChannelError, StoreError};
use crate::config::ConfigError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Record store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Push channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The configuration is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A record failed boundary validation.
    #[error("invalid record: {0}")]
    Record(#[from] TypesError),

    /// Message text was empty or whitespace.
    #[error("message text is empty")]
    EmptyMessage,

    /// The command needs an open conversation.
    #[error("no conversation is open")]
    NoOpenConversation,

    /// No user is signed in.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The current user may not perform this action on the message.
    #[error("not authorized for message {id}: {reason}")]
    NotAuthorized {
        /// Target message.
        id: MessageId,
        /// What was violated.
        reason: &'static str,
    },

    /// The message is tombstoned and can no longer change.
    #[error("message {0} was deleted for everyone")]
    Tombstoned(MessageId),

    /// The message could not be created. The draft is returned for a retry.
    #[error("failed to send message: {source}")]
    SendFailed {
        /// Text the user typed.
        draft: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Another conversation was opened while this one was loading.
    #[error("superseded by a newer conversation switch")]
    Superseded,

    /// The session has been signed out.
    #[error("session torn down")]
    TornDown,
}

impl ClientError {
    /// The unsent text, if this is a failed send.
    pub fn draft(&self) -> Option<&str> {
        match self {
            ClientError::SendFailed { draft, .. } => Some(draft),
            _ => None,
        }
    }
}
