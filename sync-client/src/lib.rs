//! # sync-client
//!
//! Async client for the convo-sync direct-message engine.
//!
//! This is the main library that applications use to keep a per-user view
//! of a shared message log consistent while other devices and users write
//! to it.
//!
//! ## Features
//!
//! - **Live updates**: one push subscription per collection, dispatched in order
//! - **Per-side soft delete**: hide for me, or tombstone for everyone
//! - **Unread counts**: recomputed from the store, nudged by live events
//! - **Pure State**: uses sync-core for side-effect-free logic
//! - **Backend Abstraction**: pluggable record store and push channel (memory)
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{ChatClient, ChatConfig, MemoryBackend, StaticIdentity};
//!
//! let client = ChatClient::new(
//!     ChatConfig::default(),
//!     MemoryBackend::new(),
//!     &StaticIdentity::new("alice"),
//! )?;
//! client.connect().await?;
//!
//! client.open(&"bob".into()).await?;
//! client.send("hi").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod mux;
mod session;

pub use backend::{
    ChannelError, Identity, MemoryBackend, PushChannel, RecordStore, StaticIdentity, StoreError,
    Subscription, WriteOp,
};
pub use client::ChatClient;
pub use config::{ChatConfig, ConfigError};
pub use controller::{BatchReport, ConversationController};
pub use error::ClientError;
pub use logging::{init_tracing, init_tracing_from};
pub use mux::SubscriptionMultiplexer;
