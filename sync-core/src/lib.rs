//! # sync-core
//!
//! Pure conversation state for convo-sync (no I/O, instant tests).
//!
//! This crate implements the per-viewer state of a direct-message session
//! without any network or storage I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`VisibilityPolicy`] decides what a viewer sees of a message
//! - [`MessageStore`] holds the sorted, deduplicated log of the open conversation
//! - [`UnreadIndex`] caches unread counts per counterparty
//! - [`Roster`] caches the other users, sorted by name
//! - [`route`] turns a push event into a list of [`Effect`]s
//!
//! The actual I/O (record store writes, push subscriptions) is performed by
//! `sync-client`, which interprets the effects produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod roster;
pub mod route;
pub mod store;
pub mod unread;
pub mod visibility;

pub use roster::Roster;
pub use route::{plan_message_event, plan_orphan_delete, Effect};
pub use store::{Applied, MessageStore};
pub use unread::{RecomputeTicket, UnreadIndex};
pub use visibility::{Rendered, Verdict, VisibilityPolicy, DEFAULT_TOMBSTONE_TEXT};
