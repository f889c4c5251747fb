//! # sync-types
//!
//! Record and event types for the convo-sync direct-message engine.
//!
//! This crate provides the foundational types used across all convo-sync crates:
//! - [`UserId`], [`MessageId`], [`Timestamp`] - Identity and ordering types
//! - [`Message`], [`UserProfile`] - Strongly typed views of store records
//! - [`Record`], [`PushEvent`] - The loosely typed boundary with the record store
//! - [`Filter`], [`Sort`] - Query expressions understood by the record store
//! - [`TypesError`] - Boundary validation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod filter;
mod ids;
mod message;
mod record;
mod user;

pub use error::TypesError;
pub use filter::{Filter, Sort, SortKey};
pub use ids::{MessageId, Timestamp, UserId};
pub use message::{Message, MessagePatch, NewMessage, Side};
pub use record::{Collection, Fields, PushAction, PushEvent, Record};
pub use user::UserProfile;
