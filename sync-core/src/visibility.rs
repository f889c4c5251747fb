//! Per-viewer visibility of messages.
//!
//! Two independent mechanisms hide a message's content:
//! - the per-side hide flags (`deletedBySender` / `deletedByReceiver`) remove
//!   the message from one participant's log entirely;
//! - the global tombstone (`isDeleted`) keeps the message in both logs but
//!   renders a fixed placeholder instead of the content.
//!
//! The hide flag wins: a message hidden for the viewer is never rendered,
//! tombstoned or not.

use sync_types::{Message, MessageId, Timestamp, UserId};

/// Placeholder shown in place of a tombstoned message's content.
pub const DEFAULT_TOMBSTONE_TEXT: &str = "This message was deleted";

/// Result of evaluating a message for one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict<'a> {
    /// False when the viewer hid the message; the caller must drop it.
    pub visible: bool,
    /// Text to render. The placeholder for tombstones, else the content.
    pub rendered_content: &'a str,
}

/// Decides what a viewer sees of a message. Pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityPolicy {
    placeholder: String,
}

impl VisibilityPolicy {
    /// Policy rendering tombstones with the given placeholder.
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
        }
    }

    /// The tombstone placeholder.
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Evaluate `msg` for `viewer`.
    pub fn evaluate<'a>(&'a self, msg: &'a Message, viewer: &UserId) -> Verdict<'a> {
        let visible = !msg.is_hidden_for(viewer);
        let rendered_content = if msg.is_deleted {
            self.placeholder.as_str()
        } else {
            msg.content.as_str()
        };
        Verdict {
            visible,
            rendered_content,
        }
    }

    /// Shorthand for `evaluate(msg, viewer).visible`.
    pub fn is_visible(&self, msg: &Message, viewer: &UserId) -> bool {
        !msg.is_hidden_for(viewer)
    }

    /// Owned, render-ready view of `msg`, or `None` if hidden for `viewer`.
    pub fn render(&self, msg: &Message, viewer: &UserId) -> Option<Rendered> {
        let verdict = self.evaluate(msg, viewer);
        if !verdict.visible {
            return None;
        }
        Some(Rendered {
            id: msg.id.clone(),
            sender: msg.sender.clone(),
            receiver: msg.receiver.clone(),
            content: verdict.rendered_content.to_string(),
            created: msg.created,
            read: msg.read,
            // The edit marker is meaningless once the content is gone.
            is_edited: msg.is_edited && !msg.is_deleted,
            is_deleted: msg.is_deleted,
        })
    }
}

impl Default for VisibilityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TOMBSTONE_TEXT)
    }
}

/// A message as one viewer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Message id.
    pub id: MessageId,
    /// Author.
    pub sender: UserId,
    /// Addressee.
    pub receiver: UserId,
    /// Content or tombstone placeholder.
    pub content: String,
    /// Creation time.
    pub created: Timestamp,
    /// Receiver has read it.
    pub read: bool,
    /// Edited and not tombstoned.
    pub is_edited: bool,
    /// Tombstoned.
    pub is_deleted: bool,
}
