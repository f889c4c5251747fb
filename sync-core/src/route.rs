//! Routing of `messages` push events.
//!
//! [`plan_message_event`] is a pure function: given the viewer, the open
//! conversation (if any) and one event, it returns the [`Effect`]s to carry
//! out, in order. The client interprets them, performing store writes and
//! queries; this module never touches state.

use sync_types::{Message, MessageId, PushAction, UserId};

/// Instructions produced by routing, executed by `sync-client`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// `MessageStore::apply_remote_create`.
    StoreCreate(Message),
    /// `MessageStore::apply_remote_update`.
    StoreUpdate(Message),
    /// `MessageStore::apply_remote_delete`.
    StoreDelete(MessageId),
    /// Write `read = true` for this message.
    MarkRead(MessageId),
    /// Run the authoritative unread query.
    RecomputeUnread,
    /// `UnreadIndex::on_message_created`.
    NudgeUnread(Message),
    /// `UnreadIndex::on_message_marked_read`, recomputing if it asks to.
    ReadObserved(Message),
}

/// Plan the handling of one `messages` event.
///
/// `open` is the counterparty of the open conversation.
pub fn plan_message_event(
    viewer: &UserId,
    open: Option<&UserId>,
    action: PushAction,
    msg: Message,
) -> Vec<Effect> {
    let in_open = open.is_some_and(|counterparty| msg.is_between(viewer, counterparty));

    match action {
        PushAction::Create if in_open => {
            let mark = msg.is_unread_for(viewer) && !msg.is_hidden_for(viewer);
            let id = msg.id.clone();
            let mut effects = vec![Effect::StoreCreate(msg)];
            if mark {
                effects.push(Effect::MarkRead(id));
                effects.push(Effect::RecomputeUnread);
            }
            effects
        }
        PushAction::Create if msg.is_unread_for(viewer) => vec![Effect::NudgeUnread(msg)],
        PushAction::Create => Vec::new(),

        PushAction::Update => {
            let read_observed = &msg.receiver == viewer && &msg.sender != viewer && msg.read;
            let mut effects = Vec::new();
            if read_observed {
                effects.push(Effect::ReadObserved(msg.clone()));
            }
            if in_open {
                effects.insert(0, Effect::StoreUpdate(msg));
            }
            effects
        }

        PushAction::Delete => {
            let mut effects = Vec::new();
            let was_unread = msg.is_unread_for(viewer);
            if in_open {
                effects.push(Effect::StoreDelete(msg.id));
            }
            if was_unread {
                effects.push(Effect::RecomputeUnread);
            }
            effects
        }
    }
}

/// Plan a `delete` whose record only carries an id.
///
/// Removal is unconditional and harmless when the id is absent, so it is
/// applied whenever a conversation is open.
pub fn plan_orphan_delete(open: Option<&UserId>, id: MessageId) -> Vec<Effect> {
    match open {
        Some(_) => vec![Effect::StoreDelete(id)],
        None => Vec::new(),
    }
}
