//! SubscriptionMultiplexer - owns the live push subscriptions.
//!
//! One subscription per collection (`users`, `messages`) for the lifetime
//! of the session, consumed by a single dispatch loop so events of a
//! collection are handled in delivery order.
//!
//! ```text
//! PushChannel ──users────┐
//!                        ├─► dispatch loop ─► Roster
//! PushChannel ──messages─┘         │
//!                                  ├─► sync-core::route ─► Effects
//!                                  │        ├─► MessageStore
//!                                  │        ├─► UnreadIndex
//!                                  └────────┴─► ConversationController (writes)
//! ```
//!
//! Switching conversation does not touch the subscriptions: the `messages`
//! subscription covers every conversation and routing decides per event.

use std::sync::Arc;
use sync_core::{plan_message_event, plan_orphan_delete, Applied, Effect, MessageStore};
use sync_types::{Collection, MessageId, PushAction, PushEvent, UserId};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{PushChannel, RecordStore};
use crate::controller::ConversationController;
use crate::error::ClientError;
use crate::session::Session;

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Fans push events out to the session state.
pub struct SubscriptionMultiplexer<B: RecordStore + PushChannel + 'static> {
    backend: Arc<B>,
    dispatcher: Dispatcher<B>,
    buffer: usize,
    running: Mutex<Option<Running>>,
}

impl<B: RecordStore + PushChannel + 'static> SubscriptionMultiplexer<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        controller: ConversationController<B>,
        session: Session,
        buffer: usize,
    ) -> Self {
        Self {
            backend,
            dispatcher: Dispatcher {
                controller,
                session,
            },
            buffer,
            running: Mutex::new(None),
        }
    }

    /// True while the dispatch loop is alive.
    pub async fn is_running(&self) -> bool {
        match self.running.lock().await.as_ref() {
            Some(running) => !running.task.is_finished(),
            None => false,
        }
    }

    /// Subscribe to both collections and start dispatching. A no-op when
    /// already running.
    pub async fn start(&self) -> Result<(), ClientError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                return Ok(());
            }
        }
        if let Some(stale) = running.take() {
            // The loop exited on its own; release the old subscriptions.
            stale.task.abort();
            self.unsubscribe_all().await;
        }
        if self.dispatcher.session.lock().await.torn_down {
            return Err(ClientError::TornDown);
        }

        let users = self.backend.subscribe(Collection::Users, self.buffer).await?;
        let messages = match self
            .backend
            .subscribe(Collection::Messages, self.buffer)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                self.unsubscribe_all().await;
                return Err(e.into());
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let task = tokio::spawn(dispatcher.run(users.events, messages.events, shutdown_rx));
        *running = Some(Running { shutdown, task });
        info!(buffer = self.buffer, "push subscriptions started");
        Ok(())
    }

    /// Cancel both subscriptions and stop the dispatch loop. Idempotent.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        self.unsubscribe_all().await;
        if let Err(e) = running.task.await {
            warn!(error = %e, "dispatch loop ended abnormally");
        }
        info!("push subscriptions stopped");
    }

    /// Recover from a dropped channel or missed events: resubscribe, then
    /// reload everything the events would have kept current.
    pub async fn resync(&self) -> Result<(), ClientError> {
        info!("resynchronizing");
        self.shutdown().await;
        self.start().await?;

        let controller = &self.dispatcher.controller;
        let open = self
            .dispatcher
            .session
            .lock()
            .await
            .counterparty()
            .cloned();

        controller.refresh_roster().await?;
        controller.refresh_unread().await?;
        if let Some(counterparty) = open {
            controller.open(&counterparty).await?;
        }
        Ok(())
    }

    async fn unsubscribe_all(&self) {
        for collection in [Collection::Users, Collection::Messages] {
            if let Err(e) = self.backend.unsubscribe(collection).await {
                warn!(%collection, error = %e, "unsubscribe failed");
            }
        }
    }
}

/// The part of the multiplexer that lives inside the dispatch task.
struct Dispatcher<S: RecordStore> {
    controller: ConversationController<S>,
    session: Session,
}

impl<S: RecordStore> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            session: self.session.clone(),
        }
    }
}

impl<S: RecordStore + 'static> Dispatcher<S> {
    async fn run(
        self,
        mut users: mpsc::Receiver<PushEvent>,
        mut messages: mpsc::Receiver<PushEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut users_open = true;
        let mut messages_open = true;

        while users_open || messages_open {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = users.recv(), if users_open => match event {
                    Some(event) => self.on_user_event(event).await,
                    None => {
                        warn!("users channel closed");
                        users_open = false;
                    }
                },
                event = messages.recv(), if messages_open => match event {
                    Some(event) => self.on_message_event(event).await,
                    None => {
                        warn!("messages channel closed");
                        messages_open = false;
                    }
                },
            }
        }

        if !users_open && !messages_open {
            warn!("all push channels closed, resync required");
        }
        debug!("dispatch loop exited");
    }

    async fn on_user_event(&self, event: PushEvent) {
        let mut state = self.session.lock().await;
        if state.torn_down {
            return;
        }

        let changed = match event.user() {
            Ok(user) => state.roster.apply(event.action, user),
            Err(e) => match (event.action, event.record.id()) {
                (PushAction::Delete, Some(id)) => state.roster.apply_delete(&UserId::new(id)),
                (action, _) => {
                    warn!(%action, error = %e, "skipping invalid user record");
                    return;
                }
            },
        };
        drop(state);

        if changed {
            debug!(action = %event.action, "roster updated");
            self.session.notify();
        }
    }

    async fn on_message_event(&self, event: PushEvent) {
        let (me, open, generation) = {
            let state = self.session.lock().await;
            if state.torn_down {
                return;
            }
            (
                state.me.clone(),
                state.counterparty().cloned(),
                state.generation,
            )
        };

        let effects = match event.message() {
            Ok(msg) => plan_message_event(&me, open.as_ref(), event.action, msg),
            Err(e) => match (event.action, event.record.id()) {
                (PushAction::Delete, Some(id)) => {
                    plan_orphan_delete(open.as_ref(), MessageId::new(id))
                }
                (action, _) => {
                    warn!(%action, error = %e, "skipping invalid message record");
                    return;
                }
            },
        };

        for effect in effects {
            self.execute(generation, effect).await;
        }
    }

    async fn execute(&self, generation: u64, effect: Effect) {
        match effect {
            Effect::StoreCreate(msg) => {
                let id = msg.id.clone();
                self.apply_to_store(generation, |store| store.apply_remote_create(msg))
                    .await;
                debug!(%id, "remote create");
            }
            Effect::StoreUpdate(msg) => {
                let id = msg.id.clone();
                self.apply_to_store(generation, |store| store.apply_remote_update(msg))
                    .await;
                debug!(%id, "remote update");
            }
            Effect::StoreDelete(id) => {
                self.apply_to_store(generation, |store| store.apply_remote_delete(&id))
                    .await;
                debug!(%id, "remote delete");
            }
            Effect::MarkRead(id) => {
                if self.session.lock().await.is_current(generation) {
                    self.controller.mark_read(&[id]).await;
                }
            }
            Effect::RecomputeUnread => {
                if let Err(e) = self.controller.refresh_unread().await {
                    debug!(error = %e, "unread recompute skipped");
                }
            }
            Effect::NudgeUnread(msg) => {
                let mut state = self.session.lock().await;
                if !state.torn_down && state.unread.on_message_created(&msg) {
                    drop(state);
                    debug!(from = %msg.sender, "unread count bumped");
                    self.session.notify();
                }
            }
            Effect::ReadObserved(msg) => {
                let needs_recompute = {
                    let state = self.session.lock().await;
                    !state.torn_down && state.unread.on_message_marked_read(&msg)
                };
                if needs_recompute {
                    if let Err(e) = self.controller.refresh_unread().await {
                        debug!(error = %e, "unread recompute skipped");
                    }
                }
            }
        }
    }

    async fn apply_to_store<F>(&self, generation: u64, apply: F)
    where
        F: FnOnce(&mut MessageStore) -> Applied,
    {
        let mut state = self.session.lock().await;
        if !state.is_current(generation) {
            return;
        }
        if apply(&mut state.store).changed() {
            drop(state);
            self.session.notify();
        }
    }
}
