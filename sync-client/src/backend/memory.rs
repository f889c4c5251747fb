//! In-memory record store and push channel.
//!
//! Several clients can share one backend: [`MemoryBackend::connect_client`]
//! returns a handle over the same records with its own subscriptions, the
//! way two devices share one server. Clones of a handle are the same client.

use super::{ChannelError, PushChannel, RecordStore, StoreError, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{
    Collection, Fields, Filter, PushAction, PushEvent, Record, Sort, Timestamp, UserProfile,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// A write observed by the backend, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// `RecordStore::create`.
    Create {
        /// Target collection.
        collection: Collection,
        /// Assigned id.
        id: String,
    },
    /// `RecordStore::update`.
    Update {
        /// Target collection.
        collection: Collection,
        /// Updated id.
        id: String,
        /// Partial payload as sent.
        fields: Fields,
    },
}

#[derive(Debug)]
struct Subscriber {
    client: u64,
    collection: Collection,
    tx: mpsc::Sender<PushEvent>,
}

#[derive(Debug, Default)]
struct Shared {
    users: Vec<Record>,
    messages: Vec<Record>,
    subscribers: Vec<Subscriber>,
    next_client: u64,
    last_created: i64,
    write_log: Vec<WriteOp>,
    fail_next_create: Option<String>,
    fail_next_update: Option<String>,
    fail_next_list: Option<String>,
    fail_next_subscribe: Option<String>,
    fail_updates_for: HashSet<String>,
}

impl Shared {
    fn records(&self, collection: Collection) -> &Vec<Record> {
        match collection {
            Collection::Users => &self.users,
            Collection::Messages => &self.messages,
        }
    }

    fn records_mut(&mut self, collection: Collection) -> &mut Vec<Record> {
        match collection {
            Collection::Users => &mut self.users,
            Collection::Messages => &mut self.messages,
        }
    }

    /// Strictly increasing creation time, so ordering never depends on ties.
    fn next_created(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis();
        self.last_created = now.max(self.last_created + 1);
        Timestamp::from_millis(self.last_created)
    }

    fn insert(&mut self, collection: Collection, mut record: Record) -> Record {
        let id = match record.id() {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let created = self.next_created().to_rfc3339();
        record.set("id", Value::String(id));
        if record.get("created").map_or(true, Value::is_null) {
            record.set("created", Value::String(created.clone()));
        }
        record.set("updated", Value::String(created));
        self.records_mut(collection).push(record.clone());
        self.publish(PushEvent::new(collection, PushAction::Create, record.clone()));
        record
    }

    fn publish(&mut self, event: PushEvent) {
        self.subscribers.retain(|sub| {
            if sub.collection != event.collection {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        client = sub.client,
                        collection = %event.collection,
                        action = %event.action,
                        "push queue full, dropping event"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// In-memory backend with failure injection.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    client: u64,
    shared: Arc<Mutex<Shared>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend and its first client handle.
    pub fn new() -> Self {
        let shared = Shared {
            next_client: 1,
            ..Shared::default()
        };
        Self {
            client: 0,
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    /// A handle for another client on the same records.
    pub fn connect_client(&self) -> Self {
        let mut shared = self.lock();
        let client = shared.next_client;
        shared.next_client += 1;
        Self {
            client,
            shared: Arc::clone(&self.shared),
        }
    }

    /// This handle's client id.
    pub fn client_id(&self) -> u64 {
        self.client
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===========================================
    // Seeding and inspection
    // ===========================================

    /// Insert a record directly, bypassing failure injection and the write
    /// log. A provided `id` or `created` is kept. Subscribers see a `create`.
    pub fn seed(&self, collection: Collection, fields: Fields) -> Record {
        self.lock().insert(collection, Record::new(fields))
    }

    /// Seed a user profile.
    pub fn add_user(&self, profile: &UserProfile) -> Record {
        let fields = match serde_json::to_value(profile) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Fields::new();
                map.insert("id".into(), Value::String(profile.id.to_string()));
                map
            }
        };
        self.seed(Collection::Users, fields)
    }

    /// Delete a record from storage, as another system would.
    /// Subscribers see a `delete` carrying the old record.
    pub fn remove(&self, collection: Collection, id: &str) -> Option<Record> {
        let mut shared = self.lock();
        let records = shared.records_mut(collection);
        let idx = records.iter().position(|r| r.id() == Some(id))?;
        let record = records.remove(idx);
        shared.publish(PushEvent::new(collection, PushAction::Delete, record.clone()));
        Some(record)
    }

    /// Deliver an arbitrary event to subscribers without touching storage.
    pub fn publish_raw(&self, collection: Collection, action: PushAction, record: Record) {
        self.lock()
            .publish(PushEvent::new(collection, action, record));
    }

    /// Snapshot of a collection in insertion order.
    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.lock().records(collection).clone()
    }

    /// One record by id.
    pub fn record(&self, collection: Collection, id: &str) -> Option<Record> {
        self.lock()
            .records(collection)
            .iter()
            .find(|r| r.id() == Some(id))
            .cloned()
    }

    /// Every create and update made through [`RecordStore`], by any client.
    pub fn write_log(&self) -> Vec<WriteOp> {
        self.lock().write_log.clone()
    }

    /// Forget the write log.
    pub fn clear_write_log(&self) {
        self.lock().write_log.clear();
    }

    /// Live subscriptions for `collection` across all clients.
    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.collection == collection && !s.tx.is_closed())
            .count()
    }

    /// Drop this client's subscriptions without an unsubscribe, as a lost
    /// connection would.
    pub fn disconnect(&self) {
        let client = self.client;
        self.lock().subscribers.retain(|s| s.client != client);
    }

    // ===========================================
    // Failure injection
    // ===========================================

    /// Cause the next create to fail with the given error.
    pub fn fail_next_create(&self, error: &str) {
        self.lock().fail_next_create = Some(error.to_string());
    }

    /// Cause the next update to fail with the given error.
    pub fn fail_next_update(&self, error: &str) {
        self.lock().fail_next_update = Some(error.to_string());
    }

    /// Cause the next list to fail with the given error.
    pub fn fail_next_list(&self, error: &str) {
        self.lock().fail_next_list = Some(error.to_string());
    }

    /// Cause the next subscribe to fail with the given error.
    pub fn fail_next_subscribe(&self, error: &str) {
        self.lock().fail_next_subscribe = Some(error.to_string());
    }

    /// Reject every update to `id` until cleared.
    pub fn fail_updates_for(&self, id: &str) {
        self.lock().fail_updates_for.insert(id.to_string());
    }

    /// Clear all injected failures.
    pub fn clear_failures(&self) {
        let mut shared = self.lock();
        shared.fail_next_create = None;
        shared.fail_next_update = None;
        shared.fail_next_list = None;
        shared.fail_next_subscribe = None;
        shared.fail_updates_for.clear();
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn create(&self, collection: Collection, fields: Fields) -> Result<Record, StoreError> {
        let mut shared = self.lock();

        if let Some(error) = shared.fail_next_create.take() {
            return Err(StoreError::Unavailable(error));
        }

        let mut fields = fields;
        // Server-assigned columns.
        fields.remove("id");
        fields.remove("created");
        let record = shared.insert(collection, Record::new(fields));
        let id = record.id().unwrap_or_default().to_string();
        debug!(client = self.client, %collection, %id, "record created");
        shared.write_log.push(WriteOp::Create { collection, id });
        Ok(record)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        let mut shared = self.lock();

        if let Some(error) = shared.fail_next_update.take() {
            return Err(StoreError::Unavailable(error));
        }
        if shared.fail_updates_for.contains(id) {
            return Err(StoreError::Rejected(format!("updates to {} are blocked", id)));
        }

        let updated = Timestamp::now().to_rfc3339();
        let record = {
            let record = shared
                .records_mut(collection)
                .iter_mut()
                .find(|r| r.id() == Some(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                })?;
            record.merge(&fields);
            record.set("updated", Value::String(updated));
            record.clone()
        };

        debug!(client = self.client, %collection, %id, "record updated");
        shared.write_log.push(WriteOp::Update {
            collection,
            id: id.to_string(),
            fields,
        });
        shared.publish(PushEvent::new(collection, PushAction::Update, record.clone()));
        Ok(record)
    }

    async fn get_one(&self, collection: Collection, id: &str) -> Result<Record, StoreError> {
        self.record(collection, id)
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })
    }

    async fn list(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut shared = self.lock();

        if let Some(error) = shared.fail_next_list.take() {
            return Err(StoreError::Unavailable(error));
        }

        let mut records: Vec<Record> = shared
            .records(collection)
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .cloned()
            .collect();
        if let Some(sort) = sort {
            records.sort_by(|a, b| sort.compare(a, b));
        }
        Ok(records)
    }
}

#[async_trait]
impl PushChannel for MemoryBackend {
    async fn subscribe(
        &self,
        collection: Collection,
        buffer: usize,
    ) -> Result<Subscription, ChannelError> {
        let mut shared = self.lock();

        if let Some(error) = shared.fail_next_subscribe.take() {
            return Err(ChannelError::Unavailable(error));
        }

        let client = self.client;
        shared.subscribers.retain(|s| !s.tx.is_closed());
        if shared
            .subscribers
            .iter()
            .any(|s| s.client == client && s.collection == collection)
        {
            return Err(ChannelError::AlreadySubscribed(collection));
        }

        let (tx, events) = mpsc::channel(buffer.max(1));
        shared.subscribers.push(Subscriber {
            client,
            collection,
            tx,
        });
        debug!(client, %collection, "subscribed");
        Ok(Subscription { collection, events })
    }

    async fn unsubscribe(&self, collection: Collection) -> Result<(), ChannelError> {
        let client = self.client;
        self.lock()
            .subscribers
            .retain(|s| !(s.client == client && s.collection == collection));
        debug!(client, %collection, "unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn message_fields(sender: &str, receiver: &str, content: &str) -> Fields {
        fields(json!({
            "sender": sender,
            "receiver": receiver,
            "content": content,
            "read": false,
        }))
    }

    // ===========================================
    // RecordStore Tests
    // ===========================================

    #[tokio::test]
    async fn create_assigns_id_and_created() {
        let backend = MemoryBackend::new();
        let record = backend
            .create(Collection::Messages, message_fields("a", "b", "hi"))
            .await
            .unwrap();

        assert!(record.id().is_some());
        assert!(record.get_str("created").is_some());
        assert_eq!(backend.records(Collection::Messages).len(), 1);
    }

    #[tokio::test]
    async fn created_is_strictly_increasing() {
        let backend = MemoryBackend::new();
        let mut previous = Timestamp::default();
        for i in 0..20 {
            let record = backend
                .create(Collection::Messages, message_fields("a", "b", &i.to_string()))
                .await
                .unwrap();
            let created = Timestamp::parse(record.get_str("created").unwrap()).unwrap();
            assert!(created > previous);
            previous = created;
        }
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let backend = MemoryBackend::new();
        let record = backend
            .create(Collection::Messages, message_fields("a", "b", "hi"))
            .await
            .unwrap();
        let id = record.id().unwrap().to_string();

        let updated = backend
            .update(Collection::Messages, &id, fields(json!({"read": true})))
            .await
            .unwrap();

        assert!(updated.get_bool("read"));
        assert_eq!(updated.get_str("content"), Some("hi"));
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let backend = MemoryBackend::new();
        let result = backend
            .update(Collection::Messages, "nope", Fields::new())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let backend = MemoryBackend::new();
        backend.seed(
            Collection::Messages,
            fields(json!({"id": "m2", "sender": "a", "receiver": "b", "created": "2024-01-01T00:00:02.000Z"})),
        );
        backend.seed(
            Collection::Messages,
            fields(json!({"id": "m1", "sender": "b", "receiver": "a", "created": "2024-01-01T00:00:01.000Z"})),
        );
        backend.seed(
            Collection::Messages,
            fields(json!({"id": "x", "sender": "c", "receiver": "a"})),
        );

        let filter = Filter::conversation(&"a".into(), &"b".into());
        let records = backend
            .list(Collection::Messages, Some(&filter), Some(&Sort::chronological()))
            .await
            .unwrap();

        let ids: Vec<_> = records.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    // ===========================================
    // Failure Injection Tests
    // ===========================================

    #[tokio::test]
    async fn forced_create_failure_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next_create("offline");

        let result = backend
            .create(Collection::Messages, message_fields("a", "b", "hi"))
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        backend
            .create(Collection::Messages, message_fields("a", "b", "hi"))
            .await
            .unwrap();
        assert_eq!(backend.write_log().len(), 1);
    }

    #[tokio::test]
    async fn blocked_id_rejects_every_update() {
        let backend = MemoryBackend::new();
        backend.seed(Collection::Messages, message_fields("a", "b", "hi"));
        let id = backend.records(Collection::Messages)[0]
            .id()
            .unwrap()
            .to_string();
        backend.fail_updates_for(&id);

        for _ in 0..2 {
            let result = backend
                .update(Collection::Messages, &id, fields(json!({"read": true})))
                .await;
            assert!(matches!(result, Err(StoreError::Rejected(_))));
        }

        backend.clear_failures();
        backend
            .update(Collection::Messages, &id, fields(json!({"read": true})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn forced_list_failure() {
        let backend = MemoryBackend::new();
        backend.fail_next_list("timeout");
        assert!(backend.list(Collection::Users, None, None).await.is_err());
        assert!(backend.list(Collection::Users, None, None).await.is_ok());
    }

    // ===========================================
    // PushChannel Tests
    // ===========================================

    #[tokio::test]
    async fn subscribers_receive_writes_in_order() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(Collection::Messages, 8).await.unwrap();

        let record = backend
            .create(Collection::Messages, message_fields("a", "b", "hi"))
            .await
            .unwrap();
        let id = record.id().unwrap().to_string();
        backend
            .update(Collection::Messages, &id, fields(json!({"read": true})))
            .await
            .unwrap();
        backend.remove(Collection::Messages, &id);

        let actions: Vec<PushAction> = [
            sub.events.recv().await.unwrap(),
            sub.events.recv().await.unwrap(),
            sub.events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.action)
        .collect();
        assert_eq!(
            actions,
            vec![PushAction::Create, PushAction::Update, PushAction::Delete]
        );
    }

    #[tokio::test]
    async fn other_collection_is_not_delivered() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(Collection::Users, 8).await.unwrap();

        backend
            .create(Collection::Messages, message_fields("a", "b", "hi"))
            .await
            .unwrap();

        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn clients_share_records_but_not_subscriptions() {
        let alice = MemoryBackend::new();
        let bob = alice.connect_client();
        let mut alice_sub = alice.subscribe(Collection::Messages, 8).await.unwrap();
        let mut bob_sub = bob.subscribe(Collection::Messages, 8).await.unwrap();

        bob.create(Collection::Messages, message_fields("b", "a", "yo"))
            .await
            .unwrap();
        assert!(alice_sub.events.recv().await.is_some());
        assert!(bob_sub.events.recv().await.is_some());

        bob.unsubscribe(Collection::Messages).await.unwrap();
        assert_eq!(alice.subscriber_count(Collection::Messages), 1);
        assert!(bob_sub.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn double_subscribe_is_rejected() {
        let backend = MemoryBackend::new();
        let _sub = backend.subscribe(Collection::Users, 8).await.unwrap();
        let result = backend.subscribe(Collection::Users, 8).await;
        assert!(matches!(result, Err(ChannelError::AlreadySubscribed(_))));
    }

    #[tokio::test]
    async fn full_queue_drops_events() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(Collection::Messages, 1).await.unwrap();

        backend.seed(Collection::Messages, message_fields("a", "b", "1"));
        backend.seed(Collection::Messages, message_fields("a", "b", "2"));

        assert!(sub.events.recv().await.is_some());
        assert!(sub.events.try_recv().is_err());
        assert_eq!(backend.records(Collection::Messages).len(), 2);
    }

    #[tokio::test]
    async fn disconnect_closes_queues() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(Collection::Messages, 8).await.unwrap();

        backend.disconnect();

        assert!(sub.events.recv().await.is_none());
        assert_eq!(backend.subscriber_count(Collection::Messages), 0);
        backend.subscribe(Collection::Messages, 8).await.unwrap();
    }
}
