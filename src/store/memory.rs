use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{
    Document, DocumentSnapshot, DocumentStore, DocumentSubscription, FieldValue, Fields, Query,
    QuerySnapshot, QuerySubscription, StoreError, Subscription, SubscriptionGuard,
};

/// In-process document store with the same snapshot-listener behavior as the
/// hosted service: every subscription receives an initial snapshot right
/// away and a fresh one after each mutation that changes its result set.
/// Server timestamps are strictly increasing across the whole store.
///
/// Also carries the failure/delay injection hooks the tests drive.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    query_watchers: Vec<QueryWatcher>,
    doc_watchers: Vec<DocWatcher>,
    failing: HashSet<String>,
    last_timestamp: DateTime<Utc>,
    op_delay: Option<Duration>,
}

struct QueryWatcher {
    query: Query,
    sender: mpsc::UnboundedSender<QuerySnapshot>,
    guard: SubscriptionGuard,
    last_sent: Option<Vec<Document>>,
}

struct DocWatcher {
    collection: String,
    id: String,
    sender: mpsc::UnboundedSender<DocumentSnapshot>,
    guard: SubscriptionGuard,
    last_sent: Option<Option<Document>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                collections: HashMap::new(),
                query_watchers: Vec::new(),
                doc_watchers: Vec::new(),
                failing: HashSet::new(),
                last_timestamp: Utc::now(),
                op_delay: None,
            }),
        }
    }

    /// Makes every operation against `collection` fail with
    /// `StoreError::Unavailable` until cleared.
    pub fn set_failing(&self, collection: &str, failing: bool) {
        let mut inner = self.inner.lock().unwrap();
        if failing {
            inner.failing.insert(collection.to_string());
        } else {
            inner.failing.remove(collection);
        }
    }

    /// Delivers an error snapshot to every live query subscription on
    /// `collection`, as a transport fault would.
    pub fn inject_query_error(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        for watcher in &mut inner.query_watchers {
            if watcher.query.collection == collection && watcher.guard.is_alive() {
                let _ = watcher
                    .sender
                    .send(Err(StoreError::Unavailable("injected fault".to_string())));
                watcher.last_sent = None;
            }
        }
    }

    /// Adds latency in front of every one-shot operation; used to widen race
    /// windows in tests.
    pub fn set_op_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().op_delay = Some(delay);
    }

    /// Removes a document, notifying subscriptions. Not part of the store
    /// capability contract (cascading deletion is out of scope); kept for
    /// collection maintenance and tests.
    pub fn delete_document(&self, collection: &str, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner
            .collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some());
        if removed {
            inner.notify();
        }
        removed
    }

    pub fn active_query_listeners(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.prune_watchers();
        inner.query_watchers.len()
    }

    pub fn active_document_listeners(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.prune_watchers();
        inner.doc_watchers.len()
    }

    async fn maybe_delay(&self) {
        let delay = self.inner.lock().unwrap().op_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_once(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        self.maybe_delay().await;
        let inner = self.inner.lock().unwrap();
        if inner.failing.contains(&query.collection) {
            return Err(StoreError::Unavailable(query.collection.clone()));
        }
        Ok(inner.evaluate(&query))
    }

    fn subscribe_query(&self, query: Query) -> QuerySubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let guard = SubscriptionGuard::new();

        let mut inner = self.inner.lock().unwrap();
        let last_sent = if inner.failing.contains(&query.collection) {
            let _ = sender.send(Err(StoreError::Unavailable(query.collection.clone())));
            None
        } else {
            let snapshot = inner.evaluate(&query);
            let _ = sender.send(Ok(snapshot.clone()));
            Some(snapshot)
        };
        inner.query_watchers.push(QueryWatcher {
            query,
            sender,
            guard: guard.clone(),
            last_sent,
        });

        Subscription::new(receiver, guard)
    }

    fn subscribe_document(&self, collection: &str, id: &str) -> DocumentSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let guard = SubscriptionGuard::new();

        let mut inner = self.inner.lock().unwrap();
        let last_sent = if inner.failing.contains(collection) {
            let _ = sender.send(Err(StoreError::Unavailable(collection.to_string())));
            None
        } else {
            let current = inner.lookup(collection, id);
            let _ = sender.send(Ok(current.clone()));
            Some(current)
        };
        inner.doc_watchers.push(DocWatcher {
            collection: collection.to_string(),
            id: id.to_string(),
            sender,
            guard: guard.clone(),
            last_sent,
        });

        Subscription::new(receiver, guard)
    }

    async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.maybe_delay().await;
        let mut inner = self.inner.lock().unwrap();
        if inner.failing.contains(collection) {
            return Err(StoreError::Unavailable(collection.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let fields = inner.resolve_server_timestamps(fields);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        inner.notify();
        debug!("Added document {}/{}", collection, id);
        Ok(id)
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        self.maybe_delay().await;
        let mut inner = self.inner.lock().unwrap();
        if inner.failing.contains(collection) {
            return Err(StoreError::Unavailable(collection.to_string()));
        }
        let fields = inner.resolve_server_timestamps(fields);
        let docs = inner.collections.entry(collection.to_string()).or_default();
        if !merge && !docs.contains_key(id) {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.entry(id.to_string()).or_default().extend(fields);
        inner.notify();
        debug!("Updated document {}/{}", collection, id);
        Ok(())
    }
}

impl Inner {
    /// Replaces every `ServerTimestamp` marker with a single store-assigned
    /// time, kept strictly increasing across writes.
    fn resolve_server_timestamps(&mut self, mut fields: Fields) -> Fields {
        if fields.values().any(|v| *v == FieldValue::ServerTimestamp) {
            let now = Utc::now();
            let assigned = if now > self.last_timestamp {
                now
            } else {
                self.last_timestamp + chrono::Duration::milliseconds(1)
            };
            self.last_timestamp = assigned;
            for value in fields.values_mut() {
                if *value == FieldValue::ServerTimestamp {
                    *value = FieldValue::Timestamp(assigned);
                }
            }
        }
        fields
    }

    fn lookup(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            })
    }

    fn evaluate(&self, query: &Query) -> Vec<Document> {
        let mut results: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| query.filter.matches(fields))
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            results.sort_by(|a, b| {
                compare_values(a.fields.get(&order.field), b.fields.get(&order.field))
                    .then_with(|| a.id.cmp(&b.id))
            });
            if order.descending {
                results.reverse();
            }
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        if let Some(n) = query.limit_to_last {
            if results.len() > n {
                results = results.split_off(results.len() - n);
            }
        }
        results
    }

    fn prune_watchers(&mut self) {
        self.query_watchers
            .retain(|w| w.guard.is_alive() && !w.sender.is_closed());
        self.doc_watchers
            .retain(|w| w.guard.is_alive() && !w.sender.is_closed());
    }

    /// Re-evaluates every live subscription after a mutation, delivering
    /// only to those whose result set actually changed.
    fn notify(&mut self) {
        self.prune_watchers();

        let mut query_updates = Vec::new();
        for (index, watcher) in self.query_watchers.iter().enumerate() {
            if self.failing.contains(&watcher.query.collection) {
                continue;
            }
            let snapshot = self.evaluate(&watcher.query);
            if watcher.last_sent.as_ref() != Some(&snapshot) {
                query_updates.push((index, snapshot));
            }
        }
        for (index, snapshot) in query_updates {
            let watcher = &mut self.query_watchers[index];
            let _ = watcher.sender.send(Ok(snapshot.clone()));
            watcher.last_sent = Some(snapshot);
        }

        let mut doc_updates = Vec::new();
        for (index, watcher) in self.doc_watchers.iter().enumerate() {
            if self.failing.contains(&watcher.collection) {
                continue;
            }
            let current = self.lookup(&watcher.collection, &watcher.id);
            if watcher.last_sent.as_ref() != Some(&current) {
                doc_updates.push((index, current));
            }
        }
        for (index, current) in doc_updates {
            let watcher = &mut self.doc_watchers[index];
            let _ = watcher.sender.send(Ok(current.clone()));
            watcher.last_sent = Some(current);
        }
    }
}

fn compare_values(a: Option<&FieldValue>, b: Option<&FieldValue>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        },
    }
}
