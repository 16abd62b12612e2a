pub mod memory;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// A single field value as stored in a document.
///
/// `ServerTimestamp` is a write-time marker: the store replaces it with its
/// own clock when the write commits, so clients never assign message
/// timestamps themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    TextArray(Vec<String>),
    Timestamp(DateTime<Utc>),
    ServerTimestamp,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_text_array(&self) -> Option<&[String]> {
        match self {
            FieldValue::TextArray(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::TextArray(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

pub type Fields = HashMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_text)
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(FieldValue::as_timestamp)
    }

    pub fn text_array(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).and_then(FieldValue::as_text_array)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(String, FieldValue),
    ArrayContains(String, String),
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: &str) -> Self {
        self.clauses
            .push(Clause::ArrayContains(field.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, expected) => fields.get(field) == Some(expected),
            Clause::ArrayContains(field, needle) => fields
                .get(field)
                .and_then(FieldValue::as_text_array)
                .is_some_and(|items| items.iter().any(|item| item == needle)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Filter,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub limit_to_last: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filter: Filter::new(),
            order_by: None,
            limit: None,
            limit_to_last: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending,
        });
        self
    }

    /// Keeps the first `n` results.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Keeps the trailing `n` results in query order.
    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit_to_last = Some(n);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
}

/// One delivery from a continuous query subscription.
pub type QuerySnapshot = Result<Vec<Document>, StoreError>;
/// One delivery from a continuous single-document subscription.
pub type DocumentSnapshot = Result<Option<Document>, StoreError>;

/// Cancel handle for a continuous subscription.
///
/// Cancellation is idempotent and takes effect before `cancel` returns: the
/// store checks the alive flag before every delivery, and `Subscription`
/// re-checks it after every receive, so a cancelled subscription never
/// yields another snapshot.
#[derive(Debug, Clone)]
pub struct SubscriptionGuard {
    alive: Arc<AtomicBool>,
}

impl SubscriptionGuard {
    pub(crate) fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn cancel(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// A continuous stream of snapshots whose lifetime is bounded by its owner:
/// dropping the subscription cancels it.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    guard: SubscriptionGuard,
}

impl<T> Subscription<T> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<T>, guard: SubscriptionGuard) -> Self {
        Self { receiver, guard }
    }

    /// A cloneable cancel handle, for owners that hand the subscription
    /// itself to a forwarding task.
    pub fn guard(&self) -> SubscriptionGuard {
        self.guard.clone()
    }

    pub async fn recv(&mut self) -> Option<T> {
        if !self.guard.is_alive() {
            return None;
        }
        let item = self.receiver.recv().await?;
        if !self.guard.is_alive() {
            return None;
        }
        Some(item)
    }

    pub fn try_recv(&mut self) -> Option<T> {
        if !self.guard.is_alive() {
            return None;
        }
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.guard.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.guard.is_alive() {
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

pub type QuerySubscription = Subscription<QuerySnapshot>;
pub type DocumentSubscription = Subscription<DocumentSnapshot>;

/// Capability contract of the remote document store.
///
/// Continuous subscriptions deliver a full snapshot of their result set on
/// registration and again after every change; transport faults arrive as
/// `Err` deliveries on the same stream rather than tearing it down.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// One-shot query.
    async fn get_once(&self, query: Query) -> Result<Vec<Document>, StoreError>;

    /// Continuous query subscription.
    fn subscribe_query(&self, query: Query) -> QuerySubscription;

    /// Continuous subscription to a single document, which may not exist
    /// yet.
    fn subscribe_document(&self, collection: &str, id: &str) -> DocumentSubscription;

    /// Appends a document and returns its store-assigned id.
    async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// Writes fields of an addressed document. With `merge` the document is
    /// created if missing and the given fields are merged in; without it the
    /// document must exist and only the given fields are replaced.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError>;
}
