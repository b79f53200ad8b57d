//! In-process document store.
//!
//! # Responsibilities
//! - Implement `DocumentStore` over a path-keyed map
//! - Deliver change notifications to live subscribers
//! - Inject faults (queued failures, latency) for tests and demos

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::store::types::{
    CollectionRef, Direction, DocumentRef, DocumentSnapshot, Query, SetOptions, SnapshotMeta,
    StoreError, StoreErrorCode, StoreResult, SubscriptionTarget,
};
use crate::store::{ChangeCallback, ChangeSet, DocumentStore, ErrorCallback, ListenerRegistration};

struct Subscriber {
    id: u64,
    target: SubscriptionTarget,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, Value>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    pending_failures: VecDeque<StoreError>,
    latency: Duration,
    calls: u64,
}

/// A notification collected under the lock and delivered after it is released.
type Delivery = (ChangeCallback, ChangeSet);

/// In-memory `DocumentStore` with fault injection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` operations fail with `error`. A subscription that
    /// draws a failure reports it through `on_error` without ever opening.
    pub fn fail_next(&self, count: usize, error: StoreError) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.pending_failures.push_back(error.clone());
        }
    }

    /// Delay every operation by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of data operations attempted so far (subscriptions excluded).
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Break every live subscription on `target`, as a dropped stream would.
    pub fn fail_subscriptions(&self, target: &SubscriptionTarget, error: StoreError) {
        let broken: Vec<ErrorCallback> = {
            let mut inner = self.lock();
            let (broken, kept): (Vec<_>, Vec<_>) = inner
                .subscribers
                .drain(..)
                .partition(|s| &s.target == target);
            inner.subscribers = kept;
            broken.into_iter().map(|s| s.on_error).collect()
        };

        for on_error in broken {
            on_error(error.clone());
        }
    }

    /// Seed a document without going through fault injection or latency.
    pub fn insert(&self, reference: &DocumentRef, data: Value) {
        let deliveries = {
            let mut inner = self.lock();
            inner.documents.insert(reference.path().to_string(), data);
            inner.deliveries_for(reference)
        };
        deliver(deliveries);
    }

    async fn before_call(&self) -> StoreResult<()> {
        let (latency, failure) = {
            let mut inner = self.lock();
            inner.calls += 1;
            (inner.latency, inner.pending_failures.pop_front())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn write(&self, reference: &DocumentRef, mutate: impl FnOnce(&mut BTreeMap<String, Value>) -> StoreResult<()>) -> StoreResult<()> {
        let deliveries = {
            let mut inner = self.lock();
            mutate(&mut inner.documents)?;
            inner.deliveries_for(reference)
        };
        deliver(deliveries);
        Ok(())
    }
}

impl Inner {
    fn snapshot(&self, reference: &DocumentRef) -> DocumentSnapshot {
        DocumentSnapshot {
            reference: reference.clone(),
            data: self.documents.get(reference.path()).cloned(),
            meta: SnapshotMeta::default(),
        }
    }

    fn collection(&self, collection: &CollectionRef) -> Vec<DocumentSnapshot> {
        self.documents
            .iter()
            .filter(|(path, _)| DocumentRef::new(path.as_str()).parent() == *collection)
            .map(|(path, data)| DocumentSnapshot {
                reference: DocumentRef::new(path.as_str()),
                data: Some(data.clone()),
                meta: SnapshotMeta::default(),
            })
            .collect()
    }

    fn change_set(&self, target: &SubscriptionTarget) -> ChangeSet {
        match target {
            SubscriptionTarget::Document(reference) => ChangeSet::Document(self.snapshot(reference)),
            SubscriptionTarget::Collection(collection) => {
                ChangeSet::Collection(self.collection(collection))
            }
        }
    }

    fn deliveries_for(&self, changed: &DocumentRef) -> Vec<Delivery> {
        let parent = changed.parent();
        self.subscribers
            .iter()
            .filter(|s| match &s.target {
                SubscriptionTarget::Document(reference) => reference == changed,
                SubscriptionTarget::Collection(collection) => *collection == parent,
            })
            .map(|s| (s.on_change.clone(), self.change_set(&s.target)))
            .collect()
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for (on_change, change) in deliveries {
        on_change(change, SnapshotMeta::default());
    }
}

fn require_object(data: Value) -> StoreResult<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::new(
            StoreErrorCode::InvalidArgument,
            format!("document data must be an object, got {}", other),
        )),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn run_query(mut docs: Vec<DocumentSnapshot>, query: &Query) -> Vec<DocumentSnapshot> {
    docs.retain(|doc| {
        query.filters.iter().all(|(field, expected)| {
            doc.data.as_ref().and_then(|d| d.get(field)) == Some(expected)
        })
    });

    if let Some((field, direction)) = &query.order_by {
        docs.sort_by(|a, b| {
            let ord = compare_values(
                a.data.as_ref().and_then(|d| d.get(field)),
                b.data.as_ref().and_then(|d| d.get(field)),
            );
            match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });
    }

    if let Some(limit) = query.limit {
        docs.truncate(limit);
    }
    docs
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, reference: &DocumentRef) -> StoreResult<DocumentSnapshot> {
        self.before_call().await?;
        Ok(self.lock().snapshot(reference))
    }

    async fn get_many(&self, query: &Query) -> StoreResult<Vec<DocumentSnapshot>> {
        self.before_call().await?;
        let docs = self.lock().collection(&query.collection);
        Ok(run_query(docs, query))
    }

    async fn set(&self, reference: &DocumentRef, data: Value, options: SetOptions) -> StoreResult<()> {
        self.before_call().await?;
        let incoming = require_object(data)?;
        self.write(reference, |docs| {
            if options.merge {
                if let Some(Value::Object(existing)) = docs.get_mut(reference.path()) {
                    existing.extend(incoming);
                    return Ok(());
                }
            }
            docs.insert(reference.path().to_string(), Value::Object(incoming));
            Ok(())
        })
    }

    async fn update(&self, reference: &DocumentRef, partial: Value) -> StoreResult<()> {
        self.before_call().await?;
        let incoming = require_object(partial)?;
        self.write(reference, |docs| match docs.get_mut(reference.path()) {
            Some(Value::Object(existing)) => {
                existing.extend(incoming);
                Ok(())
            }
            _ => Err(StoreError::not_found(reference)),
        })
    }

    async fn delete(&self, reference: &DocumentRef) -> StoreResult<()> {
        self.before_call().await?;
        self.write(reference, |docs| {
            docs.remove(reference.path());
            Ok(())
        })
    }

    async fn add(&self, collection: &CollectionRef, data: Value) -> StoreResult<DocumentRef> {
        self.before_call().await?;
        let incoming = require_object(data)?;
        let reference = collection.doc(uuid::Uuid::new_v4().simple().to_string());
        self.write(&reference, |docs| {
            docs.insert(reference.path().to_string(), Value::Object(incoming));
            Ok(())
        })?;
        Ok(reference)
    }

    fn subscribe(
        &self,
        target: &SubscriptionTarget,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> ListenerRegistration {
        let (id, initial) = {
            let mut inner = self.lock();
            // A queued failure means the stream never opens.
            if let Some(error) = inner.pending_failures.pop_front() {
                drop(inner);
                on_error(error);
                return ListenerRegistration::new(|| {});
            }
            let id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            inner.subscribers.push(Subscriber {
                id,
                target: target.clone(),
                on_change: on_change.clone(),
                on_error,
            });
            (id, inner.change_set(target))
        };

        on_change(initial, SnapshotMeta::default());

        let inner = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.subscribers.retain(|s| s.id != id);
            }
        })
    }
}
