//! Remote document store contract.
//!
//! # Data Flow
//! ```text
//! Gateway facade
//!     → DocumentStore (get / get_many / set / update / delete / add)
//!     → subscribe (change notifications, errors)
//!
//! Implementations:
//!     → memory.rs (in-process store with fault injection)
//!     → remote SDK adapters live outside this crate
//! ```
//!
//! # Design Decisions
//! - Every call returns a single outcome or a `StoreError`
//! - Document data is schemaless `serde_json::Value`
//! - Subscriptions report errors through a callback, never by panicking

pub mod memory;
pub mod types;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryStore;
pub use types::{
    CollectionRef, Direction, DocumentRef, DocumentSnapshot, Query, SetOptions, SnapshotMeta,
    StoreError, StoreErrorCode, StoreResult, SubscriptionTarget,
};

/// Payload delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    Document(DocumentSnapshot),
    Collection(Vec<DocumentSnapshot>),
}

/// Invoked with fresh data on every change.
pub type ChangeCallback = Arc<dyn Fn(ChangeSet, SnapshotMeta) + Send + Sync>;

/// Invoked when the subscription stream fails. The stream is dead afterwards.
pub type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Handle returned by `subscribe`; call `unsubscribe` to stop notifications.
pub struct ListenerRegistration {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Primitives consumed from the remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, reference: &DocumentRef) -> StoreResult<DocumentSnapshot>;

    async fn get_many(&self, query: &Query) -> StoreResult<Vec<DocumentSnapshot>>;

    async fn set(&self, reference: &DocumentRef, data: Value, options: SetOptions) -> StoreResult<()>;

    async fn update(&self, reference: &DocumentRef, partial: Value) -> StoreResult<()>;

    async fn delete(&self, reference: &DocumentRef) -> StoreResult<()>;

    async fn add(&self, collection: &CollectionRef, data: Value) -> StoreResult<DocumentRef>;

    fn subscribe(
        &self,
        target: &SubscriptionTarget,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> ListenerRegistration;
}
