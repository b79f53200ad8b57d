//! Document store types and error definitions.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::resilience::classifier::Classify;

/// Path of a collection, e.g. `users/42/expenses`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef(pub String);

impl CollectionRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Reference to a document inside this collection.
    pub fn doc(&self, id: impl AsRef<str>) -> DocumentRef {
        DocumentRef(format!("{}/{}", self.0, id.as_ref()))
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document, e.g. `users/42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef(pub String);

impl DocumentRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection holding this document (everything before the last segment).
    pub fn parent(&self) -> CollectionRef {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionRef(parent.to_string()),
            None => CollectionRef(String::new()),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata attached to every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Data was served from the local cache rather than the backend.
    pub from_cache: bool,
    /// Local writes have not been acknowledged by the backend yet.
    pub has_pending_writes: bool,
}

/// A document read at a point in time. `data` is `None` when it does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub reference: DocumentRef,
    pub data: Option<Value>,
    pub meta: SnapshotMeta,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// Sort direction for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// Collection query: equality filters, optional ordering and limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: CollectionRef,
    #[serde(default)]
    pub filters: Vec<(String, Value)>,
    #[serde(default)]
    pub order_by: Option<(String, Direction)>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Write options for `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOptions {
    /// Merge top-level fields into the existing document instead of replacing it.
    pub merge: bool,
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    Document(DocumentRef),
    Collection(CollectionRef),
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Document(r) => write!(f, "doc:{}", r),
            SubscriptionTarget::Collection(c) => write!(f, "collection:{}", c),
        }
    }
}

/// Backend error codes. Unrecognised codes are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreErrorCode {
    Unavailable,
    ResourceExhausted,
    Internal,
    Unknown,
    Aborted,
    Cancelled,
    DeadlineExceeded,
    PermissionDenied,
    Unauthenticated,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    #[serde(untagged)]
    Other(String),
}

impl StoreErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            StoreErrorCode::Unavailable => "unavailable",
            StoreErrorCode::ResourceExhausted => "resource-exhausted",
            StoreErrorCode::Internal => "internal",
            StoreErrorCode::Unknown => "unknown",
            StoreErrorCode::Aborted => "aborted",
            StoreErrorCode::Cancelled => "cancelled",
            StoreErrorCode::DeadlineExceeded => "deadline-exceeded",
            StoreErrorCode::PermissionDenied => "permission-denied",
            StoreErrorCode::Unauthenticated => "unauthenticated",
            StoreErrorCode::NotFound => "not-found",
            StoreErrorCode::AlreadyExists => "already-exists",
            StoreErrorCode::InvalidArgument => "invalid-argument",
            StoreErrorCode::FailedPrecondition => "failed-precondition",
            StoreErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", display_store_error(.code, .message))]
pub struct StoreError {
    pub code: Option<StoreErrorCode>,
    pub message: String,
}

fn display_store_error(code: &Option<StoreErrorCode>, message: &str) -> String {
    match (code, message.is_empty()) {
        (Some(code), false) => format!("[{}] {}", code, message),
        (Some(code), true) => format!("[{}]", code),
        (None, false) => message.to_string(),
        (None, true) => "unspecified store failure".to_string(),
    }
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Failure with a message but no code.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Failure carrying neither code nor message.
    pub fn opaque() -> Self {
        Self {
            code: None,
            message: String::new(),
        }
    }

    pub fn not_found(reference: &DocumentRef) -> Self {
        Self::new(StoreErrorCode::NotFound, format!("no document at '{}'", reference))
    }
}

impl Classify for StoreError {
    fn failure_code(&self) -> Option<&str> {
        self.code.as_ref().map(StoreErrorCode::as_str)
    }

    fn failure_message(&self) -> Option<Cow<'_, str>> {
        if self.message.is_empty() {
            None
        } else {
            Some(Cow::Borrowed(&self.message))
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
