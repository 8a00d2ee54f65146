//! Resource store abstraction and implementations
//!
//! The engine talks to cluster state exclusively through the [`Store`]
//! trait: point reads, label-filtered lists, writes with optimistic
//! concurrency, the two-step teardown/destroy lifecycle and label-scoped
//! watches. Production deployments back this with the management plane
//! API; local workflows and tests use the bundled [`InMemoryStore`].

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::resource::{Resource, ResourceKind};

pub use memory::InMemoryStore;

/// Errors returned by store operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The addressed resource does not exist
    #[error("resource {kind}/{id} not found")]
    NotFound {
        /// Kind of the missing resource
        kind: ResourceKind,
        /// ID of the missing resource
        id: String,
    },

    /// A resource with the same kind and ID already exists
    #[error("resource {kind}/{id} already exists")]
    AlreadyExists {
        /// Kind of the conflicting resource
        kind: ResourceKind,
        /// ID of the conflicting resource
        id: String,
    },

    /// The write carried a stale version
    #[error("version conflict on {kind}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Kind of the contested resource
        kind: ResourceKind,
        /// ID of the contested resource
        id: String,
        /// Version currently stored
        expected: u64,
        /// Version the write carried
        found: u64,
    },

    /// Destruction was attempted while finalizers are still attached
    #[error("resource {kind}/{id} still has finalizers")]
    FinalizersPresent {
        /// Kind of the blocked resource
        kind: ResourceKind,
        /// ID of the blocked resource
        id: String,
    },

    /// Backend-specific failure
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a not-found error
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the error means the resource is simply absent.
    ///
    /// Teardown and destroy treat absence as success: the goal state is
    /// "gone", and something else getting there first is not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Label equality selector used to scope lists and watches
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching every resource
    pub fn any() -> Self {
        Self::default()
    }

    /// Selector requiring one label equality
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::any().and(key, value)
    }

    /// Add another label equality requirement
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.insert(key.into(), value.into());
        self
    }

    /// True when the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when the given label set satisfies every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

/// Event delivered on a watch channel
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WatchEvent {
    /// All pre-existing resources have been delivered as `Created`
    /// events; everything after this is live
    Bootstrapped,
    /// A resource matching the watch appeared (or pre-existed, before
    /// the bootstrap marker)
    Created(Resource),
    /// A matching resource changed, including phase and finalizer moves
    Updated(Resource),
    /// A matching resource left the store; carries its last state
    Destroyed(Resource),
    /// The watch failed server-side and will deliver nothing further
    Errored(String),
}

/// Options controlling a watch subscription
#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
    /// Deliver current state as `Created` events, then `Bootstrapped`,
    /// before streaming live changes
    pub bootstrap: bool,

    /// Only deliver events for resources matching this selector
    pub selector: LabelSelector,
}

/// Typed access to cluster state.
///
/// Implementations reject destruction while finalizers are attached and
/// deliver watch events for one resource in the order the mutations
/// happened.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one resource; `Ok(None)` when it does not exist
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<Resource>, StoreError>;

    /// List resources of one kind matching the selector
    async fn list(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
    ) -> Result<Vec<Resource>, StoreError>;

    /// Create a resource; fails when the `(kind, id)` pair exists
    async fn create(&self, resource: Resource) -> Result<(), StoreError>;

    /// Replace content of an existing resource.
    ///
    /// The incoming version must equal the stored version or the write
    /// is rejected with [`StoreError::VersionConflict`]. Phase and
    /// finalizers are store-managed and keep their stored values.
    async fn update(&self, resource: Resource) -> Result<(), StoreError>;

    /// Request teardown: move the resource to the tearing-down phase.
    ///
    /// Idempotent for resources already tearing down.
    async fn teardown(&self, kind: ResourceKind, id: &str) -> Result<(), StoreError>;

    /// Remove a resource; fails while finalizers are attached
    async fn destroy(&self, kind: ResourceKind, id: &str) -> Result<(), StoreError>;

    /// Subscribe to events for one kind on the given channel.
    ///
    /// Returns once the subscription is established; events flow until
    /// the receiver is dropped.
    async fn watch(
        &self,
        kind: ResourceKind,
        options: WatchOptions,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<(), StoreError>;

    /// Attach a finalizer to a resource, blocking its destruction
    async fn add_finalizer(
        &self,
        kind: ResourceKind,
        id: &str,
        finalizer: &str,
    ) -> Result<(), StoreError>;

    /// Release a finalizer previously attached to a resource
    async fn remove_finalizer(
        &self,
        kind: ResourceKind,
        id: &str,
        finalizer: &str,
    ) -> Result<(), StoreError>;
}
