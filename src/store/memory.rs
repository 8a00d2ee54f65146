//! In-memory store used by local workflows and tests
//!
//! Behaves like the production backend in the ways the engine depends
//! on: optimistic versioning, store-managed phase and finalizers,
//! finalizer-gated destruction and ordered watch delivery. State can be
//! dumped to and loaded from a YAML snapshot so CLI runs persist across
//! invocations.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::resource::{Resource, ResourceKind, ResourcePhase};
use crate::store::{LabelSelector, Store, StoreError, WatchEvent, WatchOptions};

struct Watcher {
    kind: ResourceKind,
    selector: LabelSelector,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Inner {
    resources: BTreeMap<(ResourceKind, String), Resource>,
    watchers: Vec<Watcher>,
}

/// Thread-safe in-memory resource store
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a YAML snapshot produced by [`Self::snapshot`].
    ///
    /// An empty document yields an empty store.
    pub fn from_snapshot(yaml: &str) -> Result<Self, crate::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let resources: Vec<Resource> = serde_yaml::from_str(yaml)?;
        let store = Self::new();
        for resource in resources {
            store.seed(resource);
        }
        Ok(store)
    }

    /// Dump every resource, ordered by kind and ID
    pub fn snapshot(&self) -> Vec<Resource> {
        self.lock().resources.values().cloned().collect()
    }

    /// Insert or replace a resource, preserving its metadata as given.
    ///
    /// Bypasses lifecycle checks; meant for loading snapshots and
    /// seeding test fixtures. Versions below 1 are raised to 1 so later
    /// updates have a valid baseline.
    pub fn seed(&self, resource: Resource) {
        let mut resource = resource;
        if resource.metadata.version == 0 {
            resource.metadata.version = 1;
        }
        if resource.metadata.created.is_none() {
            resource.metadata.created = Some(Utc::now());
        }
        let mut inner = self.lock();
        let key = resource.key();
        let kind = resource.kind();
        let labels = resource.metadata.labels.clone();
        let event = WatchEvent::Created(resource.clone());
        inner.resources.insert(key, resource);
        dispatch(&mut inner, kind, &labels, &event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }
}

/// Fan an event out to matching watchers, dropping dead ones.
fn dispatch(
    inner: &mut Inner,
    kind: ResourceKind,
    labels: &BTreeMap<String, String>,
    event: &WatchEvent,
) {
    inner.watchers.retain(|watcher| {
        if watcher.kind != kind || !watcher.selector.matches(labels) {
            return true;
        }
        watcher.tx.send(event.clone()).is_ok()
    });
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<Resource>, StoreError> {
        let inner = self.lock();
        Ok(inner.resources.get(&(kind, id.to_string())).cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
    ) -> Result<Vec<Resource>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .resources
            .values()
            .filter(|r| r.kind() == kind && selector.matches(&r.metadata.labels))
            .cloned()
            .collect())
    }

    async fn create(&self, resource: Resource) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = resource.key();
        if inner.resources.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.0,
                id: key.1,
            });
        }

        let now = Utc::now();
        let mut resource = resource;
        resource.metadata.version = 1;
        resource.metadata.phase = ResourcePhase::Running;
        resource.metadata.created = Some(now);
        resource.metadata.updated = Some(now);

        let kind = resource.kind();
        let labels = resource.metadata.labels.clone();
        let event = WatchEvent::Created(resource.clone());
        inner.resources.insert(key, resource);
        dispatch(&mut inner, kind, &labels, &event);
        Ok(())
    }

    async fn update(&self, resource: Resource) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = resource.key();
        let current = match inner.resources.get(&key) {
            Some(current) => current,
            None => return Err(StoreError::not_found(key.0, key.1)),
        };
        if resource.metadata.version != current.metadata.version {
            return Err(StoreError::VersionConflict {
                kind: key.0,
                id: key.1,
                expected: current.metadata.version,
                found: resource.metadata.version,
            });
        }

        // Phase, finalizers, owner and creation time are store-managed;
        // the stored values win over whatever the writer carried.
        let mut next = resource;
        next.metadata.version = current.metadata.version + 1;
        next.metadata.phase = current.metadata.phase;
        next.metadata.finalizers = current.metadata.finalizers.clone();
        next.metadata.owner = current.metadata.owner.clone();
        next.metadata.created = current.metadata.created;
        next.metadata.updated = Some(Utc::now());

        let kind = next.kind();
        let labels = next.metadata.labels.clone();
        let event = WatchEvent::Updated(next.clone());
        inner.resources.insert(key, next);
        dispatch(&mut inner, kind, &labels, &event);
        Ok(())
    }

    async fn teardown(&self, kind: ResourceKind, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = (kind, id.to_string());
        let current = match inner.resources.get_mut(&key) {
            Some(current) => current,
            None => return Err(StoreError::not_found(kind, id)),
        };
        if current.metadata.phase == ResourcePhase::TearingDown {
            return Ok(());
        }

        current.metadata.phase = ResourcePhase::TearingDown;
        current.metadata.version += 1;
        current.metadata.updated = Some(Utc::now());

        let labels = current.metadata.labels.clone();
        let event = WatchEvent::Updated(current.clone());
        dispatch(&mut inner, kind, &labels, &event);
        Ok(())
    }

    async fn destroy(&self, kind: ResourceKind, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = (kind, id.to_string());
        let current = match inner.resources.get(&key) {
            Some(current) => current,
            None => return Err(StoreError::not_found(kind, id)),
        };
        if !current.metadata.finalizers.is_empty() {
            return Err(StoreError::FinalizersPresent {
                kind,
                id: id.to_string(),
            });
        }

        let removed = inner
            .resources
            .remove(&key)
            .ok_or_else(|| StoreError::not_found(kind, id))?;
        let labels = removed.metadata.labels.clone();
        let event = WatchEvent::Destroyed(removed);
        dispatch(&mut inner, kind, &labels, &event);
        Ok(())
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        options: WatchOptions,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<(), StoreError> {
        // Watchers enqueue into an unbounded channel under the store
        // lock, which keeps per-resource event order without ever
        // blocking a mutation on a slow consumer. A forwarder task
        // drains the queue into the caller's channel at its own pace.
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });

        let mut inner = self.lock();
        if options.bootstrap {
            let mut count = 0usize;
            for resource in inner.resources.values() {
                if resource.kind() != kind || !options.selector.matches(&resource.metadata.labels)
                {
                    continue;
                }
                let _ = tx.send(WatchEvent::Created(resource.clone()));
                count += 1;
            }
            let _ = tx.send(WatchEvent::Bootstrapped);
            debug!(%kind, count, "watch bootstrapped");
        }
        inner.watchers.push(Watcher {
            kind,
            selector: options.selector,
            tx,
        });
        Ok(())
    }

    async fn add_finalizer(
        &self,
        kind: ResourceKind,
        id: &str,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = (kind, id.to_string());
        let current = match inner.resources.get_mut(&key) {
            Some(current) => current,
            None => return Err(StoreError::not_found(kind, id)),
        };
        if !current.metadata.finalizers.insert(finalizer.to_string()) {
            return Ok(());
        }
        current.metadata.version += 1;
        current.metadata.updated = Some(Utc::now());

        let labels = current.metadata.labels.clone();
        let event = WatchEvent::Updated(current.clone());
        dispatch(&mut inner, kind, &labels, &event);
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        kind: ResourceKind,
        id: &str,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = (kind, id.to_string());
        let current = match inner.resources.get_mut(&key) {
            Some(current) => current,
            None => return Err(StoreError::not_found(kind, id)),
        };
        if !current.metadata.finalizers.remove(finalizer) {
            return Ok(());
        }
        current.metadata.version += 1;
        current.metadata.updated = Some(Utc::now());

        let labels = current.metadata.labels.clone();
        let event = WatchEvent::Updated(current.clone());
        dispatch(&mut inner, kind, &labels, &event);
        Ok(())
    }
}
