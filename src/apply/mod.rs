//! Change set execution against the live store
//!
//! Creates and updates are plain acknowledged writes in change set
//! order. Destroys run phase by phase: every resource in the phase is
//! moved to teardown, then the executor watches the phase's kinds and
//! issues the final destroy for each resource the moment its phase is
//! tearing-down and its finalizer set has drained. A later phase never
//! starts while an earlier phase still has a pending resource.
//!
//! Nothing is rolled back on failure; an error aborts the remaining
//! work and already-applied steps stay applied. Re-running the sync is
//! the recovery path, which is safe because every step is idempotent
//! against the state it produced.

use std::collections::{BTreeSet, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::diff::ChangeSet;
use crate::resource::{Resource, ResourceData, ResourceKind, ResourcePhase};
use crate::store::{LabelSelector, Store, WatchEvent, WatchOptions};
use crate::{Error, LABEL_CLUSTER, LABEL_MACHINE};

/// Buffer for the watch channel feeding a destroy phase
const WATCH_BUFFER: usize = 128;

/// Options controlling how a change set is applied
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyOptions {
    /// Log what would happen without touching the store
    pub dry_run: bool,
}

/// Applies change sets against a store
pub struct Executor<'a> {
    store: &'a dyn Store,
    cancel: CancellationToken,
}

impl<'a> Executor<'a> {
    /// Create an executor that runs to completion or error
    pub fn new(store: &'a dyn Store) -> Self {
        Self::with_cancellation(store, CancellationToken::new())
    }

    /// Create an executor that aborts with [`Error::Canceled`] once the
    /// token is cancelled
    pub fn with_cancellation(store: &'a dyn Store, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    /// Apply a change set: creates, then updates, then destroy phases.
    pub async fn apply(&self, changes: &ChangeSet, options: ApplyOptions) -> Result<(), Error> {
        if changes.is_empty() {
            info!(cluster = %changes.cluster, "nothing to apply");
            return Ok(());
        }
        if options.dry_run {
            info!(
                cluster = %changes.cluster,
                create = changes.create.len(),
                update = changes.update.len(),
                destroy = changes.destroy_count(),
                "dry run, store left untouched"
            );
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        for resource in &changes.create {
            self.store.create(resource.clone()).await?;
            info!(resource = %resource, "created");
        }

        for pair in &changes.update {
            self.store.update(pair.new.clone()).await?;
            info!(resource = %pair.new, "updated");
        }

        let phases = changes.destroy.len();
        for (index, phase) in changes.destroy.iter().enumerate() {
            debug!(
                phase = index + 1,
                phases,
                resources = phase.len(),
                "starting destroy phase"
            );
            self.destroy_phase(phase).await?;
        }

        Ok(())
    }

    /// Tear down and destroy one phase, waiting for finalizer drains.
    ///
    /// The pending set tracks identities still alive; watch events move
    /// it forward. Bootstrapped watches close the gap between issuing
    /// teardowns and subscribing: anything that drained in between is
    /// replayed as a bootstrap `Created`, and anything already gone is
    /// dropped from the pending set once every kind has bootstrapped.
    async fn destroy_phase(&self, phase: &[Resource]) -> Result<(), Error> {
        let mut pending: HashSet<(ResourceKind, String)> = HashSet::new();

        for resource in phase {
            match self.store.teardown(resource.kind(), resource.id()).await {
                Ok(()) => {
                    info!(resource = %resource, "tearing down");
                    pending.insert(resource.key());
                }
                Err(err) if err.is_not_found() => {
                    debug!(resource = %resource, "already gone");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if pending.is_empty() {
            return Ok(());
        }

        // One watch per kind in the phase, all feeding one channel. The
        // watches deliberately cover the whole kind: resources in a
        // synthetic phase are not always labeled with the cluster, and
        // the pending set filters better than any selector could.
        let kinds: BTreeSet<ResourceKind> = pending.iter().map(|(kind, _)| *kind).collect();
        let mut bootstraps = kinds.len();
        let (tx, mut rx) = mpsc::channel(WATCH_BUFFER);
        for kind in kinds {
            self.store
                .watch(
                    kind,
                    WatchOptions {
                        bootstrap: true,
                        selector: LabelSelector::any(),
                    },
                    tx.clone(),
                )
                .await?;
        }
        drop(tx);

        let mut seen: HashSet<(ResourceKind, String)> = HashSet::new();

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Canceled),
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => return Err(Error::watch("watch channel closed mid-teardown")),
                },
            };

            match event {
                WatchEvent::Created(resource) | WatchEvent::Updated(resource) => {
                    if !pending.contains(&resource.key()) {
                        continue;
                    }
                    seen.insert(resource.key());
                    if resource.metadata.phase == ResourcePhase::TearingDown
                        && resource.metadata.finalizers.is_empty()
                    {
                        match self.store.destroy(resource.kind(), resource.id()).await {
                            Ok(()) => {}
                            Err(err) if err.is_not_found() => {}
                            Err(err) => return Err(err.into()),
                        }
                    }
                }
                WatchEvent::Destroyed(resource) => {
                    if pending.remove(&resource.key()) {
                        info!(resource = %resource, "destroyed");
                        if pending.is_empty() {
                            return Ok(());
                        }
                    }
                }
                WatchEvent::Bootstrapped => {
                    bootstraps -= 1;
                    if bootstraps == 0 {
                        // every kind replayed its contents; pending
                        // entries never seen were gone before we
                        // subscribed
                        pending.retain(|key| {
                            let alive = seen.contains(key);
                            if !alive {
                                debug!(kind = %key.0, id = %key.1, "gone before watch");
                            }
                            alive
                        });
                        if pending.is_empty() {
                            return Ok(());
                        }
                    }
                }
                WatchEvent::Errored(message) => return Err(Error::watch(message)),
            }
        }
    }
}

/// Extend a change set with the destruction of disconnected machines.
///
/// Machine links and the config patches scoped to their machines are
/// not part of the compiled graph, so a plain teardown leaves them
/// behind. This discovers every disconnected link labeled with the
/// cluster, collects the patches scoped to those machines, and prepends
/// two synthetic phases (links first, then patches) ahead of the
/// standard ones. Patches already queued by the standard phases are
/// not queued twice, and controller-derived patches stay untouched.
pub async fn with_cascading_machine_destruction(
    store: &dyn Store,
    mut changes: ChangeSet,
) -> Result<ChangeSet, Error> {
    let selector = LabelSelector::matching(LABEL_CLUSTER, &changes.cluster);
    let links = store.list(ResourceKind::MachineLink, &selector).await?;

    let disconnected: Vec<Resource> = links
        .into_iter()
        .filter(|link| match &link.spec {
            ResourceData::MachineLink(spec) => !spec.connected,
            _ => false,
        })
        .collect();

    if disconnected.is_empty() {
        return Ok(changes);
    }

    let mut queued: HashSet<(ResourceKind, String)> = changes
        .destroy
        .iter()
        .flatten()
        .map(Resource::key)
        .collect();

    let mut patches = Vec::new();
    for link in &disconnected {
        let scoped = store
            .list(
                ResourceKind::ConfigPatch,
                &LabelSelector::matching(LABEL_MACHINE, link.id()),
            )
            .await?;
        for patch in scoped {
            if !patch.metadata.owner.is_empty() {
                warn!(resource = %patch, owner = %patch.metadata.owner, "leaving controller-derived patch to its owner");
                continue;
            }
            if queued.insert(patch.key()) {
                patches.push(patch);
            }
        }
    }

    info!(
        cluster = %changes.cluster,
        machines = disconnected.len(),
        patches = patches.len(),
        "cascading destruction of disconnected machines"
    );

    let mut phases = Vec::with_capacity(changes.destroy.len() + 2);
    phases.push(disconnected);
    if !patches.is_empty() {
        phases.push(patches);
    }
    phases.append(&mut changes.destroy);
    changes.destroy = phases;
    Ok(changes)
}
