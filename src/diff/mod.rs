//! Change detection between a compiled template and the live cluster
//!
//! The diff walks every compiled kind, pairs target resources with
//! their live counterparts by `(kind, id)`, and buckets the outcome
//! into creates, updates and destroys. Content comparison ignores
//! store-managed bookkeeping (version, phase, finalizers, timestamps),
//! so a freshly compiled resource matches its stored copy when nothing
//! the user controls has changed.
//!
//! Two asymmetries keep repeated syncs stable:
//!
//! - resources derived by a controller (non-empty `owner`) are never
//!   diffed or destroyed; the engine only manages what it created
//! - a MachineSet's bootstrap spec is write-once, so a live value is
//!   carried into the target when the template no longer repeats it
//!
//! Destroys are partitioned into phases by [`ResourceKind::destroy_rank`]
//! so dependents go before the things they depend on.

mod render;

pub use render::render;

use std::collections::BTreeMap;

use tracing::debug;

use crate::resource::{Resource, ResourceData, ResourceKind, COMPILED_KINDS};
use crate::store::{LabelSelector, Store};
use crate::{Error, LABEL_CLUSTER};

/// A live resource and the compiled resource replacing it
#[derive(Clone, Debug, PartialEq)]
pub struct ResourcePair {
    /// The stored copy
    pub old: Resource,
    /// The compiled copy, with version and bootstrap spec carried over
    pub new: Resource,
}

/// Difference between a compiled template and the live cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    /// Cluster the change set applies to
    pub cluster: String,
    /// Resources to create, in compilation order
    pub create: Vec<Resource>,
    /// Resources to update, in compilation order
    pub update: Vec<ResourcePair>,
    /// Resources to destroy, one phase per destroy rank, dependents first
    pub destroy: Vec<Vec<Resource>>,
}

impl ChangeSet {
    /// True when applying this change set would do nothing
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.update.is_empty()
            && self.destroy.iter().all(Vec::is_empty)
    }

    /// Total number of resources queued for destruction
    pub fn destroy_count(&self) -> usize {
        self.destroy.iter().map(Vec::len).sum()
    }
}

/// Diff compiled resources against the live state of one cluster.
///
/// Live state is every resource of a compiled kind labeled with the
/// cluster's name.
pub async fn diff(
    store: &dyn Store,
    cluster: &str,
    target: &[Resource],
) -> Result<ChangeSet, Error> {
    let selector = LabelSelector::matching(LABEL_CLUSTER, cluster);

    let mut live = Vec::new();
    for kind in COMPILED_KINDS {
        live.extend(store.list(kind, &selector).await?);
    }

    Ok(compute(cluster, target, live))
}

/// Pure diff between target and live resources.
pub fn compute(cluster: &str, target: &[Resource], live: Vec<Resource>) -> ChangeSet {
    let mut live_by_key: BTreeMap<(ResourceKind, String), Resource> = BTreeMap::new();
    for resource in live {
        if !resource.metadata.owner.is_empty() {
            debug!(
                resource = %resource,
                owner = %resource.metadata.owner,
                "skipping controller-derived resource"
            );
            continue;
        }
        live_by_key.insert(resource.key(), resource);
    }

    let mut create = Vec::new();
    let mut update = Vec::new();

    for resource in target {
        match live_by_key.remove(&resource.key()) {
            None => create.push(resource.clone()),
            Some(old) => {
                let mut new = resource.clone();
                carry_forward(&old, &mut new);
                if !new.content_eq(&old) {
                    update.push(ResourcePair { old, new });
                }
            }
        }
    }

    // whatever the template no longer produces gets destroyed, phased
    // by rank so nodes and patches go before their machine set and the
    // machine set before the cluster
    let mut phases: Vec<Vec<Resource>> = vec![Vec::new(); ResourceKind::DESTROY_RANKS];
    for (_, resource) in live_by_key {
        phases[usize::from(resource.kind().destroy_rank())].push(resource);
    }

    ChangeSet {
        cluster: cluster.to_string(),
        create,
        update,
        destroy: phases.into_iter().filter(|phase| !phase.is_empty()).collect(),
    }
}

fn carry_forward(old: &Resource, new: &mut Resource) {
    new.metadata.version = old.metadata.version;

    if let (ResourceData::MachineSet(old_spec), ResourceData::MachineSet(new_spec)) =
        (&old.spec, &mut new.spec)
    {
        if new_spec.bootstrap_spec.is_none() {
            new_spec.bootstrap_spec = old_spec.bootstrap_spec.clone();
        }
    }
}
