//! Integration tests for cluster teardown
//!
//! These tests exercise the destroy half of the engine: phased,
//! finalizer-aware destruction of whole clusters, the cascading sweep
//! of disconnected machines, and isolation between clusters sharing a
//! store.

use std::sync::Arc;

use trellis::apply::{with_cascading_machine_destruction, ApplyOptions, Executor};
use trellis::diff::{self, ChangeSet};
use trellis::resource::{ConfigPatchSpec, MachineLinkSpec, Resource, ResourceData, ResourceKind};
use trellis::store::{InMemoryStore, Store};
use trellis::{LABEL_CLUSTER, LABEL_MACHINE};

use super::helpers::{snapshot_keys, spawn_releaser, sync, template, DEMO, OTHER};

// =============================================================================
// Test Fixtures
// =============================================================================

fn machine_link(cluster: &str, machine: &str, connected: bool) -> Resource {
    Resource::new(
        machine,
        ResourceData::MachineLink(MachineLinkSpec { connected }),
    )
    .with_label(LABEL_CLUSTER, cluster)
}

fn machine_patch(machine: &str, id: &str) -> Resource {
    Resource::new(
        id,
        ResourceData::ConfigPatch(ConfigPatchSpec {
            data: "machine: {}".into(),
        }),
    )
    .with_label(LABEL_MACHINE, machine)
}

/// Tear down a whole cluster the way `trellis delete` does: diff
/// against an empty target, optionally cascade, then apply.
async fn delete(store: &InMemoryStore, cluster: &str, cascade: bool) -> ChangeSet {
    let mut changes = diff::diff(store, cluster, &[]).await.unwrap();
    if cascade {
        changes = with_cascading_machine_destruction(store, changes)
            .await
            .unwrap();
    }
    Executor::new(store)
        .apply(&changes, ApplyOptions::default())
        .await
        .unwrap();
    changes
}

// =============================================================================
// Whole-Cluster Teardown Stories
// =============================================================================

/// Story: deleting a cluster destroys everything in three phases
///
/// Nodes and patches drain first, then the machine sets, then the
/// cluster root, so controllers can resolve references for as long as
/// dependents exist.
#[tokio::test]
async fn story_delete_empties_the_cluster_in_phases() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;

    let changes = delete(&store, "demo", false).await;

    assert_eq!(changes.destroy.len(), 3);
    let leaves: Vec<_> = changes.destroy[0].iter().map(Resource::id).collect();
    assert_eq!(
        leaves,
        vec!["m1", "m2", "m3", "000-m1-install-disk", "500-demo-ntp"]
    );
    let sets: Vec<_> = changes.destroy[1].iter().map(Resource::id).collect();
    assert_eq!(sets, vec!["demo-control-planes", "demo-workers"]);
    let roots: Vec<_> = changes.destroy[2].iter().map(Resource::id).collect();
    assert_eq!(roots, vec!["demo"]);

    assert!(store.snapshot().is_empty());
}

/// Story: finalizers held by controllers gate the teardown
///
/// Every machine set and the cluster itself carry controller
/// finalizers; the delete only completes because the stand-in
/// controllers release them once teardown begins.
#[tokio::test]
async fn story_finalizers_gate_the_teardown() {
    let store = Arc::new(InMemoryStore::new());
    sync(store.as_ref(), &template(DEMO)).await;

    for id in ["demo-control-planes", "demo-workers"] {
        store
            .add_finalizer(ResourceKind::MachineSet, id, "machine-set-controller")
            .await
            .unwrap();
    }
    store
        .add_finalizer(ResourceKind::Cluster, "demo", "cluster-controller")
        .await
        .unwrap();

    let set_controller = spawn_releaser(
        Arc::clone(&store),
        ResourceKind::MachineSet,
        "machine-set-controller",
    );
    let cluster_controller = spawn_releaser(
        Arc::clone(&store),
        ResourceKind::Cluster,
        "cluster-controller",
    );

    delete(store.as_ref(), "demo", false).await;
    assert!(store.snapshot().is_empty());

    set_controller.abort();
    cluster_controller.abort();
}

/// Story: deleting one cluster spares its neighbors
#[tokio::test]
async fn story_delete_spares_other_clusters() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;
    sync(&store, &template(OTHER)).await;

    delete(&store, "demo", false).await;

    assert_eq!(
        snapshot_keys(&store),
        vec![
            "Cluster/other",
            "MachineSet/other-control-planes",
            "MachineSet/other-workers",
            "MachineSetNode/o1",
            "MachineSetNode/o2",
        ]
    );
}

// =============================================================================
// Cascading Machine Destruction Stories
// =============================================================================

/// Story: a cascading delete sweeps disconnected machines
///
/// Disconnected machine links and the user patches scoped to their
/// machines lead the teardown; connected links and controller-derived
/// patches survive it.
#[tokio::test]
async fn story_cascading_delete_sweeps_disconnected_machines() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;
    store.seed(machine_link("demo", "machine-a", false));
    store.seed(machine_link("demo", "machine-b", true));
    store.seed(machine_patch("machine-a", "400-machine-a-tuning"));
    store.seed(
        machine_patch("machine-a", "700-machine-a-derived").with_owner("schematic-controller"),
    );

    let changes = delete(&store, "demo", true).await;

    assert_eq!(changes.destroy.len(), 5);
    let lead: Vec<_> = changes.destroy[0].iter().map(Resource::id).collect();
    assert_eq!(lead, vec!["machine-a"]);
    let swept: Vec<_> = changes.destroy[1].iter().map(Resource::id).collect();
    assert_eq!(swept, vec!["400-machine-a-tuning"]);

    assert_eq!(
        snapshot_keys(&store),
        vec!["ConfigPatch/700-machine-a-derived", "MachineLink/machine-b"]
    );
}

/// Story: without the cascade, machine links are left alone
///
/// Machine links belong to the environment, not the compiled graph; a
/// plain delete removes the cluster's resources and nothing else.
#[tokio::test]
async fn story_plain_delete_leaves_machine_links() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;
    store.seed(machine_link("demo", "machine-a", false));

    delete(&store, "demo", false).await;

    assert_eq!(snapshot_keys(&store), vec!["MachineLink/machine-a"]);
}
