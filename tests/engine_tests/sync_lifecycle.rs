//! Integration tests for the sync lifecycle
//!
//! These tests tell the story of a cluster converging to its template
//! over repeated syncs. Each sync compiles the template, diffs it
//! against the store and applies the change set; a converged cluster
//! must always diff to an empty change set.

use std::sync::Arc;

use trellis::apply::{ApplyOptions, Executor};
use trellis::compiler;
use trellis::diff;
use trellis::resource::{ConfigPatchSpec, Resource, ResourceData, ResourceKind, ResourcePhase};
use trellis::store::{InMemoryStore, Store};
use trellis::LABEL_CLUSTER;

use super::helpers::{snapshot_keys, spawn_releaser, sync, template, DEMO};

// =============================================================================
// Convergence Stories
// =============================================================================
//
// These tests demonstrate the sync loop an operator runs: edit the
// template, sync, repeat. The engine must make exactly the changes the
// edit implies and nothing else.

/// Story: the first sync creates the whole compiled graph
///
/// An empty store plus the demo template yields eight creates; after
/// the sync the store holds exactly the compiled resources, each
/// versioned by the store and Running.
#[tokio::test]
async fn story_first_sync_creates_the_whole_graph() {
    let store = InMemoryStore::new();
    let changes = sync(&store, &template(DEMO)).await;

    assert_eq!(changes.create.len(), 8);
    assert!(changes.update.is_empty());
    assert!(changes.destroy.is_empty());

    assert_eq!(
        snapshot_keys(&store),
        vec![
            "Cluster/demo",
            "MachineSet/demo-control-planes",
            "MachineSet/demo-workers",
            "MachineSetNode/m1",
            "MachineSetNode/m2",
            "MachineSetNode/m3",
            "ConfigPatch/000-m1-install-disk",
            "ConfigPatch/500-demo-ntp",
        ]
    );
    for resource in store.snapshot() {
        assert_eq!(resource.metadata.version, 1, "{resource} should be at version 1");
        assert_eq!(resource.metadata.phase, ResourcePhase::Running);
    }
}

/// Story: re-syncing an unchanged template is a no-op
///
/// The stored copies differ from the compiled ones in version, phase
/// and timestamps; none of that is content, so nothing is written.
#[tokio::test]
async fn story_second_sync_is_a_no_op() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;
    let before = store.snapshot();

    let changes = sync(&store, &template(DEMO)).await;
    assert!(changes.is_empty());
    assert_eq!(store.snapshot(), before, "a no-op sync must not write");
}

/// Story: editing the template updates in place and re-converges
///
/// Bumping the Kubernetes version touches exactly the Cluster resource;
/// its stored version advances, everything else stays put, and a third
/// sync is a no-op again.
#[tokio::test]
async fn story_template_edit_converges() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;

    let edited = template(&DEMO.replace("v1.28.2", "v1.29.0"));
    let changes = sync(&store, &edited).await;
    assert!(changes.create.is_empty());
    assert_eq!(changes.update.len(), 1);
    assert!(changes.destroy.is_empty());

    let cluster = store
        .get(ResourceKind::Cluster, "demo")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cluster.metadata.version, 2);
    match &cluster.spec {
        ResourceData::Cluster(spec) => assert_eq!(spec.kubernetes_version, "v1.29.0"),
        other => panic!("unexpected payload {other:?}"),
    }

    let node = store
        .get(ResourceKind::MachineSetNode, "m1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.metadata.version, 1, "untouched resources keep their version");

    assert!(sync(&store, &edited).await.is_empty());
}

/// Story: dropping a machine from a pool destroys only its node
#[tokio::test]
async fn story_scale_down_destroys_the_node() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;

    let scaled = template(&DEMO.replace("  - m2\n  - m3\n", "  - m2\n"));
    let changes = sync(&store, &scaled).await;

    assert_eq!(changes.destroy.len(), 1);
    let gone: Vec<_> = changes.destroy[0].iter().map(ToString::to_string).collect();
    assert_eq!(gone, vec!["MachineSetNode/m3"]);

    assert!(store
        .get(ResourceKind::MachineSetNode, "m3")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get(ResourceKind::MachineSetNode, "m2")
        .await
        .unwrap()
        .is_some());
    assert!(sync(&store, &scaled).await.is_empty());
}

/// Story: removing a pool tears it down dependents-first
///
/// With the Workers document gone, one sync destroys the pool's nodes
/// in the first phase and the machine set itself in the second, while a
/// stand-in controller holds and releases a finalizer on the set.
#[tokio::test]
async fn story_removing_a_pool_destroys_dependents_first() {
    let store = Arc::new(InMemoryStore::new());
    sync(store.as_ref(), &template(DEMO)).await;
    store
        .add_finalizer(
            ResourceKind::MachineSet,
            "demo-workers",
            "machine-set-controller",
        )
        .await
        .unwrap();
    let controller = spawn_releaser(
        Arc::clone(&store),
        ResourceKind::MachineSet,
        "machine-set-controller",
    );

    let without_pool = template(&DEMO.replace(
        "kind: Workers\nmachines:\n  - m2\n  - m3\n---\n",
        "",
    ));
    let changes = sync(store.as_ref(), &without_pool).await;

    assert_eq!(changes.destroy.len(), 2);
    let first: Vec<_> = changes.destroy[0].iter().map(Resource::id).collect();
    assert_eq!(first, vec!["m2", "m3"]);
    let second: Vec<_> = changes.destroy[1].iter().map(Resource::id).collect();
    assert_eq!(second, vec!["demo-workers"]);

    assert_eq!(
        snapshot_keys(store.as_ref()),
        vec![
            "Cluster/demo",
            "MachineSet/demo-control-planes",
            "MachineSetNode/m1",
            "ConfigPatch/000-m1-install-disk",
            "ConfigPatch/500-demo-ntp",
        ]
    );
    controller.abort();
}

// =============================================================================
// Safety Stories
// =============================================================================

/// Story: a dry run computes changes but writes nothing
#[tokio::test]
async fn story_dry_run_writes_nothing() {
    let store = InMemoryStore::new();
    let resources = compiler::compile(&template(DEMO)).unwrap();
    let changes = diff::diff(&store, "demo", &resources).await.unwrap();
    assert_eq!(changes.create.len(), 8);

    Executor::new(&store)
        .apply(&changes, ApplyOptions { dry_run: true })
        .await
        .unwrap();

    assert!(store.snapshot().is_empty());
}

/// Story: controller-derived resources pass through syncs untouched
///
/// A patch derived by a controller carries the cluster label but names
/// an owner; the diff must neither adopt nor destroy it, no matter how
/// often the cluster syncs.
#[tokio::test]
async fn story_controller_derived_resources_survive_syncs() {
    let store = InMemoryStore::new();
    store.seed(
        Resource::new(
            "950-demo-derived",
            ResourceData::ConfigPatch(ConfigPatchSpec {
                data: "machine: {}".into(),
            }),
        )
        .with_label(LABEL_CLUSTER, "demo")
        .with_owner("schematic-controller"),
    );

    sync(&store, &template(DEMO)).await;
    assert!(sync(&store, &template(DEMO)).await.is_empty());

    let derived = store
        .get(ResourceKind::ConfigPatch, "950-demo-derived")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        derived.metadata.version, 1,
        "syncs must not touch derived resources"
    );
}
