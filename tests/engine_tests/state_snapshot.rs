//! Integration tests for local state persistence
//!
//! The CLI keeps cluster state in a YAML snapshot between invocations;
//! these tests exercise the load-modify-save cycle the sync and delete
//! commands run, including templates loaded from disk with
//! file-referenced patches.

use std::io::Write;

use trellis::compiler;
use trellis::diff;
use trellis::resource::{ResourceData, ResourceKind};
use trellis::store::{InMemoryStore, Store};
use trellis::template::Template;

use super::helpers::{sync, template, DEMO};

/// Story: state written after a sync reloads into the same store
#[tokio::test]
async fn story_state_round_trips_between_invocations() {
    let store = InMemoryStore::new();
    sync(&store, &template(DEMO)).await;

    let yaml = serde_yaml::to_string(&store.snapshot()).unwrap();
    let restored = InMemoryStore::from_snapshot(&yaml).unwrap();
    assert_eq!(restored.snapshot(), store.snapshot());

    // the next invocation sees a converged cluster
    let resources = compiler::compile(&template(DEMO)).unwrap();
    let changes = diff::diff(&restored, "demo", &resources).await.unwrap();
    assert!(changes.is_empty());
}

/// Story: a reloaded store accepts the next template edit
///
/// Versions persist through the snapshot, so optimistic writes keep
/// working across invocations.
#[tokio::test]
async fn story_loaded_state_supports_further_syncs() {
    let first = InMemoryStore::new();
    sync(&first, &template(DEMO)).await;
    let yaml = serde_yaml::to_string(&first.snapshot()).unwrap();

    let second = InMemoryStore::from_snapshot(&yaml).unwrap();
    let edited = template(&DEMO.replace("v1.28.2", "v1.29.0"));
    let changes = sync(&second, &edited).await;
    assert_eq!(changes.update.len(), 1);

    let cluster = second
        .get(ResourceKind::Cluster, "demo")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cluster.metadata.version, 2);
}

/// Story: a template directory with file patches loads and syncs
///
/// `Template::load` resolves file-referenced patches relative to the
/// template file, so a template checked out next to its patches
/// compiles without any working-directory assumptions.
#[tokio::test]
async fn story_file_based_template_loads_and_syncs() {
    let dir = tempfile::tempdir().unwrap();

    let mut patch = std::fs::File::create(dir.path().join("sysctl.yaml")).unwrap();
    writeln!(patch, "machine:").unwrap();
    writeln!(patch, "  sysctls:").unwrap();
    writeln!(patch, "    net.core.somaxconn: \"65535\"").unwrap();

    let with_file_patch = format!(
        "{DEMO}---\nkind: Workers\nname: tuned\nmachines:\n  - m4\npatches:\n  - file: sysctl.yaml\n"
    );
    std::fs::write(dir.path().join("cluster.yaml"), &with_file_patch).unwrap();

    let loaded = Template::load(dir.path().join("cluster.yaml")).unwrap();
    let store = InMemoryStore::new();
    sync(&store, &loaded).await;

    let compiled = store
        .get(ResourceKind::ConfigPatch, "500-demo-wtuned-sysctl")
        .await
        .unwrap()
        .unwrap();
    match &compiled.spec {
        ResourceData::ConfigPatch(spec) => assert!(spec.data.contains("somaxconn")),
        other => panic!("unexpected payload {other:?}"),
    }
}
