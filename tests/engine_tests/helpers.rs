//! Shared fixtures for the engine integration tests

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use trellis::apply::{ApplyOptions, Executor};
use trellis::compiler;
use trellis::diff::{self, ChangeSet};
use trellis::resource::{ResourceKind, ResourcePhase};
use trellis::store::{InMemoryStore, LabelSelector, Store, WatchEvent, WatchOptions};
use trellis::template::{KindRegistry, Template};

/// A small but complete cluster: one control plane machine, two
/// workers, a cluster-wide patch and a per-machine install disk
pub const DEMO: &str = "\
kind: Cluster
name: demo
kubernetes:
  version: v1.28.2
talos:
  version: v1.5.5
patches:
  - name: ntp
    inline:
      machine:
        time:
          servers:
            - time.cloudflare.com
---
kind: ControlPlane
machines:
  - m1
---
kind: Workers
machines:
  - m2
  - m3
---
kind: Machine
name: m1
install:
  disk: /dev/vda
";

/// A second cluster sharing the store with `DEMO`
pub const OTHER: &str = "\
kind: Cluster
name: other
kubernetes:
  version: v1.28.2
talos:
  version: v1.5.5
---
kind: ControlPlane
machines:
  - o1
---
kind: Workers
machines:
  - o2
";

/// Parse a template string with the builtin kinds
pub fn template(input: &str) -> Template {
    Template::parse(input, &KindRegistry::builtin()).expect("fixture template should parse")
}

/// Compile, diff and apply a template, returning the applied changes
pub async fn sync(store: &InMemoryStore, template: &Template) -> ChangeSet {
    let resources = compiler::compile(template).expect("fixture template should compile");
    let cluster = template
        .cluster_name()
        .expect("fixture template names a cluster");
    let changes = diff::diff(store, cluster, &resources)
        .await
        .expect("diff should succeed");
    Executor::new(store)
        .apply(&changes, ApplyOptions::default())
        .await
        .expect("apply should succeed");
    changes
}

/// Every stored resource as `Kind/id`, in store order
pub fn snapshot_keys(store: &InMemoryStore) -> Vec<String> {
    store.snapshot().iter().map(ToString::to_string).collect()
}

/// Spawn a stand-in controller that releases `finalizer` from resources
/// of `kind` once they enter teardown
pub fn spawn_releaser(
    store: Arc<InMemoryStore>,
    kind: ResourceKind,
    finalizer: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (tx, mut rx) = mpsc::channel(64);
        store
            .watch(
                kind,
                WatchOptions {
                    bootstrap: true,
                    selector: LabelSelector::any(),
                },
                tx,
            )
            .await
            .expect("watch should subscribe");
        while let Some(event) = rx.recv().await {
            if let WatchEvent::Created(r) | WatchEvent::Updated(r) = event {
                if r.metadata.phase == ResourcePhase::TearingDown
                    && r.metadata.finalizers.contains(finalizer)
                {
                    let _ = store.remove_finalizer(kind, r.id(), finalizer).await;
                }
            }
        }
    })
}
