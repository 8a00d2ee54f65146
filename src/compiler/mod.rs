//! Template compiler
//!
//! Turns a validated [`Template`] into the flat set of resources that
//! describe the cluster: the `Cluster` itself, a `MachineSet` per
//! control plane and worker pool, `MachineSetNode` bindings for
//! explicitly listed machines, `ConfigPatch`es and
//! `SchematicConfiguration`s.
//!
//! Compilation is deterministic: the same template always produces the
//! same resources in the same order (document order, then the emission
//! order within each document). Resource IDs are derived, so two
//! template constructs can only collide through an explicit
//! `idOverride`; that collision fails compilation rather than silently
//! dropping one of the patches.

use std::collections::BTreeSet;

use crate::resource::Resource;
use crate::template::Template;
use crate::Error;

/// Validate a template and translate it into resources.
///
/// Validation errors aggregate across the whole template and surface
/// as [`Error::Validation`].
pub fn compile(template: &Template) -> Result<Vec<Resource>, Error> {
    template.validate()?;
    translate(template)
}

/// Translate a template into resources without validating first.
///
/// Callers normally want [`compile`]; this entry point exists for
/// pipelines that already validated the template and for rendering
/// partially broken templates during debugging.
pub fn translate(template: &Template) -> Result<Vec<Resource>, Error> {
    let ctx = template.translate_context()?;

    let mut resources = Vec::new();
    for doc in template.docs() {
        resources.extend(doc.translate(&ctx)?);
    }

    ensure_unique(&resources)?;
    Ok(resources)
}

fn ensure_unique(resources: &[Resource]) -> Result<(), Error> {
    let mut seen = BTreeSet::new();
    for resource in resources {
        if !seen.insert(resource.key()) {
            return Err(Error::translate(format!(
                "template produces duplicate resource {resource}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceKind, ResourcePhase};
    use crate::template::KindRegistry;
    use crate::{ANNOTATION_LOCKED, LABEL_CLUSTER, LABEL_MACHINE_SET};

    fn template(input: &str) -> Template {
        Template::parse(input, &KindRegistry::builtin()).unwrap()
    }

    const DEMO: &str = "\
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

    // ==========================================================================
    // Story Tests: Compilation
    // ==========================================================================

    /// Story: a small cluster compiles into the expected resource graph
    #[test]
    fn story_demo_cluster_compiles() {
        let resources = compile(&template(DEMO)).unwrap();

        let keys: Vec<_> = resources
            .iter()
            .map(|r| (r.kind(), r.id().to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (ResourceKind::Cluster, "demo".to_string()),
                (ResourceKind::ConfigPatch, "500-demo-ntp".to_string()),
                (ResourceKind::MachineSet, "demo-control-planes".to_string()),
                (ResourceKind::MachineSetNode, "m1".to_string()),
                (ResourceKind::MachineSet, "demo-workers".to_string()),
                (ResourceKind::MachineSetNode, "m2".to_string()),
                (ResourceKind::MachineSetNode, "m3".to_string()),
                (ResourceKind::ConfigPatch, "000-m1-install-disk".to_string()),
            ]
        );
    }

    /// Story: every compiled resource is labeled with its cluster
    #[test]
    fn story_every_resource_carries_the_cluster_label() {
        let resources = compile(&template(DEMO)).unwrap();
        for resource in &resources {
            assert_eq!(
                resource.metadata.labels.get(LABEL_CLUSTER).map(String::as_str),
                Some("demo"),
                "{resource} is missing the cluster label"
            );
        }
    }

    /// Story: nodes are bound to their machine set, fresh and Running
    #[test]
    fn story_nodes_bind_to_their_set() {
        let resources = compile(&template(DEMO)).unwrap();

        let node = resources
            .iter()
            .find(|r| r.kind() == ResourceKind::MachineSetNode && r.id() == "m2")
            .unwrap();
        assert_eq!(
            node.metadata.labels.get(LABEL_MACHINE_SET).map(String::as_str),
            Some("demo-workers")
        );
        assert_eq!(node.metadata.phase, ResourcePhase::Running);
        assert_eq!(node.metadata.version, 0);
        assert!(!node.metadata.annotations.contains_key(ANNOTATION_LOCKED));
    }

    /// Story: compiling the same template twice yields identical output
    #[test]
    fn story_compilation_is_deterministic() {
        let first = compile(&template(DEMO)).unwrap();
        let second = compile(&template(DEMO)).unwrap();
        assert_eq!(first, second);
    }

    /// Story: invalid templates fail compilation with the full report
    #[test]
    fn story_invalid_template_fails_with_aggregate_report() {
        let err = compile(&template("kind: Workers\nname: BAD NAME\n")).unwrap_err();
        let report = err.to_string();
        assert!(report.contains("template validation failed"), "got: {report}");
        assert!(report.contains("exactly one Cluster document"));
        assert!(report.contains("exactly one ControlPlane document"));
    }

    /// Story: colliding idOverrides fail instead of dropping a patch
    #[test]
    fn story_id_override_collisions_fail() {
        let input = "\
kind: Cluster
name: demo
kubernetes:
  version: v1.28.2
talos:
  version: v1.5.5
patches:
  - name: a
    idOverride: shared-id
    inline:
      machine: {}
---
kind: ControlPlane
machines:
  - m1
patches:
  - name: b
    idOverride: shared-id
    inline:
      machine: {}
";
        let err = compile(&template(input)).unwrap_err();
        assert!(
            err.to_string()
                .contains("duplicate resource ConfigPatch/shared-id"),
            "got: {err}"
        );
    }
}
