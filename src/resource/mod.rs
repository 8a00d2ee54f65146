//! Typed resource model for the cluster state store
//!
//! A [`Resource`] is the unit everything else operates on: the compiler
//! emits them, the diff compares them and the executor creates, updates
//! and destroys them. Identity is the `(kind, id)` pair inside a
//! namespace; content is the metadata descriptors plus a typed payload.
//!
//! ## Lifecycle
//!
//! Resources move through two phases. They are created `running` and
//! switch to `tearingDown` when a teardown is requested. A resource in
//! teardown can only leave the store through destruction, which the store
//! refuses while finalizers are attached. Controllers observing teardown
//! release their finalizers, and the last release unblocks destruction.

pub mod ids;
mod spec;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use spec::{
    AllocationSize, BackupConfiguration, BootstrapSpec, ClusterFeatures, ClusterSpec,
    ConfigPatchSpec, MachineClassConfig, MachineLinkSpec, MachineSetNodeSpec, MachineSetSpec,
    Role, RollingUpdate, RolloutStrategy, SchematicSpec, StrategyType,
};

/// Resource types the engine knows about
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[non_exhaustive]
pub enum ResourceKind {
    /// Root resource of a cluster
    Cluster,
    /// Group of machines sharing a role and configuration
    MachineSet,
    /// Membership of one machine in one machine set
    MachineSetNode,
    /// Configuration patch applied to a cluster, machine set or machine
    ConfigPatch,
    /// Installation media description for a machine set or machine
    SchematicConfiguration,
    /// Connection record for a machine known to the management plane
    MachineLink,
}

impl ResourceKind {
    /// Number of distinct destruction ranks
    pub const DESTROY_RANKS: usize = 3;

    /// Destruction rank of this kind; lower ranks are destroyed first.
    ///
    /// Leaves go before the machine sets that reference them, and the
    /// cluster root goes last so controllers can resolve references for
    /// as long as dependents exist.
    pub fn destroy_rank(self) -> u8 {
        match self {
            Self::MachineSetNode
            | Self::ConfigPatch
            | Self::SchematicConfiguration
            | Self::MachineLink => 0,
            Self::MachineSet => 1,
            Self::Cluster => 2,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cluster => "Cluster",
            Self::MachineSet => "MachineSet",
            Self::MachineSetNode => "MachineSetNode",
            Self::ConfigPatch => "ConfigPatch",
            Self::SchematicConfiguration => "SchematicConfiguration",
            Self::MachineLink => "MachineLink",
        };
        write!(f, "{name}")
    }
}

/// Resource kinds the compiler emits, in no particular order.
///
/// Machine links are deliberately absent: the environment creates them
/// when machines connect, and the engine only ever reads or destroys
/// them.
pub const COMPILED_KINDS: [ResourceKind; 5] = [
    ResourceKind::Cluster,
    ResourceKind::MachineSet,
    ResourceKind::MachineSetNode,
    ResourceKind::ConfigPatch,
    ResourceKind::SchematicConfiguration,
];

/// Lifecycle phase of a stored resource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourcePhase {
    /// Resource is live and reconciled by controllers
    #[default]
    Running,
    /// Teardown was requested; the resource is draining finalizers
    TearingDown,
}

impl std::fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::TearingDown => write!(f, "tearingDown"),
        }
    }
}

/// Metadata attached to every resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Namespace the resource lives in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Identifier, unique per kind within the namespace
    pub id: String,

    /// Optimistic concurrency version, incremented by the store on write
    #[serde(default)]
    pub version: u64,

    /// Lifecycle phase, managed by the store
    #[serde(default)]
    pub phase: ResourcePhase,

    /// Controllers that must release the resource before destruction
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finalizers: BTreeSet<String>,

    /// Controller that derives this resource; empty for user-owned ones
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    /// User and engine labels; the diff compares these
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// User and engine annotations; the diff compares these
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// When the store first saw the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// When the store last wrote the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    crate::DEFAULT_NAMESPACE.to_string()
}

impl Metadata {
    /// Create metadata for a fresh resource in the default namespace
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            namespace: default_namespace(),
            id: id.into(),
            version: 0,
            phase: ResourcePhase::Running,
            finalizers: BTreeSet::new(),
            owner: String::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created: None,
            updated: None,
        }
    }
}

/// Typed payload of a resource, one variant per kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ResourceData {
    /// Payload of a [`ResourceKind::Cluster`]
    Cluster(ClusterSpec),
    /// Payload of a [`ResourceKind::MachineSet`]
    MachineSet(MachineSetSpec),
    /// Payload of a [`ResourceKind::MachineSetNode`]
    MachineSetNode(MachineSetNodeSpec),
    /// Payload of a [`ResourceKind::ConfigPatch`]
    ConfigPatch(ConfigPatchSpec),
    /// Payload of a [`ResourceKind::SchematicConfiguration`]
    SchematicConfiguration(SchematicSpec),
    /// Payload of a [`ResourceKind::MachineLink`]
    MachineLink(MachineLinkSpec),
}

impl ResourceData {
    /// Kind implied by this payload
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::MachineSet(_) => ResourceKind::MachineSet,
            Self::MachineSetNode(_) => ResourceKind::MachineSetNode,
            Self::ConfigPatch(_) => ResourceKind::ConfigPatch,
            Self::SchematicConfiguration(_) => ResourceKind::SchematicConfiguration,
            Self::MachineLink(_) => ResourceKind::MachineLink,
        }
    }
}

/// A typed resource: metadata plus payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity, lifecycle and descriptors
    pub metadata: Metadata,

    /// Typed payload; the variant determines the kind
    pub spec: ResourceData,
}

impl Resource {
    /// Create a fresh resource in the default namespace
    pub fn new(id: impl Into<String>, spec: ResourceData) -> Self {
        Self {
            metadata: Metadata::new(id),
            spec,
        }
    }

    /// Kind of this resource
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Identifier of this resource
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// `(kind, id)` pair identifying this resource within its namespace
    pub fn key(&self) -> (ResourceKind, String) {
        (self.kind(), self.metadata.id.clone())
    }

    /// Attach a label, consuming and returning the resource
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Attach an annotation, consuming and returning the resource
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Mark the resource as derived by the named controller
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.metadata.owner = owner.into();
        self
    }

    /// Attach a finalizer, consuming and returning the resource
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.metadata.finalizers.insert(finalizer.into());
        self
    }

    /// Compare user-visible content, ignoring store-managed bookkeeping.
    ///
    /// Version, phase, finalizers, owner and timestamps change on every
    /// write without the user touching the template; treating them as
    /// content would make every sync report spurious updates.
    pub fn content_eq(&self, other: &Resource) -> bool {
        self.metadata.namespace == other.metadata.namespace
            && self.metadata.id == other.metadata.id
            && self.metadata.labels == other.metadata.labels
            && self.metadata.annotations == other.metadata.annotations
            && self.spec == other.spec
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.metadata.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Resource {
        Resource::new(id, ResourceData::MachineSetNode(MachineSetNodeSpec::default()))
    }

    // ==========================================================================
    // Story Tests: Resource Identity and Content
    // ==========================================================================

    /// Story: a resource's kind comes from its payload
    ///
    /// There is no separate kind field to drift out of sync; the payload
    /// variant is the single source of truth.
    #[test]
    fn story_kind_is_derived_from_payload() {
        let cluster = Resource::new(
            "demo",
            ResourceData::Cluster(ClusterSpec {
                kubernetes_version: "1.28.2".into(),
                talos_version: "v1.5.5".into(),
                features: None,
            }),
        );
        assert_eq!(cluster.kind(), ResourceKind::Cluster);
        assert_eq!(cluster.to_string(), "Cluster/demo");
        assert_eq!(cluster.key(), (ResourceKind::Cluster, "demo".to_string()));

        assert_eq!(node("m1").kind(), ResourceKind::MachineSetNode);
    }

    /// Story: content comparison ignores store bookkeeping
    ///
    /// Two snapshots of the same resource taken before and after a store
    /// write differ in version and timestamps but are still the same
    /// content, so the diff must not report an update for them.
    #[test]
    fn story_content_comparison_ignores_bookkeeping() {
        let compiled = node("m1").with_label(crate::LABEL_CLUSTER, "demo");

        let mut live = compiled.clone();
        live.metadata.version = 17;
        live.metadata.phase = ResourcePhase::TearingDown;
        live.metadata.finalizers.insert("machine-set-controller".into());
        live.metadata.owner = "MachineSetController".into();
        live.metadata.created = Some(Utc::now());
        live.metadata.updated = Some(Utc::now());

        assert!(compiled.content_eq(&live));

        // A label change is content.
        let relabeled = live.clone().with_label("rack", "r7");
        assert!(!compiled.content_eq(&relabeled));

        // A payload change is content.
        let mut repatched = live.clone();
        repatched.spec = ResourceData::ConfigPatch(ConfigPatchSpec { data: "{}".into() });
        assert!(!compiled.content_eq(&repatched));
    }

    /// Story: resources round-trip through YAML snapshots
    ///
    /// Local state files persist resources as YAML; loading one back
    /// must reproduce the resource exactly, including the payload
    /// variant.
    #[test]
    fn story_resources_round_trip_through_yaml() {
        let resource = Resource::new(
            "demo-workers",
            ResourceData::MachineSet(MachineSetSpec {
                role: Role::Workers,
                machine_class: Some(MachineClassConfig {
                    name: "bare-metal".into(),
                    size: AllocationSize::Unlimited,
                }),
                update_strategy: None,
                delete_strategy: None,
                bootstrap_spec: None,
            }),
        )
        .with_label(crate::LABEL_CLUSTER, "demo")
        .with_label(crate::LABEL_ROLE, "workers");

        let yaml = serde_yaml::to_string(&resource).unwrap();
        assert!(yaml.contains("machineSet"));
        assert!(yaml.contains("bare-metal"));

        let restored: Resource = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored, resource);
        assert_eq!(restored.kind(), ResourceKind::MachineSet);
    }

    /// Story: missing metadata fields default sensibly on load
    #[test]
    fn story_sparse_metadata_defaults_on_load() {
        let yaml = "metadata:\n  id: m1\nspec:\n  machineSetNode: {}\n";
        let resource: Resource = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(resource.metadata.namespace, crate::DEFAULT_NAMESPACE);
        assert_eq!(resource.metadata.version, 0);
        assert_eq!(resource.metadata.phase, ResourcePhase::Running);
        assert!(resource.metadata.finalizers.is_empty());
    }

    /// Story: destruction ranks order leaves before roots
    ///
    /// Machine set nodes, patches and schematics go first, then machine
    /// sets, then the cluster itself.
    #[test]
    fn story_destroy_ranks_order_leaves_before_roots() {
        assert_eq!(ResourceKind::MachineSetNode.destroy_rank(), 0);
        assert_eq!(ResourceKind::ConfigPatch.destroy_rank(), 0);
        assert_eq!(ResourceKind::SchematicConfiguration.destroy_rank(), 0);
        assert_eq!(ResourceKind::MachineLink.destroy_rank(), 0);
        assert_eq!(ResourceKind::MachineSet.destroy_rank(), 1);
        assert_eq!(ResourceKind::Cluster.destroy_rank(), 2);

        let mut kinds = vec![
            ResourceKind::Cluster,
            ResourceKind::ConfigPatch,
            ResourceKind::MachineSet,
        ];
        kinds.sort_by_key(|k| k.destroy_rank());
        assert_eq!(
            kinds,
            vec![
                ResourceKind::ConfigPatch,
                ResourceKind::MachineSet,
                ResourceKind::Cluster,
            ]
        );
    }
}
