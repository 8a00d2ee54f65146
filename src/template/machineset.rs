//! ControlPlane and Workers template documents
//!
//! Both document kinds describe a machine set and share almost all of
//! their shape, captured in [`MachineSetBase`]. They differ in three
//! ways: a template has exactly one ControlPlane but any number of
//! Workers documents, only Workers documents carry a pool name, and
//! only the ControlPlane may carry an etcd recovery source.
//!
//! Machines join a set either through an explicit `machines` list or
//! through a `machineClass` allocation; the two modes are mutually
//! exclusive. Explicit members compile to one machine set node each,
//! class allocations leave node management to the environment's
//! allocator controller.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::resource::{
    ids, BootstrapSpec, MachineClassConfig, MachineSetNodeSpec, MachineSetSpec, Resource,
    ResourceData, Role, RolloutStrategy, SchematicSpec,
};
use crate::template::context::TranslateContext;
use crate::template::patch::Patch;
use crate::template::types::{is_valid_name, Descriptors, SystemExtensions};
use crate::{Error, ANNOTATION_LOCKED, LABEL_CLUSTER, LABEL_MACHINE_SET, LABEL_ROLE};

/// Top-level keys a ControlPlane document may carry
pub const CONTROL_PLANE_FIELDS: &[&str] = &[
    "kind",
    "labels",
    "annotations",
    "systemExtensions",
    "machines",
    "machineClass",
    "updateStrategy",
    "deleteStrategy",
    "bootstrapSpec",
    "patches",
];

/// Top-level keys a Workers document may carry
pub const WORKERS_FIELDS: &[&str] = &[
    "kind",
    "name",
    "labels",
    "annotations",
    "systemExtensions",
    "machines",
    "machineClass",
    "updateStrategy",
    "deleteStrategy",
    "patches",
];

/// Worker pool names that collide with engine-assigned machine set
/// naming and are therefore rejected
const RESERVED_POOL_NAMES: &[&str] = &["control-planes", "workers"];

/// Fields shared by ControlPlane and Workers documents
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetBase {
    /// User labels and annotations for the machine set resource
    #[serde(flatten)]
    pub descriptors: Descriptors,

    /// System extensions for this set's installation media
    #[serde(flatten)]
    pub extensions: SystemExtensions,

    /// Explicit machine membership by machine ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machines: Vec<String>,

    /// Machine class allocation; mutually exclusive with `machines`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_class: Option<MachineClassConfig>,

    /// Strategy for in-place machine updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<RolloutStrategy>,

    /// Strategy for machine removal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_strategy: Option<RolloutStrategy>,

    /// Machine-set-scoped configuration patches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
}

impl MachineSetBase {
    fn validate(&self, scope: &str, ctx: &TranslateContext, errors: &mut ValidationErrors) {
        if !self.machines.is_empty() && self.machine_class.is_some() {
            errors.push(format!(
                "{scope}: machines and machineClass are mutually exclusive"
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for machine in &self.machines {
            if machine.is_empty() {
                errors.push(format!("{scope}: machine ID must not be empty"));
                continue;
            }
            if !seen.insert(machine.as_str()) {
                errors.push(format!("{scope}: machine {machine:?} listed more than once"));
            }
        }

        if let Some(strategy) = &self.update_strategy {
            strategy.validate(&format!("{scope} updateStrategy"), errors);
        }
        if let Some(strategy) = &self.delete_strategy {
            strategy.validate(&format!("{scope} deleteStrategy"), errors);
        }

        for patch in &self.patches {
            patch.validate(scope, ctx.base_dir(), errors);
        }
    }

    /// Compile the shared shape into a machine set, its nodes, patches
    /// and schematic.
    fn translate(
        &self,
        ctx: &TranslateContext,
        role: Role,
        ms_id: &str,
        bootstrap_spec: Option<BootstrapSpec>,
    ) -> Result<Vec<Resource>, Error> {
        let cluster = ctx.cluster_name();

        let mut machine_set = Resource::new(
            ms_id,
            ResourceData::MachineSet(MachineSetSpec {
                role,
                machine_class: self.machine_class.clone(),
                update_strategy: self.update_strategy.clone(),
                delete_strategy: self.delete_strategy.clone(),
                bootstrap_spec,
            }),
        )
        .with_label(LABEL_CLUSTER, cluster)
        .with_label(LABEL_ROLE, role.to_string());
        self.descriptors.apply_to(&mut machine_set);
        let mut resources = vec![machine_set];

        for machine in &self.machines {
            let mut node = Resource::new(
                machine,
                ResourceData::MachineSetNode(MachineSetNodeSpec::default()),
            )
            .with_label(LABEL_CLUSTER, cluster)
            .with_label(LABEL_MACHINE_SET, ms_id);
            if let Some(descriptors) = ctx.descriptors_for(machine) {
                descriptors.apply_to(&mut node);
            }
            if ctx.is_locked(machine) {
                node = node.with_annotation(ANNOTATION_LOCKED, "");
            }
            resources.push(node);
        }

        for patch in &self.patches {
            let resource = patch
                .translate(ms_id, ctx.base_dir())?
                .with_label(LABEL_CLUSTER, cluster)
                .with_label(LABEL_MACHINE_SET, ms_id);
            resources.push(resource);
        }

        if !self.extensions.is_empty() {
            let schematic = Resource::new(
                ids::schematic(ms_id),
                ResourceData::SchematicConfiguration(SchematicSpec {
                    system_extensions: self.extensions.system_extensions.clone(),
                    extra_kernel_args: Vec::new(),
                }),
            )
            .with_label(LABEL_CLUSTER, cluster)
            .with_label(LABEL_MACHINE_SET, ms_id);
            resources.push(schematic);
        }

        Ok(resources)
    }
}

/// The `kind: ControlPlane` template document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlane {
    /// Shared machine set shape
    #[serde(flatten)]
    pub base: MachineSetBase,

    /// Etcd recovery source, applied once when the set is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_spec: Option<BootstrapSpec>,
}

impl ControlPlane {
    /// Validates the document, recording every violation
    pub fn validate(&self, ctx: &TranslateContext, errors: &mut ValidationErrors) {
        let scope = "control plane";
        self.base.validate(scope, ctx, errors);

        if let Some(bootstrap) = &self.bootstrap_spec {
            bootstrap.validate(scope, errors);
        }

        // Locked machines cannot serve etcd: removing them later would
        // need the very config writes the lock forbids.
        for machine in &self.base.machines {
            if ctx.is_locked(machine) {
                errors.push(format!(
                    "{scope} references locked machine {machine:?}"
                ));
            }
        }
    }

    /// Compile the document into the control plane machine set graph
    pub fn translate(&self, ctx: &TranslateContext) -> Result<Vec<Resource>, Error> {
        let ms_id = ids::control_planes(ctx.cluster_name());
        self.base
            .translate(ctx, Role::ControlPlane, &ms_id, self.bootstrap_spec.clone())
    }
}

/// The `kind: Workers` template document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Workers {
    /// Pool name; at most one Workers document may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Shared machine set shape
    #[serde(flatten)]
    pub base: MachineSetBase,
}

impl Workers {
    /// Pool name with the unnamed pool normalized to `""`
    pub fn pool_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// ID of the machine set this document compiles to
    pub fn machine_set_id(&self, cluster: &str) -> String {
        match self.pool_name() {
            "" => ids::workers(cluster),
            pool => ids::worker_pool(cluster, pool),
        }
    }

    fn scope(&self) -> String {
        match self.pool_name() {
            "" => "workers".to_string(),
            pool => format!("workers {pool:?}"),
        }
    }

    /// Validates the document, recording every violation
    pub fn validate(&self, ctx: &TranslateContext, errors: &mut ValidationErrors) {
        let scope = self.scope();

        if let Some(name) = &self.name {
            if !is_valid_name(name) {
                errors.push(format!(
                    "workers name {name:?} contains invalid characters (allowed: letters, digits, - and _)"
                ));
            } else if RESERVED_POOL_NAMES.contains(&name.as_str()) {
                errors.push(format!("workers name {name:?} is reserved"));
            }
        }

        self.base.validate(&scope, ctx, errors);
    }

    /// Compile the document into its worker machine set graph
    pub fn translate(&self, ctx: &TranslateContext) -> Result<Vec<Resource>, Error> {
        let ms_id = self.machine_set_id(ctx.cluster_name());
        self.base.translate(ctx, Role::Workers, &ms_id, None)
    }
}
