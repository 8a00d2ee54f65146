//! Machine template document
//!
//! A Machine document does not create a machine; machines exist once
//! they connect to the management plane. The document attaches
//! per-machine intent to a machine the template references elsewhere:
//! descriptors for its machine set node, a lock flag, an installation
//! disk, kernel arguments and machine-scoped patches. Consequently it
//! compiles to patches and schematics only, never to a resource of its
//! own.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::resource::{ids, ConfigPatchSpec, Resource, ResourceData, SchematicSpec};
use crate::template::context::TranslateContext;
use crate::template::patch::Patch;
use crate::template::types::{Descriptors, InstallSpec, KernelArgs};
use crate::{Error, LABEL_CLUSTER, LABEL_MACHINE};

/// Top-level keys a Machine document may carry
pub const FIELDS: &[&str] = &[
    "kind",
    "name",
    "labels",
    "annotations",
    "locked",
    "install",
    "extraKernelArgs",
    "patches",
];

/// The `kind: Machine` template document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// ID of the machine this document describes
    pub name: String,

    /// Descriptors inherited by the machine's set node
    #[serde(flatten)]
    pub descriptors: Descriptors,

    /// Forbid configuration and upgrade writes to this machine
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,

    /// Installation target for the OS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallSpec>,

    /// Extra kernel arguments for this machine's installation media
    #[serde(flatten)]
    pub kernel_args: KernelArgs,

    /// Machine-scoped configuration patches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Machine {
    /// Validates the document, recording every violation
    pub fn validate(&self, ctx: &TranslateContext, errors: &mut ValidationErrors) {
        if self.name.is_empty() {
            errors.push("machine document name must not be empty");
            return;
        }

        let scope = format!("machine {:?}", self.name);

        if let Some(install) = &self.install {
            if install.disk.is_empty() {
                errors.push(format!("{scope}: install disk must not be empty"));
            }
        }

        for patch in &self.patches {
            patch.validate(&scope, ctx.base_dir(), errors);
        }
    }

    /// Compile the document into its patches and schematic
    pub fn translate(&self, ctx: &TranslateContext) -> Result<Vec<Resource>, Error> {
        let cluster = ctx.cluster_name();
        let mut resources = Vec::new();

        if let Some(install) = &self.install {
            let resource = Resource::new(
                ids::patch(0, &self.name, "install-disk"),
                ResourceData::ConfigPatch(ConfigPatchSpec {
                    data: install_disk_fragment(&install.disk)?,
                }),
            )
            .with_label(LABEL_CLUSTER, cluster)
            .with_label(LABEL_MACHINE, &self.name);
            resources.push(resource);
        }

        for patch in &self.patches {
            let resource = patch
                .translate(&self.name, ctx.base_dir())?
                .with_label(LABEL_CLUSTER, cluster)
                .with_label(LABEL_MACHINE, &self.name);
            resources.push(resource);
        }

        if !self.kernel_args.is_empty() {
            let schematic = Resource::new(
                ids::schematic(&self.name),
                ResourceData::SchematicConfiguration(SchematicSpec {
                    system_extensions: Vec::new(),
                    extra_kernel_args: self.kernel_args.extra_kernel_args.clone(),
                }),
            )
            .with_label(LABEL_CLUSTER, cluster)
            .with_label(LABEL_MACHINE, &self.name);
            resources.push(schematic);
        }

        Ok(resources)
    }
}

/// Renders the generated install-disk patch content.
///
/// Serialized through the YAML writer rather than string formatting so
/// device paths needing quoting stay valid.
fn install_disk_fragment(disk: &str) -> Result<String, Error> {
    #[derive(Serialize)]
    struct Fragment<'a> {
        machine: MachineSection<'a>,
    }
    #[derive(Serialize)]
    struct MachineSection<'a> {
        install: InstallSection<'a>,
    }
    #[derive(Serialize)]
    struct InstallSection<'a> {
        disk: &'a str,
    }

    Ok(serde_yaml::to_string(&Fragment {
        machine: MachineSection {
            install: InstallSection { disk },
        },
    })?)
}
