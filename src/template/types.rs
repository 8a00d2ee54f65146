//! Shared building blocks for template documents
//!
//! Several documents carry the same optional groups of fields. Each
//! group lives here as a small struct that documents flatten into their
//! own serde shape:
//! - `Descriptors`: user labels and annotations
//! - `SystemExtensions`: extension images for installation media
//! - `KernelArgs`: extra kernel arguments for installation media
//!
//! `VersionSpec` and `InstallSpec` are nested (not flattened) blocks
//! used by the Cluster and Machine documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// User labels and annotations attached to a document.
///
/// They are copied verbatim onto the resource the document compiles to,
/// next to the labels the engine adds itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptors {
    /// Labels to attach to the compiled resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations to attach to the compiled resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptors {
    /// True when neither labels nor annotations are present
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    /// Copy these descriptors onto a resource
    pub fn apply_to(&self, resource: &mut Resource) {
        for (key, value) in &self.labels {
            resource
                .metadata
                .labels
                .insert(key.clone(), value.clone());
        }
        for (key, value) in &self.annotations {
            resource
                .metadata
                .annotations
                .insert(key.clone(), value.clone());
        }
    }
}

/// System extension images named by a document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemExtensions {
    /// Extension image references, in installation order
    #[serde(
        rename = "systemExtensions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub system_extensions: Vec<String>,
}

impl SystemExtensions {
    /// True when no extensions are named
    pub fn is_empty(&self) -> bool {
        self.system_extensions.is_empty()
    }
}

/// Extra kernel arguments named by a document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelArgs {
    /// Arguments appended to the installer kernel command line
    #[serde(
        rename = "extraKernelArgs",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub extra_kernel_args: Vec<String>,
}

impl KernelArgs {
    /// True when no arguments are named
    pub fn is_empty(&self) -> bool {
        self.extra_kernel_args.is_empty()
    }
}

/// Checks the character set shared by cluster names and worker pool
/// names: ASCII letters, digits, `-` and `_`, at least one character.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A version block, e.g. `kubernetes: { version: v1.28.2 }`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    /// Version string; prefix rules depend on the field using it
    pub version: String,
}

/// Installation target block on a Machine document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSpec {
    /// Disk device the OS is installed to, e.g. `/dev/sda`
    pub disk: String,
}
