//! Cluster template document
//!
//! Exactly one Cluster document anchors every template. It names the
//! cluster, pins the Kubernetes and Talos versions, toggles cluster-wide
//! features and carries cluster-scoped configuration patches.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::resource::{ClusterFeatures, ClusterSpec, Resource, ResourceData};
use crate::template::context::TranslateContext;
use crate::template::patch::Patch;
use crate::template::types::{is_valid_name, Descriptors, VersionSpec};
use crate::{Error, LABEL_CLUSTER};

/// Top-level keys a Cluster document may carry
pub const FIELDS: &[&str] = &[
    "kind",
    "name",
    "labels",
    "annotations",
    "kubernetes",
    "talos",
    "features",
    "patches",
];

/// The `kind: Cluster` template document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster name; becomes the root resource ID and the prefix of
    /// every derived ID
    pub name: String,

    /// User labels and annotations for the cluster resource
    #[serde(flatten)]
    pub descriptors: Descriptors,

    /// Kubernetes version, with or without a leading `v`
    pub kubernetes: VersionSpec,

    /// Talos version; must carry a leading `v`
    pub talos: VersionSpec,

    /// Cluster-wide feature toggles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<ClusterFeatures>,

    /// Cluster-scoped configuration patches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
}

impl Cluster {
    /// Validates the document, recording every violation
    pub fn validate(&self, ctx: &TranslateContext, errors: &mut ValidationErrors) {
        if self.name.is_empty() {
            errors.push("cluster name must not be empty");
        } else if !is_valid_name(&self.name) {
            errors.push(format!(
                "cluster name {:?} contains invalid characters (allowed: letters, digits, - and _)",
                self.name
            ));
        }

        let scope = format!("cluster {:?}", self.name);

        if let Err(reason) = check_kubernetes_version(&self.kubernetes.version) {
            errors.push(format!("{scope}: {reason}"));
        }
        if let Err(reason) = check_talos_version(&self.talos.version) {
            errors.push(format!("{scope}: {reason}"));
        }

        if let Some(features) = &self.features {
            if let Some(backup) = &features.backup_configuration {
                if backup.interval.is_empty() {
                    errors.push(format!("{scope}: backupConfiguration interval must not be empty"));
                }
            }
        }

        for patch in &self.patches {
            patch.validate(&scope, ctx.base_dir(), errors);
        }
    }

    /// Compile the document into the cluster resource and its patches
    pub fn translate(&self, ctx: &TranslateContext) -> Result<Vec<Resource>, Error> {
        let mut cluster = Resource::new(
            &self.name,
            ResourceData::Cluster(ClusterSpec {
                kubernetes_version: self.kubernetes.version.clone(),
                talos_version: self.talos.version.clone(),
                features: self.features.clone(),
            }),
        )
        .with_label(LABEL_CLUSTER, &self.name);
        self.descriptors.apply_to(&mut cluster);

        let mut resources = vec![cluster];
        for patch in &self.patches {
            let resource = patch
                .translate(&self.name, ctx.base_dir())?
                .with_label(LABEL_CLUSTER, &self.name);
            resources.push(resource);
        }
        Ok(resources)
    }
}

/// Kubernetes versions are semantic versions, leading `v` optional.
fn check_kubernetes_version(version: &str) -> Result<(), String> {
    let digits = version.strip_prefix('v').unwrap_or(version);
    semver::Version::parse(digits)
        .map(|_| ())
        .map_err(|err| format!("invalid kubernetes version {version:?}: {err}"))
}

/// Talos versions must carry the leading `v` their release artifacts use.
fn check_talos_version(version: &str) -> Result<(), String> {
    let digits = version
        .strip_prefix('v')
        .ok_or_else(|| format!("talos version {version:?} must start with \"v\""))?;
    semver::Version::parse(digits)
        .map(|_| ())
        .map_err(|err| format!("invalid talos version {version:?}: {err}"))
}
