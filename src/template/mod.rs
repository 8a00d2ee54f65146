//! Cluster template object model
//!
//! A template is a multi-document YAML file describing one cluster: a
//! `Cluster` document, exactly one `ControlPlane`, any number of named
//! `Workers` pools, and optional `Machine` documents that attach
//! per-machine configuration to members referenced by the sets.
//!
//! Parsing is strict (unknown kinds and fields are errors) and typed:
//! each document deserializes into its own model via the
//! [`KindRegistry`]. Validation aggregates every problem across the
//! whole template into one [`ValidationErrors`] report instead of
//! stopping at the first, so a user fixes a broken template in one
//! round trip.

mod cluster;
mod context;
mod machine;
mod machineset;
mod patch;
mod registry;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;

pub use cluster::Cluster;
pub use context::{TranslateContext, TranslateContextBuilder};
pub use machine::Machine;
pub use machineset::{ControlPlane, MachineSetBase, Workers};
pub use patch::{Patch, DEFAULT_PATCH_WEIGHT, MAX_PATCH_WEIGHT, MIN_PATCH_WEIGHT};
pub use registry::KindRegistry;
pub use types::{Descriptors, InstallSpec, KernelArgs, SystemExtensions, VersionSpec};

use crate::error::ValidationErrors;
use crate::resource::Resource;
use crate::Error;

/// One parsed template document
#[derive(Clone, Debug)]
pub enum TemplateDoc {
    /// Cluster-wide settings and identity
    Cluster(Cluster),
    /// The control plane machine set
    ControlPlane(ControlPlane),
    /// A worker pool machine set
    Workers(Workers),
    /// Per-machine configuration for a referenced machine
    Machine(Machine),
}

impl TemplateDoc {
    /// Kind discriminator of this document
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cluster(_) => "Cluster",
            Self::ControlPlane(_) => "ControlPlane",
            Self::Workers(_) => "Workers",
            Self::Machine(_) => "Machine",
        }
    }

    fn validate(&self, ctx: &TranslateContext, errors: &mut ValidationErrors) {
        match self {
            Self::Cluster(doc) => doc.validate(ctx, errors),
            Self::ControlPlane(doc) => doc.validate(ctx, errors),
            Self::Workers(doc) => doc.validate(ctx, errors),
            Self::Machine(doc) => doc.validate(ctx, errors),
        }
    }

    pub(crate) fn translate(&self, ctx: &TranslateContext) -> Result<Vec<Resource>, Error> {
        match self {
            Self::Cluster(doc) => doc.translate(ctx),
            Self::ControlPlane(doc) => doc.translate(ctx),
            Self::Workers(doc) => doc.translate(ctx),
            Self::Machine(doc) => doc.translate(ctx),
        }
    }
}

/// A parsed cluster template
#[derive(Clone, Debug, Default)]
pub struct Template {
    docs: Vec<TemplateDoc>,
    base_dir: Option<PathBuf>,
}

impl Template {
    /// Parse a multi-document YAML string.
    ///
    /// Empty documents (a bare `---` separator) are skipped. Any
    /// structural problem fails the whole parse; document numbers in
    /// error messages are 1-based.
    pub fn parse(input: &str, registry: &KindRegistry) -> Result<Self, Error> {
        let mut docs = Vec::new();

        for (index, document) in serde_yaml::Deserializer::from_str(input).enumerate() {
            let number = index + 1;
            let value = Value::deserialize(document)
                .map_err(|err| Error::parse(format!("document {number}: {err}")))?;
            if matches!(value, Value::Null) {
                continue;
            }
            let doc = registry
                .parse_document(value)
                .map_err(|err| in_document(number, err))?;
            docs.push(doc);
        }

        Ok(Self {
            docs,
            base_dir: None,
        })
    }

    /// Load and parse a template file using the builtin kind registry.
    ///
    /// File-referenced patches resolve relative to the template's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let mut template = Self::parse(&input, &KindRegistry::builtin())?;
        template.base_dir = path.parent().map(Path::to_path_buf);
        Ok(template)
    }

    /// Set the directory file-referenced patches resolve against
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Documents in template order
    pub fn docs(&self) -> &[TemplateDoc] {
        &self.docs
    }

    /// Name from the first Cluster document, if any
    pub fn cluster_name(&self) -> Option<&str> {
        self.docs.iter().find_map(|doc| match doc {
            TemplateDoc::Cluster(cluster) => Some(cluster.name.as_str()),
            _ => None,
        })
    }

    /// Validate the whole template, aggregating every error.
    ///
    /// Per-document checks run first in document order, followed by the
    /// cross-document checks: exactly one Cluster and one ControlPlane,
    /// unique worker pool names, each machine assigned to at most one
    /// machine set, and every Machine document referenced by some set.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let ctx = self.context();
        let mut errors = ValidationErrors::new();

        for doc in &self.docs {
            doc.validate(&ctx, &mut errors);
        }

        self.check_cardinality(&mut errors);
        self.check_worker_pools(&mut errors);
        self.check_machine_assignments(&mut errors);
        self.check_machine_documents(&mut errors);

        errors.into_result()
    }

    /// Build the translation context shared by every document.
    ///
    /// Fails when the template has no Cluster document, since nothing
    /// can be translated without a cluster name.
    pub fn translate_context(&self) -> Result<TranslateContext, Error> {
        if self.cluster_name().is_none() {
            return Err(Error::translate("template has no Cluster document"));
        }
        Ok(self.context())
    }

    fn context(&self) -> TranslateContext {
        let mut builder = TranslateContext::builder(self.cluster_name().unwrap_or_default());

        for doc in &self.docs {
            if let TemplateDoc::Machine(machine) = doc {
                if machine.locked {
                    builder = builder.locked_machine(machine.name.as_str());
                }
                if !machine.descriptors.is_empty() {
                    builder = builder
                        .machine_descriptors(machine.name.as_str(), machine.descriptors.clone());
                }
            }
        }

        if let Some(dir) = &self.base_dir {
            builder = builder.base_dir(dir);
        }

        builder.build()
    }

    fn check_cardinality(&self, errors: &mut ValidationErrors) {
        let clusters = self
            .docs
            .iter()
            .filter(|doc| matches!(doc, TemplateDoc::Cluster(_)))
            .count();
        if clusters != 1 {
            errors.push(format!(
                "template must contain exactly one Cluster document (found {clusters})"
            ));
        }

        let control_planes = self
            .docs
            .iter()
            .filter(|doc| matches!(doc, TemplateDoc::ControlPlane(_)))
            .count();
        if control_planes != 1 {
            errors.push(format!(
                "template must contain exactly one ControlPlane document (found {control_planes})"
            ));
        }
    }

    fn check_worker_pools(&self, errors: &mut ValidationErrors) {
        let mut seen = BTreeSet::new();
        for doc in &self.docs {
            if let TemplateDoc::Workers(workers) = doc {
                if !seen.insert(workers.pool_name().to_string()) {
                    errors.push(format!(
                        "duplicate workers with name {:?}",
                        workers.pool_name()
                    ));
                }
            }
        }
    }

    fn check_machine_assignments(&self, errors: &mut ValidationErrors) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for members in self.member_lists() {
            // dedup per document so an in-document repeat, already
            // reported by the set itself, is not double-counted here
            for machine in members.iter().collect::<BTreeSet<_>>() {
                *counts.entry(machine.as_str()).or_default() += 1;
            }
        }
        for (machine, count) in counts {
            if count > 1 {
                errors.push(format!(
                    "machine {machine:?} is assigned to multiple machine sets"
                ));
            }
        }
    }

    fn check_machine_documents(&self, errors: &mut ValidationErrors) {
        let assigned: BTreeSet<&str> = self
            .member_lists()
            .flat_map(|members| members.iter().map(String::as_str))
            .collect();

        let mut seen = BTreeSet::new();
        for doc in &self.docs {
            if let TemplateDoc::Machine(machine) = doc {
                if machine.name.is_empty() {
                    continue;
                }
                if !seen.insert(machine.name.as_str()) {
                    errors.push(format!(
                        "duplicate machine document with name {:?}",
                        machine.name
                    ));
                    continue;
                }
                if !assigned.contains(machine.name.as_str()) {
                    errors.push(format!(
                        "machine {:?} is unused (not referenced by any machine set)",
                        machine.name
                    ));
                }
            }
        }
    }

    fn member_lists(&self) -> impl Iterator<Item = &Vec<String>> {
        self.docs.iter().filter_map(|doc| match doc {
            TemplateDoc::ControlPlane(cp) => Some(&cp.base.machines),
            TemplateDoc::Workers(workers) => Some(&workers.base.machines),
            _ => None,
        })
    }
}

fn in_document(number: usize, err: Error) -> Error {
    match err {
        Error::Parse(msg) => Error::Parse(format!("document {number}: {msg}")),
        Error::Yaml(err) => Error::Parse(format!("document {number}: {err}")),
        other => other,
    }
}
