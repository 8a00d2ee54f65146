//! Cross-document context for template compilation
//!
//! Translation of one document sometimes needs facts declared in a
//! different document: machine-set documents assign machines whose
//! descriptors and locked flag live on Machine documents, and every
//! document needs the cluster name from the Cluster document. The
//! [`TranslateContext`] gathers those facts once, before per-document
//! translation starts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::template::types::Descriptors;

/// Cross-document facts available to every document during translation
#[derive(Clone, Debug, Default)]
pub struct TranslateContext {
    cluster_name: String,
    locked_machines: BTreeSet<String>,
    machine_descriptors: BTreeMap<String, Descriptors>,
    base_dir: Option<PathBuf>,
}

impl TranslateContext {
    /// Create a new builder seeded with the cluster name
    pub fn builder(cluster_name: impl Into<String>) -> TranslateContextBuilder {
        TranslateContextBuilder {
            context: TranslateContext {
                cluster_name: cluster_name.into(),
                ..Default::default()
            },
        }
    }

    /// Name of the cluster being compiled
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// True when the named machine is declared locked
    pub fn is_locked(&self, machine: &str) -> bool {
        self.locked_machines.contains(machine)
    }

    /// Descriptors declared on the named machine's document, if any
    pub fn descriptors_for(&self, machine: &str) -> Option<&Descriptors> {
        self.machine_descriptors.get(machine)
    }

    /// Directory file-referenced patches resolve against
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}

/// Builder for [`TranslateContext`]
#[derive(Debug, Default)]
pub struct TranslateContextBuilder {
    context: TranslateContext,
}

impl TranslateContextBuilder {
    /// Mark a machine as locked
    pub fn locked_machine(mut self, machine: impl Into<String>) -> Self {
        self.context.locked_machines.insert(machine.into());
        self
    }

    /// Record the descriptors a Machine document declared
    pub fn machine_descriptors(
        mut self,
        machine: impl Into<String>,
        descriptors: Descriptors,
    ) -> Self {
        self.context
            .machine_descriptors
            .insert(machine.into(), descriptors);
        self
    }

    /// Set the directory file-referenced patches resolve against
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context.base_dir = Some(dir.into());
        self
    }

    /// Finish building the context
    pub fn build(self) -> TranslateContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: the context gathers cross-document facts for translation
    #[test]
    fn story_context_carries_cross_document_facts() {
        let mut descriptors = Descriptors::default();
        descriptors.labels.insert("rack".into(), "r7".into());

        let context = TranslateContext::builder("demo")
            .locked_machine("m2")
            .machine_descriptors("m1", descriptors)
            .base_dir("/tmp/templates")
            .build();

        assert_eq!(context.cluster_name(), "demo");
        assert!(context.is_locked("m2"));
        assert!(!context.is_locked("m1"));
        assert_eq!(
            context.descriptors_for("m1").unwrap().labels["rack"],
            "r7"
        );
        assert!(context.descriptors_for("m2").is_none());
        assert_eq!(context.base_dir().unwrap(), Path::new("/tmp/templates"));
    }
}
