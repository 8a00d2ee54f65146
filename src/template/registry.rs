//! Document kind registry
//!
//! Maps the `kind:` discriminator of a template document to its parser
//! and its set of allowed top-level fields. The engine works against a
//! registry instance rather than a hardcoded kind list, so tests and
//! embedders can assemble registries of their own; [`KindRegistry::builtin`]
//! returns the standard one.
//!
//! Registering the same kind twice is a programming error in the
//! registering code, not a user input error, and panics immediately at
//! construction instead of surfacing later as a parse oddity.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::template::machine::Machine;
use crate::template::machineset::{ControlPlane, Workers};
use crate::template::{cluster, machine, machineset, TemplateDoc};
use crate::Error;

type ParseFn = fn(Mapping) -> Result<TemplateDoc, Error>;

struct KindEntry {
    fields: &'static [&'static str],
    parse: ParseFn,
}

/// Registry of template document kinds
#[derive(Default)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, KindEntry>,
}

impl KindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard document kinds.
    ///
    /// Patch is deliberately not among them: patches are list entries
    /// inside other documents, and a top-level `kind: Patch` document
    /// is an error.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Cluster", cluster::FIELDS, parse_cluster);
        registry.register(
            "ControlPlane",
            machineset::CONTROL_PLANE_FIELDS,
            parse_control_plane,
        );
        registry.register("Workers", machineset::WORKERS_FIELDS, parse_workers);
        registry.register("Machine", machine::FIELDS, parse_machine);
        registry
    }

    /// Register a document kind.
    ///
    /// # Panics
    ///
    /// Panics when the kind is already registered.
    pub fn register(
        &mut self,
        kind: &'static str,
        fields: &'static [&'static str],
        parse: ParseFn,
    ) {
        if self.kinds.insert(kind, KindEntry { fields, parse }).is_some() {
            panic!("template kind {kind:?} registered twice");
        }
    }

    /// Kinds this registry accepts, in sorted order
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }

    /// Parse one YAML document into a typed template document.
    ///
    /// The document must be a mapping with a string `kind` naming a
    /// registered kind, and every top-level key must belong to that
    /// kind's field set. Unknown keys fail parsing rather than being
    /// ignored; a typo like `machiness` silently dropping a machine
    /// list is much worse than an error.
    pub fn parse_document(&self, value: Value) -> Result<TemplateDoc, Error> {
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            _ => return Err(Error::parse("document must be a YAML mapping")),
        };

        let kind = mapping
            .iter()
            .find_map(|(key, value)| (key.as_str() == Some("kind")).then_some(value))
            .ok_or_else(|| Error::parse("document is missing a kind"))?
            .as_str()
            .ok_or_else(|| Error::parse("document kind must be a string"))?
            .to_string();

        let entry = self
            .kinds
            .get(kind.as_str())
            .ok_or_else(|| Error::UnknownKind(kind.clone()))?;

        let mut body = Mapping::new();
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| Error::parse(format!("{kind} document keys must be strings")))?;
            if !entry.fields.contains(&name) {
                return Err(Error::parse(format!(
                    "unknown field {name:?} in {kind} document"
                )));
            }
            if name == "kind" {
                continue;
            }
            body.insert(key, value);
        }

        (entry.parse)(body)
    }
}

fn parse_cluster(body: Mapping) -> Result<TemplateDoc, Error> {
    let doc: cluster::Cluster = serde_yaml::from_value(Value::Mapping(body))?;
    Ok(TemplateDoc::Cluster(doc))
}

fn parse_control_plane(body: Mapping) -> Result<TemplateDoc, Error> {
    let doc: ControlPlane = serde_yaml::from_value(Value::Mapping(body))?;
    Ok(TemplateDoc::ControlPlane(doc))
}

fn parse_workers(body: Mapping) -> Result<TemplateDoc, Error> {
    let doc: Workers = serde_yaml::from_value(Value::Mapping(body))?;
    Ok(TemplateDoc::Workers(doc))
}

fn parse_machine(body: Mapping) -> Result<TemplateDoc, Error> {
    let doc: Machine = serde_yaml::from_value(Value::Mapping(body))?;
    Ok(TemplateDoc::Machine(doc))
}
