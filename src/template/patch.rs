//! Configuration patch model
//!
//! Patches appear as list entries on Cluster, ControlPlane, Workers and
//! Machine documents; they are not a top-level document kind. Each patch
//! names its content either inline or as a file reference and compiles
//! to one `ConfigPatch` resource scoped to the document that declared
//! it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::resource::{ids, ConfigPatchSpec, Resource, ResourceData};
use crate::Error;

/// Weight assigned to patches that do not specify one
pub const DEFAULT_PATCH_WEIGHT: u16 = 500;

/// Lowest weight a user patch may carry; weight 0 is reserved for
/// patches the engine generates itself
pub const MIN_PATCH_WEIGHT: u16 = 1;

/// Highest weight a user patch may carry
pub const MAX_PATCH_WEIGHT: u16 = 999;

/// One configuration patch declared on a template document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Patch {
    /// Name used in the compiled resource ID; required for inline
    /// patches without an ID override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Path to a file holding the patch content, relative to the
    /// template file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Patch content given directly in the template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<serde_yaml::Value>,

    /// Use this exact resource ID instead of the derived one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_override: Option<String>,

    /// Application order weight; lower weights apply first
    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: u16,
}

fn default_weight() -> u16 {
    DEFAULT_PATCH_WEIGHT
}

fn is_default_weight(weight: &u16) -> bool {
    *weight == DEFAULT_PATCH_WEIGHT
}

impl Default for Patch {
    fn default() -> Self {
        Self {
            name: None,
            file: None,
            inline: None,
            id_override: None,
            weight: DEFAULT_PATCH_WEIGHT,
        }
    }
}

impl Patch {
    /// Short description of the patch for error messages
    fn describe(&self) -> String {
        if let Some(name) = &self.name {
            return format!("patch {name:?}");
        }
        if let Some(file) = &self.file {
            return format!("patch file {:?}", file.display().to_string());
        }
        if let Some(id) = &self.id_override {
            return format!("patch {id:?}");
        }
        "patch".to_string()
    }

    /// Validates the patch, recording violations under the given scope.
    ///
    /// File-referenced content is read (relative to `base_dir`) and
    /// checked here so a template validates fully before any store
    /// access happens.
    pub fn validate(&self, scope: &str, base_dir: Option<&Path>, errors: &mut ValidationErrors) {
        let desc = self.describe();

        match (&self.file, &self.inline) {
            (Some(_), Some(_)) => {
                errors.push(format!(
                    "{scope}: {desc}: file and inline are mutually exclusive"
                ));
                return;
            }
            (None, None) => {
                errors.push(format!(
                    "{scope}: {desc} must specify either file or inline content"
                ));
                return;
            }
            _ => {}
        }

        if self.inline.is_some() && self.name.is_none() && self.id_override.is_none() {
            errors.push(format!(
                "{scope}: inline {desc} requires a name or an idOverride"
            ));
        }

        if let Some(id) = &self.id_override {
            if id.is_empty() {
                errors.push(format!("{scope}: {desc}: idOverride must not be empty"));
            }
        }

        if !(MIN_PATCH_WEIGHT..=MAX_PATCH_WEIGHT).contains(&self.weight) {
            errors.push(format!(
                "{scope}: {desc}: weight {} is out of range ({MIN_PATCH_WEIGHT}-{MAX_PATCH_WEIGHT})",
                self.weight
            ));
        }

        if let Some(inline) = &self.inline {
            if let Err(reason) = check_fragment(inline) {
                errors.push(format!("{scope}: {desc}: {reason}"));
            }
        }

        if let Some(file) = &self.file {
            match read_patch_file(file, base_dir) {
                Ok(text) => {
                    if let Err(reason) = check_fragment_text(&text) {
                        errors.push(format!("{scope}: {desc}: {reason}"));
                    }
                }
                Err(err) => {
                    errors.push(format!("{scope}: {desc}: {err}"));
                }
            }
        }
    }

    /// Resource ID this patch compiles to, given the scope prefix
    pub fn resource_id(&self, prefix: &str) -> Result<String, Error> {
        if let Some(id) = &self.id_override {
            return Ok(id.clone());
        }

        let name = match (&self.name, &self.file) {
            (Some(name), _) => name.clone(),
            (None, Some(file)) => file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            (None, None) => {
                return Err(Error::translate(
                    "patch has neither a name nor a file to derive an ID from",
                ))
            }
        };
        if name.is_empty() {
            return Err(Error::translate("patch name resolves to an empty string"));
        }
        Ok(ids::patch(self.weight, prefix, &name))
    }

    /// Compile this patch into a bare `ConfigPatch` resource.
    ///
    /// The caller attaches the scope labels. Content is resolved here:
    /// inline fragments are serialized canonically, file references are
    /// read relative to `base_dir`. Unreadable or malformed content
    /// aborts compilation even if validation was skipped.
    pub fn translate(&self, prefix: &str, base_dir: Option<&Path>) -> Result<Resource, Error> {
        let id = self.resource_id(prefix)?;
        let data = match (&self.inline, &self.file) {
            (Some(inline), None) => {
                check_fragment(inline)
                    .map_err(|reason| Error::translate(format!("{}: {reason}", self.describe())))?;
                serde_yaml::to_string(inline)?
            }
            (None, Some(file)) => {
                let text = read_patch_file(file, base_dir)
                    .map_err(|err| Error::translate(format!("{}: {err}", self.describe())))?;
                check_fragment_text(&text)
                    .map_err(|reason| Error::translate(format!("{}: {reason}", self.describe())))?;
                text
            }
            _ => {
                return Err(Error::translate(format!(
                    "{}: exactly one of file or inline content is required",
                    self.describe()
                )))
            }
        };

        Ok(Resource::new(id, ResourceData::ConfigPatch(ConfigPatchSpec { data })))
    }
}

fn read_patch_file(file: &Path, base_dir: Option<&Path>) -> Result<String, String> {
    let path = match base_dir {
        Some(base) if file.is_relative() => base.join(file),
        _ => file.to_path_buf(),
    };
    std::fs::read_to_string(&path)
        .map_err(|err| format!("cannot read {}: {err}", path.display()))
}

/// Checks that patch content is a configuration fragment: a YAML
/// mapping whose top-level keys are `machine` or `cluster`.
fn check_fragment(value: &serde_yaml::Value) -> Result<(), String> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| "patch content must be a YAML mapping".to_string())?;
    for key in mapping.keys() {
        let key = key
            .as_str()
            .ok_or_else(|| "patch content keys must be strings".to_string())?;
        if key != "machine" && key != "cluster" {
            return Err(format!(
                "unexpected top-level key {key:?} in patch content (expected machine or cluster)"
            ));
        }
    }
    Ok(())
}

fn check_fragment_text(text: &str) -> Result<(), String> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|err| format!("patch content is not valid YAML: {err}"))?;
    check_fragment(&value)
}
