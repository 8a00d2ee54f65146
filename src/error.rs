//! Error types for the trellis engine

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for trellis operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Template document could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Template document declares a kind the registry does not know
    #[error("unknown document kind {0:?}")]
    UnknownKind(String),

    /// Template failed validation; carries every rule violation found
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Template could not be translated into resources
    #[error("translate error: {0}")]
    Translate(String),

    /// Resource store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Watch session ended abnormally
    #[error("watch error: {0}")]
    Watch(String),

    /// Operation was canceled before it completed
    #[error("operation canceled")]
    Canceled,

    /// Filesystem error while reading templates, patches or state
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a parse error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a translate error with the given message
    pub fn translate(msg: impl Into<String>) -> Self {
        Self::Translate(msg.into())
    }

    /// Create a watch error with the given message
    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }
}

/// Collected rule violations from template validation.
///
/// Validation never stops at the first broken rule; every document is
/// checked and every violation is recorded, so the user can fix a
/// template in one pass instead of replaying validate-fix cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<String>,
}

impl ValidationErrors {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation
    pub fn push(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Number of violations recorded
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no violation has been recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the recorded violations
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    /// Convert into a `Result`: `Ok` when empty, `Err(self)` otherwise
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "template validation failed with {} error(s):",
            self.errors.len()
        )?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
