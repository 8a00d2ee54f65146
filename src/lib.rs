//! Trellis - declarative cluster management for Talos Linux
//!
//! Trellis turns a multi-document cluster template into a live cluster:
//! it compiles the template into a typed resource graph, diffs that
//! graph against the state store, and converges the store through
//! ordered creates, updates and finalizer-aware phased destroys.
//!
//! # Pipeline
//!
//! ```text
//! documents --parse+validate--> Template --compile--> [Resource]
//!     --diff (vs store)--> ChangeSet --apply--> store mutated
//! ```
//!
//! Each stage is usable on its own: `validate` stops after the first
//! arrow, `render` after the second, `diff` after the third and `sync`
//! runs the whole pipeline.
//!
//! # Modules
//!
//! - [`template`] - typed document model, parsing and validation
//! - [`compiler`] - translation of templates into resource graphs
//! - [`resource`] - the resource model shared by every stage
//! - [`diff`] - change detection between compiled and live state
//! - [`apply`] - change set execution with phased teardown
//! - [`store`] - store abstraction and the in-memory implementation
//! - [`error`] - error types for the engine

#![deny(missing_docs)]

pub mod apply;
pub mod compiler;
pub mod diff;
pub mod error;
pub mod resource;
pub mod store;
pub mod template;

pub use error::{Error, ValidationErrors};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-Known Descriptors
// =============================================================================
// Labels and annotations the engine stamps on every resource it manages.
// Centralizing them here keeps the compiler, diff scoping and cascade
// discovery agreeing on the same keys.

/// Namespace resources live in unless stated otherwise
pub const DEFAULT_NAMESPACE: &str = "default";

/// Label carrying the name of the cluster a resource belongs to
pub const LABEL_CLUSTER: &str = "trellis.dev/cluster";

/// Label carrying the ID of the machine set a resource belongs to
pub const LABEL_MACHINE_SET: &str = "trellis.dev/machine-set";

/// Label carrying the ID of the machine a resource is scoped to
pub const LABEL_MACHINE: &str = "trellis.dev/machine";

/// Label carrying the role of a machine set
pub const LABEL_ROLE: &str = "trellis.dev/role";

/// Annotation marking a machine whose configuration must not change
pub const ANNOTATION_LOCKED: &str = "trellis.dev/locked";
