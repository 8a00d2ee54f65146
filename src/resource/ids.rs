//! Naming conventions for compiled resource IDs
//!
//! Every resource the compiler emits gets a deterministic ID derived from
//! the cluster name and the document that produced it. The conventions
//! here are load-bearing: the diff matches target against live resources
//! by ID, so two compilations of the same template must agree exactly.

/// ID of the control plane machine set: `<cluster>-control-planes`
pub fn control_planes(cluster: &str) -> String {
    format!("{cluster}-control-planes")
}

/// ID of the default (unnamed) worker machine set: `<cluster>-workers`
pub fn workers(cluster: &str) -> String {
    format!("{cluster}-workers")
}

/// ID of a named worker machine set: `<cluster>-w<pool>`
pub fn worker_pool(cluster: &str, pool: &str) -> String {
    format!("{cluster}-w{pool}")
}

/// ID of a configuration patch: `<weight zero-padded to 3>-<prefix>-<name>`
///
/// The weight prefix makes lexical ID order equal application order, so
/// listings read in the order patches take effect.
pub fn patch(weight: u16, prefix: &str, name: &str) -> String {
    format!("{weight:03}-{prefix}-{name}")
}

/// ID of a schematic configuration: `schematic-<scope>`
///
/// The scope is the ID of the machine set or machine the schematic
/// belongs to.
pub fn schematic(scope: &str) -> String {
    format!("schematic-{scope}")
}
