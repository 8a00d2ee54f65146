//! Integration tests for the trellis engine
//!
//! Tests are organized by the story they tell:
//!
//! - `sync_lifecycle`: stories about a cluster converging to its
//!   template over repeated syncs (first create, no-op re-sync,
//!   in-place update, scale down, pool removal)
//!
//! - `teardown`: stories about deleting whole clusters, finalizer-aware
//!   phased destruction and the cascading sweep of disconnected
//!   machines
//!
//! - `state_snapshot`: stories about persisting engine state to a local
//!   YAML file between CLI invocations

mod helpers;
mod state_snapshot;
mod sync_lifecycle;
mod teardown;
