//! Workspace-root-confined path validation.
//!
//! Re-exported from `skilllite-core` so commands that only need the
//! `skilllite_core::path_validation` path directly and commands that reach it
//! through `crate::path_validation` (the historical call site) resolve to the
//! same implementation.

pub use skilllite_core::path_validation::*;
