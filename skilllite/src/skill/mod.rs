//! Skill manifest parsing and dependency detection.
//!
//! `metadata` is shared across the workspace (skills, sandbox, env builder all
//! need the same `SkillMetadata` type), so it lives in `skilllite-core` and is
//! re-exported here; `deps` is specific to this binary's environment caching.

pub mod deps;

pub use skilllite_core::skill::metadata;
