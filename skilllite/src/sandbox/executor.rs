//! Thin adapter over the extracted `skilllite-sandbox` runner crate, kept so
//! the platform-specific modules in this directory (`macos`, `windows`) can
//! address it as `crate::sandbox::executor` the way they did before the
//! runner was pulled out into its own crate.

pub use skilllite_sandbox::runner::{
    run_in_sandbox_with_limits_and_level, ExecutionResult, ResourceLimits, RuntimePaths,
    SandboxConfig, SandboxLevel,
};
