//! Skill runtime environment provisioning (Python venv / Node node_modules).

pub mod builder;
