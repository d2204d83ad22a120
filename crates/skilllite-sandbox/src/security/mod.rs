//! Security module for skilllite-sandbox.
//!
//! Three complementary layers:
//!
//! - **Static scanning** (scanner, rules, default_rules): Pre-execution analysis
//!   of script source to detect dangerous patterns (eval, subprocess, etc.)
//!
//! - **Supply chain audit** (dependency_audit, feature `audit`): Checks
//!   dependencies declared in requirements.txt / package.json against the
//!   OSV.dev vulnerability database.
//!
//! - **Runtime policy** (policy): Sandbox isolation rules — deny paths, process
//!   denylist, network policy — translated by macOS/Linux into Seatbelt/bwrap
//!
//! Submodules:
//! - **types**: Core type definitions (SecurityIssue, SecuritySeverity, etc.)
//! - **rules**: Rule definitions and configuration loading
//! - **default_rules**: Built-in security rules for Python and JavaScript
//! - **scanner**: The main ScriptScanner implementation
//! - **dependency_audit**: Supply chain vulnerability scanning via OSV API
//! - **policy**: Canonical sandbox runtime policy (paths, processes, network)
//!
//! # Example
//!
//! ```rust,ignore
//! use skilllite_sandbox::security::{ScriptScanner, format_scan_result};
//! use std::path::Path;
//!
//! let scanner = ScriptScanner::new()
//!     .allow_network(true)
//!     .disable_rules(&["py-file-open"]);
//!
//! let result = scanner.scan_file(Path::new("script.py"))?;
//! println!("{}", format_scan_result(&result));
//! ```

pub mod default_rules;
#[cfg(feature = "audit")]
pub mod dependency_audit;
pub mod malicious_packages;
pub mod policy;
pub mod rules;
pub mod scanner;
pub mod types;

#[allow(unused_imports)]
pub use default_rules::{get_default_javascript_rules, get_default_python_rules, get_default_rules};
#[allow(unused_imports)]
pub use rules::{RulesConfig, SecurityRule, CONFIG_FILE_NAMES};
pub use scanner::{format_scan_result, format_scan_result_compact, format_scan_result_json, ScriptScanner};
#[allow(unused_imports)]
pub use types::{ScanResult, SecurityIssue, SecurityIssueType, SecuritySeverity};
