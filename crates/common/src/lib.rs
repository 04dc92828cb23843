//! SiteMirror Common Library
//!
//! Shared types for the sync-validate-retry pipeline: routes, per-check
//! validation results, the persisted round report, and configuration.

pub mod config;
pub mod error;
pub mod report;
pub mod route;

// Re-export commonly used types
pub use config::{
    PathsConfig, RetryConfig, RetryMode, SiteConfig, SiteMirrorConfig, StructuralMode, SyncConfig,
    ToolCommand, ToolsConfig, ValidationConfig,
};
pub use error::{Error, Result};
pub use report::{CheckKind, Report, ReportEntry, ValidationResult};
pub use route::Route;

/// SiteMirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "sitemirror.toml";
