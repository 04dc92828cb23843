//! SiteMirror configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Error, Result};

/// Top-level configuration, loaded from `sitemirror.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteMirrorConfig {
    pub site: SiteConfig,
    pub paths: PathsConfig,
    pub sync: SyncConfig,
    pub validation: ValidationConfig,
    pub retry: RetryConfig,
    pub tools: ToolsConfig,
}

/// The live site being mirrored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Base URL of the live site
    pub origin: String,

    /// Path of the URL index relative to the origin
    pub index_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            index_path: "sitemap.xml".to_string(),
        }
    }
}

/// Local inputs and outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the generated static artifact tree
    pub output_root: PathBuf,

    /// Shared fragment placed inside `<head>`
    pub head_fragment: PathBuf,

    /// Shared fragment placed at the top of `<body>`
    pub top_panel_fragment: PathBuf,

    /// Where the report is persisted after every round
    pub report_path: PathBuf,

    /// Diff visualization images, one per route
    pub diff_dir: PathBuf,

    /// Raw local/live screenshots
    pub screenshot_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("site"),
            head_fragment: PathBuf::from("fragments/head.html"),
            top_panel_fragment: PathBuf::from("fragments/top-panel.html"),
            report_path: PathBuf::from("validation-report.json"),
            diff_dir: PathBuf::from("diffs"),
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

/// Content synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Primary content selectors, in preference order
    pub content_selectors: Vec<String>,

    pub footer_selector: String,

    pub request_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            content_selectors: vec![
                "main".to_string(),
                "#content".to_string(),
                ".content".to_string(),
            ],
            footer_selector: "footer".to_string(),
            request_timeout_secs: 30,
            user_agent: format!("sitemirror/{}", crate::VERSION),
        }
    }
}

/// How primary-content markup is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralMode {
    /// `len(local) / len(live)` must reach the configured ratio
    #[default]
    LengthRatio,
    /// Inner markup must be byte-for-byte identical
    Exact,
}

impl std::str::FromStr for StructuralMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "length_ratio" | "length-ratio" | "ratio" => Ok(Self::LengthRatio),
            "exact" => Ok(Self::Exact),
            other => Err(Error::InvalidConfig(format!("unknown structural mode: {}", other))),
        }
    }
}

/// Validation round settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Port the local static server binds to
    pub port: u16,

    /// Delay between server start and the first request
    pub settle_delay_ms: u64,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Ceiling for every navigation, including network quiescence
    pub navigation_timeout_secs: u64,

    pub structural_mode: StructuralMode,
    pub structural_ratio_threshold: f64,

    /// Maximum differing pixels, in percent of the padded canvas
    pub visual_threshold_percent: f64,

    /// Per-pixel perceptual color distance threshold (0.0 - 1.0)
    pub pixel_color_threshold: f64,

    /// Minimum accessibility score from the scoring audit (0.0 - 1.0)
    pub accessibility_floor: f64,

    /// Ceiling for each external checker invocation
    pub tool_timeout_secs: u64,

    /// Remote debugging port of the shared browser, handed to the
    /// performance auditor
    pub debugging_port: u16,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            settle_delay_ms: 2000,
            viewport_width: 1920,
            viewport_height: 1080,
            navigation_timeout_secs: 60,
            structural_mode: StructuralMode::LengthRatio,
            structural_ratio_threshold: 0.99,
            visual_threshold_percent: 0.1,
            pixel_color_threshold: 0.1,
            accessibility_floor: 0.5,
            tool_timeout_secs: 300,
            debugging_port: 9222,
        }
    }
}

/// Termination policy of a validation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    #[default]
    Bounded,
    Unbounded,
}

/// Retry loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub mode: RetryMode,

    /// Maximum rounds in bounded mode
    pub max_rounds: u32,

    /// Run the best-effort repair pass between rounds
    pub repair: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mode: RetryMode::Bounded,
            max_rounds: 3,
            repair: true,
        }
    }
}

/// A program plus its leading arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand(pub Vec<String>);

impl ToolCommand {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Short name for logs and diagnostics
    pub fn display_name(&self) -> String {
        self.0.join(" ")
    }
}

/// External checker command lines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Runtime for browser automation scripts
    pub node: ToolCommand,
    pub markup: ToolCommand,
    pub style: ToolCommand,
    pub script: ToolCommand,
    pub spell: ToolCommand,
    pub accessibility: ToolCommand,
    pub links: ToolCommand,
    pub performance: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            node: ToolCommand::new(["node"]),
            markup: ToolCommand::new(["npx", "html-validate"]),
            style: ToolCommand::new(["npx", "stylelint"]),
            script: ToolCommand::new(["npx", "eslint"]),
            spell: ToolCommand::new(["npx", "cspell", "--no-progress"]),
            accessibility: ToolCommand::new(["npx", "pa11y"]),
            links: ToolCommand::new(["npx", "linkinator", "--recurse"]),
            performance: ToolCommand::new(["npx", "lighthouse"]),
        }
    }
}

impl SiteMirrorConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        self.origin_url()?;

        if self.sync.content_selectors.is_empty() {
            return Err(Error::InvalidConfig(
                "sync.content_selectors must name at least one selector".to_string(),
            ));
        }
        if self.retry.mode == RetryMode::Bounded && self.retry.max_rounds == 0 {
            return Err(Error::InvalidConfig(
                "retry.max_rounds must be at least 1 in bounded mode".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.pixel_color_threshold) {
            return Err(Error::InvalidConfig(
                "validation.pixel_color_threshold must be within 0.0 - 1.0".to_string(),
            ));
        }
        if self.validation.visual_threshold_percent < 0.0 {
            return Err(Error::InvalidConfig(
                "validation.visual_threshold_percent must not be negative".to_string(),
            ));
        }
        if self.validation.navigation_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "validation.navigation_timeout_secs must be at least 1".to_string(),
            ));
        }

        let tools = &self.tools;
        for (name, tool) in [
            ("node", &tools.node),
            ("markup", &tools.markup),
            ("style", &tools.style),
            ("script", &tools.script),
            ("spell", &tools.spell),
            ("accessibility", &tools.accessibility),
            ("links", &tools.links),
            ("performance", &tools.performance),
        ] {
            if tool.program().is_none() {
                return Err(Error::InvalidConfig(format!("tools.{} is empty", name)));
            }
        }

        Ok(())
    }

    /// The live origin as a URL
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.site.origin)
            .map_err(|e| Error::InvalidConfig(format!("site.origin {}: {}", self.site.origin, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "site.origin must be http(s): {}",
                self.site.origin
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SiteMirrorConfig::default();
        assert_eq!(config.validation.viewport_width, 1920);
        assert_eq!(config.validation.viewport_height, 1080);
        assert_eq!(config.validation.structural_ratio_threshold, 0.99);
        assert_eq!(config.validation.visual_threshold_percent, 0.1);
        assert_eq!(config.validation.accessibility_floor, 0.5);
        assert_eq!(config.retry.max_rounds, 3);
        assert_eq!(config.retry.mode, RetryMode::Bounded);
        assert_eq!(config.sync.content_selectors[0], "main");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let toml = r#"
[site]
origin = "https://www.example.org"

[validation]
structural_mode = "exact"

[retry]
mode = "unbounded"
"#;
        let config: SiteMirrorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.site.origin, "https://www.example.org");
        assert_eq!(config.site.index_path, "sitemap.xml");
        assert_eq!(config.validation.structural_mode, StructuralMode::Exact);
        assert_eq!(config.validation.port, 8080);
        assert_eq!(config.retry.mode, RetryMode::Unbounded);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SiteMirrorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.paths.output_root, PathBuf::from("site"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/sitemirror.toml");

        let mut config = SiteMirrorConfig::default();
        config.site.origin = "https://example.org".to_string();
        config.tools.links = ToolCommand::new(["linkinator", "--recurse", "--skip", "mailto:"]);
        config.save(&path).unwrap();

        let loaded = SiteMirrorConfig::load(&path).unwrap();
        assert_eq!(loaded.site.origin, "https://example.org");
        assert_eq!(loaded.tools.links.program(), Some("linkinator"));
        assert_eq!(loaded.tools.links.args().len(), 3);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = SiteMirrorConfig::default();
        config.site.origin = "ftp://example.org".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = SiteMirrorConfig::default();
        config.retry.max_rounds = 0;
        assert!(config.validate().is_err());

        config.retry.mode = RetryMode::Unbounded;
        assert!(config.validate().is_ok());

        let mut config = SiteMirrorConfig::default();
        config.tools.spell = ToolCommand(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_structural_mode_from_str() {
        assert_eq!("exact".parse::<StructuralMode>().unwrap(), StructuralMode::Exact);
        assert_eq!("length-ratio".parse::<StructuralMode>().unwrap(), StructuralMode::LengthRatio);
        assert!("fuzzy".parse::<StructuralMode>().is_err());
    }
}
