//! Headless browser automation via Playwright
//!
//! One browser server is launched per round ([`BrowserEngine::launch`]).
//! Every page operation runs a short node script that connects to it,
//! opens a fresh context and page, does its work and closes both again
//! in a `finally` block, so pages are never shared between routes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sitemirror_common::{ToolCommand, ValidationConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ValidateError, ValidateResult};

/// How long the browser server may take to print its endpoint
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack on top of the navigation timeout for connecting and closing
const SCRIPT_GRACE: Duration = Duration::from_secs(15);

/// Page-level operations the diff engines need from a browser
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to `url`, wait for network quiescence and return the inner
    /// markup of the first element matching one of `selectors`, or `None`
    /// when none matches
    async fn inner_html(&self, url: &str, selectors: &[String]) -> ValidateResult<Option<String>>;

    /// Navigate to `url`, wait for network quiescence and write a
    /// full-page PNG screenshot to `path`
    async fn screenshot(&self, url: &str, path: &Path) -> ValidateResult<()>;
}

/// Browser settings for one round
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub node: ToolCommand,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout: Duration,
    /// Remote debugging port exposed for the performance auditor
    pub debugging_port: u16,
}

impl BrowserConfig {
    pub fn from_validation(validation: &ValidationConfig, node: ToolCommand) -> Self {
        Self {
            node,
            viewport_width: validation.viewport_width,
            viewport_height: validation.viewport_height,
            navigation_timeout: Duration::from_secs(validation.navigation_timeout_secs),
            debugging_port: validation.debugging_port,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self::from_validation(&ValidationConfig::default(), ToolCommand::new(["node"]))
    }
}

#[derive(Debug, Deserialize)]
struct LaunchLine {
    #[serde(rename = "wsEndpoint")]
    ws_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ScriptLine {
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A running Playwright browser server shared by all routes of a round
pub struct BrowserEngine {
    config: BrowserConfig,
    child: Option<Child>,
    ws_endpoint: String,
    /// Scripts live here; kept under the working directory so `require`
    /// resolves the project's node_modules
    script_dir: tempfile::TempDir,
}

impl BrowserEngine {
    /// Launch the browser server and wait for its websocket endpoint
    pub async fn launch(config: BrowserConfig) -> ValidateResult<Self> {
        let program = config.node.program().ok_or_else(|| {
            ValidateError::ResourceLifecycle("no node runtime configured".to_string())
        })?;

        let script_dir = tempfile::Builder::new()
            .prefix(".sitemirror-browser-")
            .tempdir_in(".")
            .map_err(|e| ValidateError::ResourceLifecycle(format!("cannot create script dir: {}", e)))?;
        let script_path = script_dir.path().join("launch.js");
        std::fs::write(&script_path, launch_script(config.debugging_port)).map_err(|e| {
            ValidateError::ResourceLifecycle(format!("cannot write launch script: {}", e))
        })?;

        info!("Launching headless browser (debugging port {})", config.debugging_port);

        let mut child = Command::new(program)
            .args(config.node.args())
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ValidateError::ResourceLifecycle(format!("cannot start {}: {}", program, e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ValidateError::ResourceLifecycle("browser server stdout unavailable".to_string())
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let line = match timeout(LAUNCH_TIMEOUT, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                return Err(ValidateError::ResourceLifecycle(
                    "browser server exited before reporting its endpoint".to_string(),
                ))
            }
            Ok(Err(e)) => {
                return Err(ValidateError::ResourceLifecycle(format!(
                    "cannot read browser server output: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(ValidateError::ResourceLifecycle(format!(
                    "browser server did not start within {}s",
                    LAUNCH_TIMEOUT.as_secs()
                )))
            }
        };

        let launch: LaunchLine = serde_json::from_str(line.trim()).map_err(|e| {
            ValidateError::ResourceLifecycle(format!("unexpected browser server output {:?}: {}", line, e))
        })?;
        debug!("Browser server listening at {}", launch.ws_endpoint);

        Ok(Self {
            config,
            child: Some(child),
            ws_endpoint: launch.ws_endpoint,
            script_dir,
        })
    }

    /// Port a CDP client such as the performance auditor connects to
    pub fn debugging_port(&self) -> u16 {
        self.config.debugging_port
    }

    /// Shut the browser server down
    pub async fn close(mut self) -> ValidateResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("Closing headless browser");

        // Closing stdin asks the launch script to shut down cleanly
        drop(child.stdin.take());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match timeout(Duration::from_secs(10), child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ValidateError::ResourceLifecycle(format!(
                "waiting for browser server failed: {}",
                e
            ))),
            Err(_) => {
                warn!("Browser server ignored shutdown, killing it");
                child.kill().await.map_err(|e| {
                    ValidateError::ResourceLifecycle(format!("cannot kill browser server: {}", e))
                })
            }
        }
    }

    /// Run one page script against the shared browser
    async fn run_page_script(&self, url: &str, action: &str) -> ValidateResult<ScriptLine> {
        let program = self
            .config
            .node
            .program()
            .ok_or_else(|| ValidateError::Browser("no node runtime configured".to_string()))?;

        let script = page_script(
            &self.ws_endpoint,
            url,
            self.config.viewport_width,
            self.config.viewport_height,
            self.config.navigation_timeout,
            action,
        );
        let script_file = tempfile::Builder::new()
            .prefix("page-")
            .suffix(".js")
            .tempfile_in(self.script_dir.path())?;
        std::fs::write(script_file.path(), script)?;

        let mut command = Command::new(program);
        command
            .args(self.config.node.args())
            .arg(script_file.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let run = command.output();

        let ceiling = self.config.navigation_timeout + SCRIPT_GRACE;
        let output = match timeout(ceiling, run).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ValidateError::NavigationTimeout {
                    url: url.to_string(),
                    seconds: ceiling.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let line = stdout
            .lines()
            .chain(stderr.lines())
            .rev()
            .find_map(|l| serde_json::from_str::<ScriptLine>(l.trim()).ok());

        match line {
            Some(ScriptLine { error: Some(e), .. }) if e.contains("Timeout") => {
                Err(ValidateError::NavigationTimeout {
                    url: url.to_string(),
                    seconds: self.config.navigation_timeout.as_secs(),
                })
            }
            Some(ScriptLine { error: Some(e), .. }) => Err(ValidateError::Browser(e)),
            Some(line) if output.status.success() => Ok(line),
            _ => Err(ValidateError::Browser(format!(
                "page script for {} failed:\nstdout: {}\nstderr: {}",
                url, stdout, stderr
            ))),
        }
    }
}

#[async_trait]
impl PageDriver for BrowserEngine {
    async fn inner_html(&self, url: &str, selectors: &[String]) -> ValidateResult<Option<String>> {
        let action = format!(
            r#"    const html = await page.evaluate((selectors) => {{
      for (const selector of selectors) {{
        const el = document.querySelector(selector);
        if (el) return el.innerHTML;
      }}
      return null;
    }}, {selectors});
    console.log(JSON.stringify({{ html }}));"#,
            selectors = js_literal(&selectors)
        );

        Ok(self.run_page_script(url, &action).await?.html)
    }

    async fn screenshot(&self, url: &str, path: &Path) -> ValidateResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let absolute: PathBuf = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let action = format!(
            r#"    await page.screenshot({{ path: {path}, fullPage: true }});
    console.log(JSON.stringify({{ ok: true }}));"#,
            path = js_literal(&absolute.to_string_lossy())
        );

        self.run_page_script(url, &action).await.map(|_| ())
    }
}

impl Drop for BrowserEngine {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("Browser engine dropped without close()");
            let _ = child.start_kill();
        }
    }
}

/// Encode a value as a JavaScript literal
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Script that launches the browser server and keeps it alive until
/// stdin closes or a termination signal arrives
fn launch_script(debugging_port: u16) -> String {
    format!(
        r#"
const {{ chromium }} = require('playwright');

(async () => {{
  const server = await chromium.launchServer({{
    headless: true,
    args: ['--remote-debugging-port={port}'],
  }});
  console.log(JSON.stringify({{ wsEndpoint: server.wsEndpoint() }}));

  let closing = false;
  const shutdown = async () => {{
    if (closing) return;
    closing = true;
    await server.close();
    process.exit(0);
  }};
  process.on('SIGTERM', shutdown);
  process.on('SIGINT', shutdown);
  process.stdin.on('end', shutdown);
  process.stdin.resume();
}})().catch((error) => {{
  console.error(error.message);
  process.exit(1);
}});
"#,
        port = debugging_port
    )
}

/// Script that connects to the shared browser, opens one page, runs
/// `action` after navigation and always closes the page again
fn page_script(
    ws_endpoint: &str,
    url: &str,
    width: u32,
    height: u32,
    navigation_timeout: Duration,
    action: &str,
) -> String {
    format!(
        r#"
const {{ chromium }} = require('playwright');

(async () => {{
  const browser = await chromium.connect({ws});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  let exitCode = 0;

  try {{
    await page.goto({url}, {{ waitUntil: 'networkidle', timeout: {timeout_ms} }});
{action}
  }} catch (error) {{
    console.error(JSON.stringify({{ error: error.message }}));
    exitCode = 1;
  }} finally {{
    await page.close();
    await context.close();
    await browser.close();
  }}
  process.exit(exitCode);
}})().catch((error) => {{
  console.error(JSON.stringify({{ error: error.message }}));
  process.exit(1);
}});
"#,
        ws = js_literal(ws_endpoint),
        url = js_literal(url),
        width = width,
        height = height,
        timeout_ms = navigation_timeout.as_millis(),
        action = action,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_script_escapes_inputs() {
        let script = page_script(
            "ws://127.0.0.1:4000/abc",
            "http://127.0.0.1:8080/it's",
            1920,
            1080,
            Duration::from_secs(60),
            "    console.log('x');",
        );

        assert!(script.contains(r#"chromium.connect("ws://127.0.0.1:4000/abc")"#));
        assert!(script.contains(r#"page.goto("http://127.0.0.1:8080/it's", { waitUntil: 'networkidle', timeout: 60000 })"#));
        assert!(script.contains("viewport: { width: 1920, height: 1080 }"));
        assert!(script.contains("await page.close();"));
        assert!(script.contains("await context.close();"));
    }

    #[test]
    fn test_launch_script_exposes_debugging_port() {
        let script = launch_script(9333);
        assert!(script.contains("--remote-debugging-port=9333"));
        assert!(script.contains("wsEndpoint"));
    }

    #[test]
    fn test_js_literal() {
        assert_eq!(js_literal("a\"b"), r#""a\"b""#);
        assert_eq!(js_literal(&vec!["main".to_string(), "#content".to_string()]), r##"["main","#content"]"##);
    }

    #[test]
    fn test_browser_config_defaults() {
        let config = BrowserConfig::default();
        assert_eq!((config.viewport_width, config.viewport_height), (1920, 1080));
        assert_eq!(config.navigation_timeout, Duration::from_secs(60));
    }
}
