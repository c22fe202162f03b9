//! Playwright sidecar bridge
//!
//! Drives Playwright through a long-lived Node child process speaking a
//! JSON-lines protocol over stdio: one request `{id, method, params}` per
//! line in, one response `{id, ok, result|error}` per line out. Browser,
//! context and page handles live in the sidecar and are addressed by
//! numeric ids. Every request is bounded by a timeout on the Rust side in
//! addition to the timeout forwarded to Playwright itself.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::browser::{
    BrowserContext, BrowserPage, ScreenshotOptions, Viewport, WaitState, WaitUntil,
};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::session::state::Cookie;

/// Rust-side ceiling for requests that carry no Playwright timeout of
/// their own (cookie ops, handle creation, evaluate).
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra allowance on top of a Playwright-side timeout so Playwright's own
/// timeout error surfaces before the bridge gives up on the request.
const RPC_GRACE: Duration = Duration::from_secs(5);

const DRIVER_JS: &str = r#"
const readline = require('readline');
const { chromium } = require('playwright');

let browser = null;
const contexts = new Map();
const pages = new Map();

function ctx(p) {
  const c = contexts.get(p.contextId);
  if (!c) throw new Error('unknown context: ' + p.contextId);
  return c;
}

function pg(p) {
  const page = pages.get(p.pageId);
  if (!page) throw new Error('unknown page: ' + p.pageId);
  return page;
}

async function dispatch(method, p) {
  switch (method) {
    case 'ping':
      return 'pong';
    case 'browser.launch':
      browser = await chromium.launch(p.options);
      return null;
    case 'context.new':
      contexts.set(p.contextId, await browser.newContext(p.options));
      return null;
    case 'context.addCookies':
      await ctx(p).addCookies(p.cookies);
      return null;
    case 'context.cookies':
      return await ctx(p).cookies();
    case 'context.clearCookies':
      await ctx(p).clearCookies();
      return null;
    case 'context.clearPermissions':
      await ctx(p).clearPermissions();
      return null;
    case 'context.setDefaultTimeout':
      ctx(p).setDefaultTimeout(p.timeoutMs);
      return null;
    case 'context.close':
      await ctx(p).close();
      contexts.delete(p.contextId);
      return null;
    case 'page.new':
      pages.set(p.pageId, await ctx(p).newPage());
      return null;
    case 'page.goto':
      await pg(p).goto(p.url, { waitUntil: p.waitUntil, timeout: p.timeoutMs });
      return null;
    case 'page.evaluate':
      return await pg(p).evaluate(p.expression);
    case 'page.fill':
      await pg(p).fill(p.selector, p.value, { timeout: p.timeoutMs });
      return null;
    case 'page.click':
      await pg(p).locator(p.selector).first().click({ timeout: p.timeoutMs });
      return null;
    case 'page.waitForSelector':
      await pg(p).waitForSelector(p.selector, { state: p.state, timeout: p.timeoutMs });
      return null;
    case 'page.waitForURL':
      await pg(p).waitForURL(new RegExp(p.pattern), { timeout: p.timeoutMs });
      return null;
    case 'page.screenshot':
      await pg(p).screenshot({
        path: p.path,
        fullPage: p.fullPage,
        timeout: p.timeoutMs,
        animations: p.disableAnimations ? 'disabled' : 'allow',
      });
      return null;
    case 'page.url':
      return pg(p).url();
    case 'page.title':
      return await pg(p).title();
    case 'page.content':
      return await pg(p).content();
    case 'page.routeAbortAll':
      await pg(p).route('**/*', route => route.abort());
      return null;
    case 'page.setDefaultTimeout':
      pg(p).setDefaultTimeout(p.timeoutMs);
      return null;
    case 'page.setDefaultNavigationTimeout':
      pg(p).setDefaultNavigationTimeout(p.timeoutMs);
      return null;
    case 'page.close':
      await pg(p).close({ runBeforeUnload: p.runBeforeUnload });
      pages.delete(p.pageId);
      return null;
    case 'shutdown':
      if (browser) await browser.close().catch(() => {});
      process.exit(0);
    default:
      throw new Error('unknown method: ' + method);
  }
}

function reply(payload) {
  process.stdout.write(JSON.stringify(payload) + '\n');
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let req;
  try {
    req = JSON.parse(line);
  } catch (e) {
    return;
  }
  try {
    const result = await dispatch(req.method, req.params || {});
    reply({ id: req.id, ok: true, result: result === undefined ? null : result });
  } catch (err) {
    reply({ id: req.id, ok: false, error: String((err && err.message) || err) });
  }
});
rl.on('close', async () => {
  if (browser) await browser.close().catch(() => {});
  process.exit(0);
});
"#;

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Browser launch parameters, serialized as Playwright launch options.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub headless: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_default_args: Vec<String>,
}

impl LaunchOptions {
    /// Launch options for the current environment: headless is forced in
    /// CI along with the sandbox flags CI runners need, and outside CI a
    /// system Chrome is preferred when one can be found.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut options = Self {
            headless: config.headless,
            executable_path: None,
            args: Vec::new(),
            ignore_default_args: vec!["--disable-extensions".to_string()],
        };

        if config.ci {
            options.headless = true;
            options.args.push("--no-sandbox".to_string());
            options.args.push("--disable-dev-shm-usage".to_string());
        } else {
            options.executable_path = detect_chrome(config.chrome_bin.as_deref());
        }

        options
    }

    /// Isolate the browser's profile data under a dedicated directory.
    pub fn with_user_data_dir(mut self, dir: &Path) -> Self {
        self.args
            .push(format!("--user-data-dir={}", dir.display()));
        self
    }
}

/// Pick the browser executable: explicit override first, then the platform
/// default install location, skipped entirely when neither exists so
/// Playwright falls back to its bundled Chromium.
fn detect_chrome(override_path: Option<&Path>) -> Option<PathBuf> {
    let default = if cfg!(windows) {
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe")
    } else {
        PathBuf::from("/opt/google/chrome/chrome")
    };

    let candidate = override_path.map(Path::to_path_buf).unwrap_or(default);
    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
struct RecordVideo {
    dir: PathBuf,
}

/// Context creation parameters, serialized as Playwright context options.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOptions {
    pub viewport: Viewport,
    pub timezone_id: String,
    pub locale: String,
    pub permissions: Vec<String>,
    pub color_scheme: String,

    #[serde(rename = "bypassCSP", skip_serializing_if = "std::ops::Not::not")]
    pub bypass_csp: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub accept_downloads: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    record_video: Option<RecordVideo>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timezone_id: "America/Sao_Paulo".to_string(),
            locale: "pt-BR".to_string(),
            permissions: vec!["geolocation".to_string()],
            color_scheme: "light".to_string(),
            bypass_csp: false,
            accept_downloads: false,
            user_agent: None,
            record_video: None,
        }
    }
}

impl ContextOptions {
    /// Context options for the current environment. CI gets the extra
    /// flags scenario runs need there: CSP bypass, download acceptance and
    /// a pinned Linux user agent.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut options = Self::default();

        if config.ci {
            options.bypass_csp = true;
            options.accept_downloads = true;
            options.user_agent = Some(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            );
        }

        options
    }

    pub fn with_video_dir(mut self, dir: PathBuf) -> Self {
        self.record_video = Some(RecordVideo { dir });
        self
    }
}

struct BridgeInner {
    stdin: Mutex<ChildStdin>,
    lines: Mutex<Lines<BufReader<ChildStdout>>>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    // Keeps the driver script alive for the child's lifetime.
    _workdir: tempfile::TempDir,
}

/// Handle to the sidecar process. Cheap to clone; context and page handles
/// hold one.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Verify the Playwright CLI is available.
    pub fn check_playwright() -> HarnessResult<()> {
        let status = std::process::Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }

    /// Spawn the sidecar and confirm it responds.
    pub async fn spawn() -> HarnessResult<Self> {
        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("driver.js");
        std::fs::write(&script_path, DRIVER_JS)?;

        debug!("spawning playwright sidecar: {}", script_path.display());

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Bridge(format!("failed to spawn node: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Bridge("sidecar stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Bridge("sidecar stdout not captured".to_string()))?;

        let bridge = Self {
            inner: Arc::new(BridgeInner {
                stdin: Mutex::new(stdin),
                lines: Mutex::new(BufReader::new(stdout).lines()),
                child: Mutex::new(child),
                next_id: AtomicU64::new(1),
                _workdir: workdir,
            }),
        };

        bridge.send("ping", json!({}), RPC_TIMEOUT).await?;
        Ok(bridge)
    }

    async fn send(&self, method: &str, params: Value, timeout: Duration) -> HarnessResult<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&BridgeRequest { id, method, params })?;

        {
            let mut stdin = self.inner.stdin.lock().await;
            stdin.write_all(frame.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        let receive = async {
            let mut lines = self.inner.lines.lock().await;
            loop {
                match lines.next_line().await? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        let response: BridgeResponse = match serde_json::from_str(&line) {
                            Ok(r) => r,
                            Err(_) => {
                                debug!("sidecar noise: {line}");
                                continue;
                            }
                        };
                        // Replies to requests that already timed out are
                        // drained and dropped here.
                        if response.id != id {
                            continue;
                        }
                        return if response.ok {
                            Ok(response.result.unwrap_or(Value::Null))
                        } else {
                            Err(HarnessError::Bridge(
                                response
                                    .error
                                    .unwrap_or_else(|| "unknown sidecar error".to_string()),
                            ))
                        };
                    }
                    None => {
                        return Err(HarnessError::Protocol(
                            "sidecar closed its stdout".to_string(),
                        ))
                    }
                }
            }
        };

        tokio::time::timeout(timeout, receive)
            .await
            .map_err(|_| HarnessError::Timeout {
                operation: method.to_string(),
                duration: timeout,
            })?
    }

    /// Launch the browser inside the sidecar.
    pub async fn launch(&self, options: &LaunchOptions) -> HarnessResult<()> {
        info!(
            "launching browser (headless: {}, executable override: {})",
            options.headless,
            options.executable_path.is_some()
        );
        self.send(
            "browser.launch",
            json!({ "options": options }),
            Duration::from_secs(60),
        )
        .await?;
        Ok(())
    }

    /// Create a new browser context.
    pub async fn new_context(&self, options: &ContextOptions) -> HarnessResult<BridgeContext> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.send(
            "context.new",
            json!({ "contextId": id, "options": options }),
            RPC_TIMEOUT,
        )
        .await?;
        Ok(BridgeContext {
            bridge: self.clone(),
            id,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Ask the sidecar to close the browser and exit, escalating to
    /// SIGTERM and finally a kill if it lingers.
    pub async fn shutdown(&self) {
        let _ = self.send("shutdown", json!({}), Duration::from_secs(10)).await;

        let mut child = self.inner.child.lock().await;

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        if let Err(e) = child.kill().await {
            debug!("sidecar already gone: {e}");
        }
        let _ = child.wait().await;
    }
}

/// A context handle living in the sidecar.
pub struct BridgeContext {
    bridge: Bridge,
    id: u64,
    closed: Arc<AtomicBool>,
}

impl BridgeContext {
    /// Open a page in this context.
    pub async fn new_page(&self) -> HarnessResult<BridgePage> {
        let page_id = self.bridge.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.bridge
            .send(
                "page.new",
                json!({ "contextId": self.id, "pageId": page_id }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(BridgePage {
            bridge: self.bridge.clone(),
            id: page_id,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl BrowserContext for BridgeContext {
    async fn add_cookies(&self, cookies: &[Cookie]) -> HarnessResult<()> {
        self.bridge
            .send(
                "context.addCookies",
                json!({ "contextId": self.id, "cookies": cookies }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn cookies(&self) -> HarnessResult<Vec<Cookie>> {
        let value = self
            .bridge
            .send("context.cookies", json!({ "contextId": self.id }), RPC_TIMEOUT)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn clear_cookies(&self) -> HarnessResult<()> {
        self.bridge
            .send(
                "context.clearCookies",
                json!({ "contextId": self.id }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn clear_permissions(&self) -> HarnessResult<()> {
        self.bridge
            .send(
                "context.clearPermissions",
                json!({ "contextId": self.id }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn set_default_timeout(&self, timeout: Duration) -> HarnessResult<()> {
        self.bridge
            .send(
                "context.setDefaultTimeout",
                json!({ "contextId": self.id, "timeoutMs": timeout.as_millis() as u64 }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> HarnessResult<()> {
        self.bridge
            .send("context.close", json!({ "contextId": self.id }), RPC_TIMEOUT)
            .await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A page handle living in the sidecar.
pub struct BridgePage {
    bridge: Bridge,
    id: u64,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BrowserPage for BridgePage {
    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.goto",
                json!({
                    "pageId": self.id,
                    "url": url,
                    "waitUntil": wait_until.as_str(),
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                timeout + RPC_GRACE,
            )
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> HarnessResult<Value> {
        self.bridge
            .send(
                "page.evaluate",
                json!({ "pageId": self.id, "expression": expression }),
                RPC_TIMEOUT,
            )
            .await
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.fill",
                json!({
                    "pageId": self.id,
                    "selector": selector,
                    "value": value,
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                timeout + RPC_GRACE,
            )
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.click",
                json!({
                    "pageId": self.id,
                    "selector": selector,
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                timeout + RPC_GRACE,
            )
            .await?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.waitForSelector",
                json!({
                    "pageId": self.id,
                    "selector": selector,
                    "state": state.as_str(),
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                timeout + RPC_GRACE,
            )
            .await?;
        Ok(())
    }

    async fn wait_for_url(&self, pattern: &str, timeout: Duration) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.waitForURL",
                json!({
                    "pageId": self.id,
                    "pattern": pattern,
                    "timeoutMs": timeout.as_millis() as u64,
                }),
                timeout + RPC_GRACE,
            )
            .await?;
        Ok(())
    }

    async fn screenshot_to(
        &self,
        path: &Path,
        options: &ScreenshotOptions,
    ) -> HarnessResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.bridge
            .send(
                "page.screenshot",
                json!({
                    "pageId": self.id,
                    "path": path,
                    "fullPage": options.full_page,
                    "timeoutMs": options.timeout.as_millis() as u64,
                    "disableAnimations": options.disable_animations,
                }),
                options.timeout + RPC_GRACE,
            )
            .await?;
        Ok(())
    }

    async fn url(&self) -> HarnessResult<String> {
        let value = self
            .bridge
            .send("page.url", json!({ "pageId": self.id }), RPC_TIMEOUT)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> HarnessResult<String> {
        let value = self
            .bridge
            .send("page.title", json!({ "pageId": self.id }), RPC_TIMEOUT)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&self) -> HarnessResult<String> {
        let value = self
            .bridge
            .send("page.content", json!({ "pageId": self.id }), RPC_TIMEOUT)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn abort_all_routes(&self) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.routeAbortAll",
                json!({ "pageId": self.id }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn set_default_timeout(&self, timeout: Duration) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.setDefaultTimeout",
                json!({ "pageId": self.id, "timeoutMs": timeout.as_millis() as u64 }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn set_default_navigation_timeout(&self, timeout: Duration) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.setDefaultNavigationTimeout",
                json!({ "pageId": self.id, "timeoutMs": timeout.as_millis() as u64 }),
                RPC_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn close(&self, run_before_unload: bool) -> HarnessResult<()> {
        self.bridge
            .send(
                "page.close",
                json!({ "pageId": self.id, "runBeforeUnload": run_before_unload }),
                RPC_TIMEOUT,
            )
            .await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
