//! Browser seam: the traits the session subsystem drives
//!
//! The browser-automation library is an external collaborator. The harness
//! core only sees these two traits, borrowed per scenario from the runner;
//! the Playwright sidecar in [`crate::bridge`] implements them for real
//! runs and the lifecycle tests implement them in-memory.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessResult;
use crate::session::state::Cookie;

/// Load states a navigation can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::Load => "load",
            WaitUntil::NetworkIdle => "networkidle",
        }
    }
}

/// Element states a selector wait can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub timeout: Duration,
    pub disable_animations: bool,
}

impl ScreenshotOptions {
    pub fn full_page(timeout: Duration) -> Self {
        Self {
            full_page: true,
            timeout,
            disable_animations: true,
        }
    }

    pub fn viewport(timeout: Duration) -> Self {
        Self {
            full_page: false,
            timeout,
            disable_animations: true,
        }
    }
}

/// Cookie, permission and lifetime operations on a browser context.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn add_cookies(&self, cookies: &[Cookie]) -> HarnessResult<()>;

    async fn cookies(&self) -> HarnessResult<Vec<Cookie>>;

    async fn clear_cookies(&self) -> HarnessResult<()>;

    async fn clear_permissions(&self) -> HarnessResult<()>;

    async fn set_default_timeout(&self, timeout: Duration) -> HarnessResult<()>;

    async fn close(&self) -> HarnessResult<()>;

    async fn is_closed(&self) -> bool;
}

/// Navigation, interaction and capture operations on a page. Every
/// operation carries an explicit timeout; expiry surfaces as a typed
/// error, never a hang.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration)
        -> HarnessResult<()>;

    /// Evaluate a JavaScript expression in the page and return its value.
    async fn evaluate(&self, expression: &str) -> HarnessResult<Value>;

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> HarnessResult<()>;

    async fn click(&self, selector: &str, timeout: Duration) -> HarnessResult<()>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> HarnessResult<()>;

    /// Wait until the page URL matches a regular expression.
    async fn wait_for_url(&self, pattern: &str, timeout: Duration) -> HarnessResult<()>;

    /// Capture a screenshot directly to `path`.
    async fn screenshot_to(&self, path: &Path, options: &ScreenshotOptions) -> HarnessResult<()>;

    async fn url(&self) -> HarnessResult<String>;

    async fn title(&self) -> HarnessResult<String>;

    /// Current page HTML, for failure diagnostics.
    async fn content(&self) -> HarnessResult<String>;

    /// Abort every in-flight and future network request on this page.
    async fn abort_all_routes(&self) -> HarnessResult<()>;

    async fn set_default_timeout(&self, timeout: Duration) -> HarnessResult<()>;

    async fn set_default_navigation_timeout(&self, timeout: Duration) -> HarnessResult<()>;

    async fn close(&self, run_before_unload: bool) -> HarnessResult<()>;

    async fn is_closed(&self) -> bool;
}
