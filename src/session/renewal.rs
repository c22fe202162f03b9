//! Decides whether the stored session is stale and performs a real login
//! to mint a fresh one
//!
//! Runs exactly once per invocation, before any scenario executes, with
//! its own isolated browser. Only this engine writes the `profile` session
//! file.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::artifacts::ArtifactPaths;
use crate::bridge::{Bridge, ContextOptions, LaunchOptions};
use crate::browser::{BrowserContext, BrowserPage, ScreenshotOptions, WaitUntil};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::session::store::{SessionKind, SessionStore};

/// Cookie carrying the auth token in the application under test.
pub const AUTH_COOKIE_NAME: &str = "wtk";

/// A token expiring within this margin is renewed preemptively.
pub const RENEWAL_SAFETY_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Existing sessions were valid and are reused.
    Reused,
    /// A fresh login succeeded and the profile session was rewritten.
    Renewed,
    /// Login failed, but the non-CI policy lets the run continue.
    FailedButTolerated(String),
}

pub struct RenewalEngine<'a> {
    config: &'a HarnessConfig,
    store: &'a SessionStore,
    artifacts: &'a ArtifactPaths,
}

impl<'a> RenewalEngine<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        store: &'a SessionStore,
        artifacts: &'a ArtifactPaths,
    ) -> Self {
        Self {
            config,
            store,
            artifacts,
        }
    }

    pub fn should_renew(&self) -> bool {
        self.evaluate(SystemTime::now())
    }

    fn evaluate(&self, now: SystemTime) -> bool {
        // CI runners get a fresh session unless the selected suites depend
        // on reusing one.
        if self.config.ci && !self.config.requires_persistent_session() {
            info!("CI detected, renewing session");
            return true;
        }

        let user_exists = self.store.exists(SessionKind::User);
        let profile_exists = self.store.exists(SessionKind::Profile);
        if !user_exists || !profile_exists {
            info!("sessions absent: user={user_exists}, profile={profile_exists}");
            return true;
        }

        let Some(session) = self.store.load(SessionKind::Profile) else {
            // Unreadable counts as absent.
            return true;
        };

        match session.cookie(AUTH_COOKIE_NAME) {
            Some(cookie) if cookie.expires > 0.0 => {
                let now_secs = now
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                if now_secs > cookie.expires - RENEWAL_SAFETY_MARGIN.as_secs_f64() {
                    info!("auth token expired or close to expiry");
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Evaluate staleness and, if needed, drive a real login. Called once
    /// before scenario execution begins.
    pub async fn run(&self) -> HarnessResult<RenewalOutcome> {
        if !self.should_renew() {
            info!("valid sessions found, reusing");
            return Ok(RenewalOutcome::Reused);
        }

        info!(
            "session invalid or absent, logging in (environment: {})",
            self.config.environment
        );
        self.config.validate_login()?;

        match self.perform_renewal().await {
            Ok(()) => Ok(RenewalOutcome::Renewed),
            Err(e) => self.absorb_failure(e),
        }
    }

    fn absorb_failure(&self, error: HarnessError) -> HarnessResult<RenewalOutcome> {
        if self.config.ci || self.config.fail_fast_outside_ci {
            Err(error)
        } else {
            warn!("login failed, continuing by policy: {error}");
            Ok(RenewalOutcome::FailedButTolerated(error.to_string()))
        }
    }

    async fn perform_renewal(&self) -> HarnessResult<()> {
        Bridge::check_playwright()?;
        let bridge = Bridge::spawn().await?;
        let result = self.login_with(&bridge).await;
        bridge.shutdown().await;
        result
    }

    async fn login_with(&self, bridge: &Bridge) -> HarnessResult<()> {
        let user_data = self.artifacts.unique_user_data_dir("renewal")?;
        let launch = LaunchOptions::from_config(self.config).with_user_data_dir(&user_data);
        bridge.launch(&launch).await?;

        let context = bridge
            .new_context(&ContextOptions::from_config(self.config))
            .await?;
        let page = context.new_page().await?;

        let result = self.login_flow(&context, &page).await;

        if let Err(e) = page.close(false).await {
            warn!("could not close login page: {e}");
        }
        if let Err(e) = BrowserContext::close(&context).await {
            warn!("could not close login context: {e}");
        }

        result
    }

    /// The interactive login itself, against any browser implementation.
    pub(crate) async fn login_flow(
        &self,
        context: &dyn BrowserContext,
        page: &dyn BrowserPage,
    ) -> HarnessResult<()> {
        match self.try_login(context, page).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.capture_failure_diagnostics(page).await;
                Err(HarnessError::LoginFailed {
                    environment: self.config.environment.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn try_login(
        &self,
        context: &dyn BrowserContext,
        page: &dyn BrowserPage,
    ) -> HarnessResult<()> {
        let login_url = &self.config.dominio_login;
        let ci = self.config.ci;

        info!("accessing: {login_url}");
        page.goto(
            login_url,
            WaitUntil::Load,
            if ci {
                Duration::from_secs(45)
            } else {
                Duration::from_secs(30)
            },
        )
        .await?;

        page.fill("#email", &self.config.email, self.config.timeout)
            .await?;
        page.fill("#password", &self.config.senha, self.config.timeout)
            .await?;
        page.click("button[type='submit']", self.config.timeout)
            .await?;

        let origin = origin_of(login_url)?;
        let home_url = format!("{origin}/dashboard");
        info!("waiting for redirect to: {home_url}");
        page.wait_for_url(
            &format!("^{}$", regex::escape(&home_url)),
            if ci {
                Duration::from_secs(60)
            } else {
                Duration::from_secs(30)
            },
        )
        .await?;

        let title = page.title().await.unwrap_or_default();
        let current = page.url().await.unwrap_or_default();
        info!("login confirmed: title={title:?} url={current}");

        let session =
            crate::session::capture_storage_state(context, page, &origin, self.config.environment)
                .await?;
        self.store.save(SessionKind::Profile, &session)?;
        Ok(())
    }

    async fn capture_failure_diagnostics(&self, page: &dyn BrowserPage) {
        let path = self.artifacts.login_failure_screenshot();
        match page
            .screenshot_to(&path, &ScreenshotOptions::full_page(Duration::from_secs(5)))
            .await
        {
            Ok(()) => error!("failure screenshot: {}", path.display()),
            Err(e) => error!("could not capture failure screenshot: {e}"),
        }

        let url = page.url().await.unwrap_or_default();
        let title = page.title().await.unwrap_or_default();
        error!("login failed at url: {url} (title: {title:?})");

        if let Ok(content) = page.content().await {
            if content.len() < 1000 {
                let snippet: String = content.chars().take(500).collect();
                error!("page content: {snippet}");
            }
        }
    }
}

/// `scheme://host[:port]` part of a URL.
pub(crate) fn origin_of(url: &str) -> HarnessResult<String> {
    let scheme_end = url
        .find("://")
        .ok_or_else(|| HarnessError::InvalidUrl(url.to_string()))?;
    let rest = &url[scheme_end + 3..];
    if rest.is_empty() {
        return Err(HarnessError::InvalidUrl(url.to_string()));
    }
    let host_end = rest.find('/').unwrap_or(rest.len());
    Ok(format!("{}{}", &url[..scheme_end + 3], &rest[..host_end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowser;
    use crate::config::Environment;
    use crate::session::state::{Cookie, StoredSession};

    const NOW_EPOCH: f64 = 1_700_000_000.0;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(NOW_EPOCH as u64)
    }

    fn config_from(pairs: &[(&str, &str)]) -> HarnessConfig {
        let map: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HarnessConfig::from_lookup(move |key| map.get(key).cloned()).unwrap()
    }

    fn session_with_auth_cookie(expires: f64) -> StoredSession {
        StoredSession {
            cookies: vec![Cookie {
                name: AUTH_COOKIE_NAME.to_string(),
                value: "token".to_string(),
                domain: ".agendapro-web.lovable.app".to_string(),
                path: "/".to_string(),
                expires,
                http_only: Some(true),
                secure: Some(true),
                same_site: None,
            }],
            origins: vec![],
            meta: None,
        }
    }

    fn seed_both(store: &SessionStore, profile: &StoredSession) {
        store.save(SessionKind::User, profile).unwrap();
        store.save(SessionKind::Profile, profile).unwrap();
    }

    #[test]
    fn test_renews_when_files_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(engine.evaluate(now()));
    }

    #[test]
    fn test_renews_when_only_profile_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        store
            .save(
                SessionKind::Profile,
                &session_with_auth_cookie(NOW_EPOCH + 10_000.0),
            )
            .unwrap();
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(engine.evaluate(now()));
    }

    #[test]
    fn test_reuses_fresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(NOW_EPOCH + 10_000.0));
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(!engine.evaluate(now()));
    }

    #[test]
    fn test_renews_token_inside_safety_margin() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(NOW_EPOCH + 200.0));
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(engine.evaluate(now()));
    }

    #[test]
    fn test_renews_expired_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(NOW_EPOCH - 60.0));
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(engine.evaluate(now()));
    }

    #[test]
    fn test_session_cookie_without_expiry_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(-1.0));
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(!engine.evaluate(now()));
    }

    #[test]
    fn test_renews_corrupt_profile_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(NOW_EPOCH + 10_000.0));
        std::fs::write(store.path(SessionKind::Profile), "{ broken").unwrap();
        let config = config_from(&[]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(engine.evaluate(now()));
    }

    #[test]
    fn test_ci_forces_renewal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(NOW_EPOCH + 10_000.0));
        let config = config_from(&[("CI", "true")]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(engine.evaluate(now()));
    }

    #[test]
    fn test_ci_with_persistent_suite_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        seed_both(&store, &session_with_auth_cookie(NOW_EPOCH + 10_000.0));
        let config = config_from(&[("CI", "true"), ("TEST_CATEGORIES", "desktop")]);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let engine = RenewalEngine::new(&config, &store, &artifacts);
        assert!(!engine.evaluate(now()));
    }

    #[test]
    fn test_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let error = || HarnessError::LoginFailed {
            environment: "dev".to_string(),
            reason: "submit timed out".to_string(),
        };

        let ci = config_from(&[("CI", "true"), ("LOGIN_FAIL_FAST", "false")]);
        let engine = RenewalEngine::new(&ci, &store, &artifacts);
        assert!(engine.absorb_failure(error()).is_err());

        let strict_local = config_from(&[]);
        let engine = RenewalEngine::new(&strict_local, &store, &artifacts);
        assert!(engine.absorb_failure(error()).is_err());

        let lenient_local = config_from(&[("LOGIN_FAIL_FAST", "false")]);
        let engine = RenewalEngine::new(&lenient_local, &store, &artifacts);
        assert!(matches!(
            engine.absorb_failure(error()),
            Ok(RenewalOutcome::FailedButTolerated(_))
        ));
    }

    #[tokio::test]
    async fn test_login_flow_captures_and_saves_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let config = config_from(&[
            ("DEV_DOMINIO_LOGIN", "https://login.agendapro.example/entrar"),
            ("DEV_EMAIL", "qa@example.com"),
            ("DEV_SENHA", "secret"),
        ]);
        let engine = RenewalEngine::new(&config, &store, &artifacts);

        let browser = MockBrowser::new();
        browser.state.cookies.lock().unwrap().push(Cookie {
            name: AUTH_COOKIE_NAME.to_string(),
            value: "fresh-token".to_string(),
            domain: ".agendapro.example".to_string(),
            path: "/".to_string(),
            expires: NOW_EPOCH + 3600.0,
            http_only: Some(true),
            secure: Some(true),
            same_site: None,
        });

        engine
            .login_flow(&browser.context(), &browser.page())
            .await
            .unwrap();

        {
            let filled = browser.state.filled.lock().unwrap();
            assert_eq!(filled[0], ("#email".to_string(), "qa@example.com".to_string()));
            assert_eq!(filled[1], ("#password".to_string(), "secret".to_string()));
            let clicked = browser.state.clicked.lock().unwrap();
            assert_eq!(clicked.as_slice(), ["button[type='submit']"]);
        }

        let saved = store.load(SessionKind::Profile).unwrap();
        assert_eq!(saved.cookies[0].value, "fresh-token");
        assert_eq!(saved.origins[0].origin, "https://login.agendapro.example");
        let meta = saved.meta.unwrap();
        assert_eq!(meta.environment, "dev");
        assert_eq!(meta.dominio, "https://login.agendapro.example");
    }

    #[tokio::test]
    async fn test_login_flow_failure_takes_diagnostic_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), Environment::Dev);
        let artifacts = ArtifactPaths::new(dir.path(), Environment::Dev);
        let config = config_from(&[
            ("DEV_DOMINIO_LOGIN", "https://login.agendapro.example/entrar"),
            ("DEV_EMAIL", "qa@example.com"),
            ("DEV_SENHA", "secret"),
        ]);
        let engine = RenewalEngine::new(&config, &store, &artifacts);

        let browser = MockBrowser::new();
        browser.fail_on_selector("#email");

        let result = engine.login_flow(&browser.context(), &browser.page()).await;
        assert!(matches!(result, Err(HarnessError::LoginFailed { .. })));

        let screenshots = browser.state.screenshots.lock().unwrap();
        assert_eq!(screenshots.len(), 1);
        assert!(screenshots[0]
            .to_string_lossy()
            .contains("login-error-dev-"));
        assert!(!store.exists(SessionKind::Profile));
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://login.example.com/entrar?next=/x").unwrap(),
            "https://login.example.com"
        );
        assert_eq!(
            origin_of("http://127.0.0.1:8080").unwrap(),
            "http://127.0.0.1:8080"
        );
        assert!(origin_of("not-a-url").is_err());
        assert!(origin_of("https://").is_err());
    }
}
