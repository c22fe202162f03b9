//! Replays a stored session into a live browser context

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::browser::{BrowserContext, BrowserPage, WaitUntil};
use crate::config::HarnessConfig;
use crate::error::{BestEffort, HarnessResult};
use crate::session::store::{SessionKind, SessionStore};

const RESTORE_NAV_TIMEOUT: Duration = Duration::from_secs(10);

/// What a restore attempt amounted to. Never an error: a scenario proceeds
/// regardless and fails its own assertions if it truly needed the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Cookies (and localStorage, when present) were replayed.
    Restored { cookies: usize, origins: usize },
    /// No usable session file; nothing was replayed.
    NoSession,
    /// Replay started but did not finish; the context may hold partial
    /// state.
    Degraded(String),
}

pub struct SessionRestorer<'a> {
    store: &'a SessionStore,
    config: &'a HarnessConfig,
}

impl<'a> SessionRestorer<'a> {
    pub fn new(store: &'a SessionStore, config: &'a HarnessConfig) -> Self {
        Self { store, config }
    }

    /// Replay the stored session of `kind` into the context. Absent or
    /// corrupt files skip restoration with a warning; mid-replay failures
    /// are caught and reported as degraded.
    pub async fn restore(
        &self,
        context: &dyn BrowserContext,
        page: &dyn BrowserPage,
        kind: SessionKind,
    ) -> RestoreOutcome {
        if !self.store.exists(kind) {
            warn!(
                "session file {} not found, scenario proceeds without restoration",
                self.store.path(kind).display()
            );
            return RestoreOutcome::NoSession;
        }

        let Some(session) = self.store.load(kind) else {
            // Corrupt on disk; the store already logged it.
            return RestoreOutcome::NoSession;
        };

        info!(
            "restoring {} cookies for session ({})",
            session.cookies.len(),
            kind.as_str()
        );

        match self.replay(context, page, &session).await {
            Ok(()) => {
                info!("session restored");
                RestoreOutcome::Restored {
                    cookies: session.cookies.len(),
                    origins: session.origins.len(),
                }
            }
            Err(e) => {
                warn!("could not restore session: {e}");
                RestoreOutcome::Degraded(e.to_string())
            }
        }
    }

    async fn replay(
        &self,
        context: &dyn BrowserContext,
        page: &dyn BrowserPage,
        session: &crate::session::state::StoredSession,
    ) -> HarnessResult<()> {
        if !session.cookies.is_empty() {
            context.add_cookies(&session.cookies).await?;
            for (index, cookie) in session.cookies.iter().enumerate() {
                debug!(
                    "[{}] {}={} | domain={} | path={} | expires={}",
                    index + 1,
                    cookie.name,
                    cookie.value,
                    cookie.domain,
                    cookie.path,
                    cookie.expires
                );
            }
        }

        if let Some(main_origin) = session.origins.first() {
            page.goto(
                &main_origin.origin,
                WaitUntil::DomContentLoaded,
                RESTORE_NAV_TIMEOUT,
            )
            .await?;

            if !main_origin.local_storage.is_empty() {
                let entries = json!(main_origin.local_storage);
                let script = format!(
                    "(() => {{ const entries = {entries}; \
                     for (const {{ name, value }} of entries) \
                     localStorage.setItem(name, value); }})()"
                );
                page.evaluate(&script).await?;
            }
        }

        Ok(())
    }

    /// Put the context into a known-clean state for scenarios that must
    /// start without any session. Best-effort: a fully clean state is not
    /// safety-critical.
    pub async fn clear(
        &self,
        context: &dyn BrowserContext,
        page: &dyn BrowserPage,
    ) -> BestEffort {
        if let Err(e) = context.clear_cookies().await {
            warn!("could not clear cookies: {e}");
            return BestEffort::degraded(format!("clear cookies: {e}"));
        }
        if let Err(e) = context.clear_permissions().await {
            warn!("could not clear permissions: {e}");
            return BestEffort::degraded(format!("clear permissions: {e}"));
        }

        let base = &self.config.dominio;
        let storage_wipe = async {
            page.goto(base, WaitUntil::DomContentLoaded, RESTORE_NAV_TIMEOUT)
                .await?;
            page.evaluate("localStorage.clear(); sessionStorage.clear();")
                .await?;
            Ok::<(), crate::error::HarnessError>(())
        };

        match storage_wipe.await {
            Ok(()) => BestEffort::Completed,
            Err(e) => {
                warn!("could not clear local/session storage: {e}");
                BestEffort::degraded(format!("clear storage: {e}"))
            }
        }
    }
}
