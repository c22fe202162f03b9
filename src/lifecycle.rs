//! Per-scenario orchestration
//!
//! A [`ScenarioGuard`] owns one scenario's execution state: the resolved
//! session requirement, the poisoned flag and the step records. The flag
//! lives here, scoped to the guard, so scenarios running in parallel
//! workers can never observe each other's failures.
//!
//! Context and page are borrowed from the surrounding runner. The guard
//! closes them only on the failure teardown path, to stop a broken page
//! from generating further errors; on success they are left to the
//! runner's normal lifecycle.

use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifacts::EvidenceSink;
use crate::browser::{BrowserContext, BrowserPage, ScreenshotOptions, WaitState, WaitUntil};
use crate::config::HarnessConfig;
use crate::error::{BestEffort, HarnessError, HarnessResult};
use crate::session::classifier::{self, SessionRequirement};
use crate::session::renewal::origin_of;
use crate::session::restorer::SessionRestorer;
use crate::session::store::{SessionKind, SessionStore};
use crate::spec::ScenarioStep;

const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_NAV_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONTEXT_TIMEOUT: Duration = Duration::from_secs(30);

const FAILURE_SHOT_TIMEOUT: Duration = Duration::from_secs(8);
const FALLBACK_SHOT_TIMEOUT: Duration = Duration::from_secs(5);
const ROUTINE_SHOT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Failed,
}

/// Builds scenario guards. One per run; holds only shared immutable pieces.
pub struct ScenarioLifecycle<'a> {
    config: &'a HarnessConfig,
    store: &'a SessionStore,
    evidence: &'a EvidenceSink,
}

impl<'a> ScenarioLifecycle<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        store: &'a SessionStore,
        evidence: &'a EvidenceSink,
    ) -> Self {
        Self {
            config,
            store,
            evidence,
        }
    }

    /// Set up one scenario: resolve its session requirement, apply default
    /// timeouts, and either clear browser state or restore the matching
    /// stored session.
    pub async fn begin<'b>(
        &'b self,
        name: &str,
        tags: &[String],
        context: &'b dyn BrowserContext,
        page: &'b dyn BrowserPage,
    ) -> ScenarioGuard<'b> {
        info!("[TEST] title: {name}");
        info!("[TEST] tags: {}", tags.join(", "));

        let requirement = classifier::resolve(tags);

        if let Err(e) = page.set_default_timeout(DEFAULT_PAGE_TIMEOUT).await {
            warn!("could not set page timeout: {e}");
        }
        if let Err(e) = page
            .set_default_navigation_timeout(DEFAULT_NAV_TIMEOUT)
            .await
        {
            warn!("could not set navigation timeout: {e}");
        }
        if let Err(e) = context.set_default_timeout(DEFAULT_CONTEXT_TIMEOUT).await {
            warn!("could not set context timeout: {e}");
        }

        let restorer = SessionRestorer::new(self.store, self.config);
        match requirement {
            SessionRequirement::None => {
                info!("scenario starts without a reused session, clearing browser state");
                let _ = restorer.clear(context, page).await;
            }
            SessionRequirement::User => {
                let _ = restorer.restore(context, page, SessionKind::User).await;
            }
            SessionRequirement::Profile => {
                let _ = restorer.restore(context, page, SessionKind::Profile).await;
            }
        }

        ScenarioGuard {
            config: self.config,
            store: self.store,
            evidence: self.evidence,
            context,
            page,
            scenario: name.to_string(),
            requirement,
            failed: false,
            records: Vec::new(),
        }
    }
}

/// One scenario's execution unit. Never shared across scenarios.
pub struct ScenarioGuard<'a> {
    config: &'a HarnessConfig,
    store: &'a SessionStore,
    evidence: &'a EvidenceSink,
    context: &'a dyn BrowserContext,
    page: &'a dyn BrowserPage,
    scenario: String,
    requirement: SessionRequirement,
    failed: bool,
    records: Vec<StepRecord>,
}

impl<'a> ScenarioGuard<'a> {
    pub fn requirement(&self) -> SessionRequirement {
        self.requirement
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Execute one step, unless a previous step in this scenario already
    /// failed; a poisoned scenario skips everything that remains. The
    /// first failure gets the failure screenshot; passing steps get a
    /// routine evidence screenshot. Both captures are best-effort.
    pub async fn run_step(&mut self, step: &ScenarioStep) -> StepStatus {
        let label = step.label();

        if self.failed {
            info!("skipping \"{label}\" - scenario already failed");
            self.records.push(StepRecord {
                name: label,
                status: StepStatus::Skipped,
                duration_ms: 0,
                error: None,
            });
            return StepStatus::Skipped;
        }

        let start = Instant::now();
        let result = self.apply(step).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let _ = self.attach_routine_screenshot(&label).await;
                self.records.push(StepRecord {
                    name: label,
                    status: StepStatus::Passed,
                    duration_ms,
                    error: None,
                });
                StepStatus::Passed
            }
            Err(e) => {
                error!("step [{label}] failed: {e}");
                self.failed = true;
                let _ = self.attach_failure_screenshot(&label).await;
                self.records.push(StepRecord {
                    name: label,
                    status: StepStatus::Failed,
                    duration_ms,
                    error: Some(e.to_string()),
                });
                StepStatus::Failed
            }
        }
    }

    async fn apply(&self, step: &ScenarioStep) -> HarnessResult<()> {
        match step {
            ScenarioStep::Navigate {
                path,
                wait_for_selector,
            } => {
                let url = self.config.url_for(path);
                info!("navigating to: {url}");
                self.page
                    .goto(&url, WaitUntil::DomContentLoaded, DEFAULT_NAV_TIMEOUT)
                    .await?;
                if let Some(selector) = wait_for_selector {
                    self.page
                        .wait_for_selector(selector, WaitState::Visible, DEFAULT_PAGE_TIMEOUT)
                        .await?;
                }
                Ok(())
            }
            ScenarioStep::Fill {
                selector,
                value,
                timeout_ms,
            } => {
                self.page
                    .fill(selector, value, self.step_timeout(*timeout_ms))
                    .await
            }
            ScenarioStep::Click {
                selector,
                timeout_ms,
            } => {
                self.page
                    .click(selector, self.step_timeout(*timeout_ms))
                    .await
            }
            ScenarioStep::WaitFor {
                selector,
                state,
                timeout_ms,
            } => {
                self.page
                    .wait_for_selector(selector, *state, Duration::from_millis(*timeout_ms))
                    .await
            }
            ScenarioStep::ExpectUrl {
                pattern,
                timeout_ms,
            } => {
                Regex::new(pattern)
                    .map_err(|e| HarnessError::SpecParse(format!("bad url pattern: {e}")))?;
                self.page
                    .wait_for_url(pattern, Duration::from_millis(*timeout_ms))
                    .await
            }
            ScenarioStep::Screenshot { name, full_page } => {
                let path = self
                    .evidence
                    .next_path(&format!("{name} | {}", self.scenario));
                let options = if *full_page {
                    ScreenshotOptions::full_page(ROUTINE_SHOT_TIMEOUT)
                } else {
                    ScreenshotOptions::viewport(ROUTINE_SHOT_TIMEOUT)
                };
                self.page.screenshot_to(&path, &options).await
            }
            ScenarioStep::SaveSession { kind } => {
                let origin = origin_of(&self.config.dominio)
                    .unwrap_or_else(|_| self.config.dominio.clone());
                let session = crate::session::capture_storage_state(
                    self.context,
                    self.page,
                    &origin,
                    self.config.environment,
                )
                .await?;
                self.store.save(*kind, &session)?;
                Ok(())
            }
            ScenarioStep::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
        }
    }

    fn step_timeout(&self, timeout_ms: Option<u64>) -> Duration {
        timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.timeout)
    }

    async fn attach_failure_screenshot(&self, step_label: &str) -> BestEffort {
        let label = format!("FAILED Screenshot | {} | {}", self.scenario, step_label);
        let path = self.evidence.next_path(&label);

        match self
            .page
            .screenshot_to(&path, &ScreenshotOptions::full_page(FAILURE_SHOT_TIMEOUT))
            .await
        {
            Ok(()) => BestEffort::Completed,
            Err(first) => {
                warn!("full-page screenshot failed, trying fallback: {first}");
                let fallback_label = format!("{label} (fallback)");
                let fallback_path = self.evidence.next_path(&fallback_label);
                match self
                    .page
                    .screenshot_to(
                        &fallback_path,
                        &ScreenshotOptions::viewport(FALLBACK_SHOT_TIMEOUT),
                    )
                    .await
                {
                    Ok(()) => BestEffort::Completed,
                    Err(second) => {
                        warn!("fallback screenshot also failed: {second}");
                        BestEffort::degraded(second.to_string())
                    }
                }
            }
        }
    }

    async fn attach_routine_screenshot(&self, step_label: &str) -> BestEffort {
        let label = format!("Screenshot | {} | {}", self.scenario, step_label);
        let path = self.evidence.next_path(&label);
        match self
            .page
            .screenshot_to(&path, &ScreenshotOptions::full_page(ROUTINE_SHOT_TIMEOUT))
            .await
        {
            Ok(()) => BestEffort::Completed,
            Err(e) => {
                warn!("could not take step screenshot: {e}");
                BestEffort::degraded(e.to_string())
            }
        }
    }

    /// Conclude the scenario. A failed scenario gets ordered teardown:
    /// abort in-flight network, close the page without unload handlers,
    /// close the context. Every teardown error is swallowed.
    pub async fn finish(self) -> (ScenarioOutcome, Vec<StepRecord>) {
        if !self.failed {
            return (ScenarioOutcome::Passed, self.records);
        }

        warn!(
            "scenario [{}] failed, closing resources immediately",
            self.scenario
        );
        if let Err(e) = self.page.abort_all_routes().await {
            warn!("could not abort routes: {e}");
        }
        if let Err(e) = self.page.close(false).await {
            warn!("could not close page: {e}");
        }
        if let Err(e) = self.context.close().await {
            warn!("could not close context: {e}");
        }

        (ScenarioOutcome::Failed, self.records)
    }
}
