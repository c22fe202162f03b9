//! Run orchestration: renewal once, then scenarios against a shared
//! browser with a fresh context per scenario

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifacts::{ArtifactPaths, EvidenceSink};
use crate::bridge::{Bridge, ContextOptions, LaunchOptions};
use crate::browser::BrowserContext;
use crate::config::{HarnessConfig, VideoPolicy};
use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::{ScenarioLifecycle, ScenarioOutcome, StepRecord, StepStatus};
use crate::session::renewal::RenewalEngine;
use crate::session::store::{SessionStore, SESSION_MAX_AGE};
use crate::session::RenewalOutcome;
use crate::spec::ScenarioSpec;

const PREFLIGHT_DEADLINE: Duration = Duration::from_secs(20);
const PREFLIGHT_INTERVAL: Duration = Duration::from_secs(2);

/// Where the run goes through its life. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    SessionEvaluated,
    LoggedIn,
    Reused,
    Scenarios,
    Finished,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory of scenario YAML files.
    pub specs_dir: PathBuf,

    /// Directory for the suite result document.
    pub output_dir: PathBuf,

    /// Only run scenarios carrying this tag.
    pub tag: Option<String>,

    /// Only run the scenario with this name.
    pub name: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            specs_dir: PathBuf::from("scenarios"),
            output_dir: PathBuf::from("test-results"),
            tag: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub struct HarnessRunner {
    config: HarnessConfig,
    runner: RunnerConfig,
    phase: RunPhase,
}

impl HarnessRunner {
    pub fn new(config: HarnessConfig, runner: RunnerConfig) -> Self {
        Self {
            config,
            runner,
            phase: RunPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Execute the whole run: sweep and renew sessions once, then drive
    /// every selected scenario, writing the suite result at the end.
    pub async fn run(&mut self) -> HarnessResult<SuiteResult> {
        let start = Instant::now();
        self.config.log_banner();

        let artifacts = ArtifactPaths::for_config(&self.config);
        artifacts.ensure_layout()?;
        artifacts.clean_user_data(self.config.ci);

        let store = SessionStore::new(artifacts.session_dir(), self.config.environment);
        store.sweep_expired(SESSION_MAX_AGE);

        self.preflight().await;

        self.phase = RunPhase::SessionEvaluated;
        let renewal = RenewalEngine::new(&self.config, &store, &artifacts);
        self.phase = match renewal.run().await? {
            RenewalOutcome::Renewed => RunPhase::LoggedIn,
            RenewalOutcome::Reused => RunPhase::Reused,
            RenewalOutcome::FailedButTolerated(reason) => {
                warn!("proceeding without a renewed session: {reason}");
                RunPhase::Reused
            }
        };

        let specs = self.select_specs()?;
        if specs.is_empty() {
            warn!("no scenarios selected, nothing to run");
            return Ok(SuiteResult {
                total: 0,
                passed: 0,
                failed: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                results: vec![],
            });
        }

        Bridge::check_playwright()?;
        let bridge = Bridge::spawn().await?;
        bridge
            .launch(&LaunchOptions::from_config(&self.config))
            .await?;

        let evidence = EvidenceSink::new(artifacts.screenshots_dir())?;
        let lifecycle = ScenarioLifecycle::new(&self.config, &store, &evidence);

        self.phase = RunPhase::Scenarios;
        info!("running {} scenario(s)...", specs.len());

        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        for spec in &specs {
            let mut result = self
                .run_scenario(&bridge, &artifacts, &lifecycle, spec)
                .await;

            let mut attempt = 0;
            while !result.passed && attempt < self.config.retries {
                attempt += 1;
                info!(
                    "retrying {} (attempt {}/{})",
                    spec.name, attempt, self.config.retries
                );
                result = self
                    .run_scenario(&bridge, &artifacts, &lifecycle, spec)
                    .await;
            }

            if result.passed {
                passed += 1;
                info!("passed: {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "failed: {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        bridge.shutdown().await;

        let suite = SuiteResult {
            total: specs.len(),
            passed,
            failed,
            duration_ms: start.elapsed().as_millis() as u64,
            results,
        };

        info!(
            "results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, suite.duration_ms
        );

        self.write_results(&suite)?;
        self.phase = RunPhase::Finished;
        Ok(suite)
    }

    fn select_specs(&self) -> HarnessResult<Vec<ScenarioSpec>> {
        let specs = ScenarioSpec::load_all(&self.runner.specs_dir)?;
        let filtered = filter_specs(specs, self.runner.tag.as_deref(), self.runner.name.as_deref());

        if filtered.is_empty() {
            if let Some(name) = &self.runner.name {
                return Err(HarnessError::ScenarioNotFound(name.clone()));
            }
        }
        Ok(filtered)
    }

    async fn run_scenario(
        &self,
        bridge: &Bridge,
        artifacts: &ArtifactPaths,
        lifecycle: &ScenarioLifecycle<'_>,
        spec: &ScenarioSpec,
    ) -> ScenarioResult {
        let start = Instant::now();

        match self.drive_scenario(bridge, artifacts, lifecycle, spec).await {
            Ok((outcome, records)) => {
                let error = records
                    .iter()
                    .find(|r| r.status == StepStatus::Failed)
                    .and_then(|r| r.error.clone());
                ScenarioResult {
                    name: spec.name.clone(),
                    passed: outcome == ScenarioOutcome::Passed,
                    duration_ms: start.elapsed().as_millis() as u64,
                    steps: records,
                    error,
                }
            }
            Err(e) => ScenarioResult {
                name: spec.name.clone(),
                passed: false,
                duration_ms: start.elapsed().as_millis() as u64,
                steps: vec![],
                error: Some(e.to_string()),
            },
        }
    }

    async fn drive_scenario(
        &self,
        bridge: &Bridge,
        artifacts: &ArtifactPaths,
        lifecycle: &ScenarioLifecycle<'_>,
        spec: &ScenarioSpec,
    ) -> HarnessResult<(ScenarioOutcome, Vec<StepRecord>)> {
        let mut options = ContextOptions::from_config(&self.config);
        if self.config.video == VideoPolicy::RetainOnFailure {
            options = options.with_video_dir(artifacts.videos_dir());
        }

        let context = bridge.new_context(&options).await?;
        let page = context.new_page().await?;

        let mut guard = lifecycle
            .begin(&spec.name, &spec.tags, &context, &page)
            .await;
        for step in &spec.steps {
            guard.run_step(step).await;
        }
        let (outcome, records) = guard.finish().await;

        // Failed scenarios were already torn down by the guard.
        if outcome == ScenarioOutcome::Passed {
            if let Err(e) = crate::browser::BrowserPage::close(&page, true).await {
                warn!("could not close page: {e}");
            }
            if let Err(e) = BrowserContext::close(&context).await {
                warn!("could not close context: {e}");
            }
        }

        Ok((outcome, records))
    }

    /// Poll the base URL until it answers, bounded by a deadline. Failure
    /// here is logged, not fatal: scenarios will report the real problem.
    async fn preflight(&self) {
        if self.config.dominio.is_empty() {
            warn!("base URL not configured, skipping preflight");
            return;
        }

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("could not build preflight client: {e}");
                return;
            }
        };

        let deadline = Instant::now() + PREFLIGHT_DEADLINE;
        let mut attempts = 0usize;

        while Instant::now() < deadline {
            attempts += 1;
            match client.get(&self.config.dominio).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("base URL reachable: {}", self.config.dominio);
                    return;
                }
                Ok(resp) => warn!("preflight returned {}", resp.status()),
                Err(e) => {
                    if attempts == 1 {
                        info!("waiting for {} to answer...", self.config.dominio);
                    }
                    if !e.is_connect() {
                        warn!("preflight error: {e}");
                    }
                }
            }
            tokio::time::sleep(PREFLIGHT_INTERVAL).await;
        }

        warn!("base URL did not answer after {attempts} attempt(s), proceeding anyway");
    }

    fn write_results(&self, suite: &SuiteResult) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.runner.output_dir)?;
        let path = self.runner.output_dir.join("results.json");
        std::fs::write(&path, serde_json::to_string_pretty(suite)?)?;
        info!("results written to: {}", path.display());
        Ok(path)
    }
}

fn filter_specs(
    specs: Vec<ScenarioSpec>,
    tag: Option<&str>,
    name: Option<&str>,
) -> Vec<ScenarioSpec> {
    specs
        .into_iter()
        .filter(|spec| tag.map(|t| spec.has_tag(t)).unwrap_or(true))
        .filter(|spec| name.map(|n| spec.name == n).unwrap_or(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, tags: &[&str]) -> ScenarioSpec {
        ScenarioSpec {
            name: name.to_string(),
            description: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            steps: vec![],
        }
    }

    #[test]
    fn test_filter_by_tag_is_case_insensitive() {
        let specs = vec![
            spec("login", &["@smoke"]),
            spec("agendamento", &["@regression"]),
        ];
        let filtered = filter_specs(specs, Some("@SMOKE"), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "login");
    }

    #[test]
    fn test_filter_by_name() {
        let specs = vec![spec("login", &[]), spec("servicos", &[])];
        let filtered = filter_specs(specs, None, Some("servicos"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "servicos");
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let specs = vec![spec("a", &[]), spec("b", &[])];
        assert_eq!(filter_specs(specs, None, None).len(), 2);
    }

    #[test]
    fn test_suite_result_serialization() {
        let suite = SuiteResult {
            total: 2,
            passed: 1,
            failed: 1,
            duration_ms: 1234,
            results: vec![ScenarioResult {
                name: "login".to_string(),
                passed: false,
                duration_ms: 900,
                steps: vec![StepRecord {
                    name: "click:#entrar".to_string(),
                    status: StepStatus::Failed,
                    duration_ms: 850,
                    error: Some("timeout".to_string()),
                }],
                error: Some("timeout".to_string()),
            }],
        };

        let json = serde_json::to_value(&suite).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["results"][0]["steps"][0]["status"], "failed");

        let back: SuiteResult = serde_json::from_value(json).unwrap();
        assert!(!back.all_passed());
    }
}
