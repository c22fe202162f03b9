//! Harness configuration resolved once at startup from environment variables

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{HarnessError, HarnessResult};

/// Target environment for a run. Selects base URLs, credentials and the
/// per-environment session/artifact directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    fn var_prefix(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Prod => "PROD",
        }
    }
}

impl FromStr for Environment {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(HarnessError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video capture policy for scenario contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoPolicy {
    #[default]
    Off,
    RetainOnFailure,
}

/// Immutable harness configuration, built once at startup and passed by
/// reference to the components that need it.
///
/// Variable names follow the environment contract of the test suite:
/// `AMBIENTE` selects the environment, and per-environment values are read
/// from `{DEV,PROD}_DOMINIO`, `{DEV,PROD}_DOMINIO_LOGIN`, `{DEV,PROD}_EMAIL`
/// and `{DEV,PROD}_SENHA`, with `DOMINIO` as a cross-environment fallback
/// for the base URL.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub environment: Environment,

    /// True when running under CI (`CI` or `GITLAB_CI`).
    pub ci: bool,

    /// Base URL of the application under test.
    pub dominio: String,

    /// URL of the login page used by the renewal engine.
    pub dominio_login: String,

    /// Login credential: account email.
    pub email: String,

    /// Login credential: account password.
    pub senha: String,

    pub headless: bool,

    /// Default timeout for browser interactions.
    pub timeout: Duration,

    /// Number of times a failed scenario is retried with a fresh context.
    pub retries: u32,

    /// Worker count hint for the surrounding runner (informational).
    pub workers: Option<usize>,

    pub video: VideoPolicy,

    /// Selected test categories (`TEST_CATEGORIES`, comma-separated).
    pub test_categories: Vec<String>,

    /// Selected runner projects (`TEST_PROJECTS`, comma-separated).
    pub test_projects: Vec<String>,

    /// Browser executable override (`CHROME_BIN`).
    pub chrome_bin: Option<PathBuf>,

    /// Whether a login failure outside CI aborts the run. In CI login
    /// failures always abort.
    pub fail_fast_outside_ci: bool,
}

impl HarnessConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("AMBIENTE")
            .unwrap_or_else(|| "dev".to_string())
            .parse()?;

        let prefix = environment.var_prefix();
        let scoped = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));

        let truthy = |value: Option<String>| {
            matches!(value.as_deref(), Some("true") | Some("1"))
        };

        let csv = |value: Option<String>| -> Vec<String> {
            value
                .map(|v| {
                    v.split(',')
                        .map(|item| item.trim().to_string())
                        .filter(|item| !item.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Self {
            environment,
            ci: truthy(lookup("CI")) || truthy(lookup("GITLAB_CI")),
            dominio: scoped("DOMINIO")
                .or_else(|| lookup("DOMINIO"))
                .unwrap_or_default(),
            dominio_login: scoped("DOMINIO_LOGIN").unwrap_or_default(),
            email: scoped("EMAIL").unwrap_or_default(),
            senha: scoped("SENHA").unwrap_or_default(),
            headless: lookup("HEADLESS").as_deref() != Some("false"),
            timeout: Duration::from_millis(
                lookup("TIMEOUT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60_000),
            ),
            retries: lookup("RETRIES").and_then(|v| v.parse().ok()).unwrap_or(0),
            workers: lookup("WORKERS").and_then(|v| v.parse().ok()),
            video: if lookup("VIDEO").as_deref() == Some("true") {
                VideoPolicy::RetainOnFailure
            } else {
                VideoPolicy::Off
            },
            test_categories: csv(lookup("TEST_CATEGORIES")),
            test_projects: csv(lookup("TEST_PROJECTS")),
            chrome_bin: lookup("CHROME_BIN").map(PathBuf::from),
            fail_fast_outside_ci: lookup("LOGIN_FAIL_FAST").as_deref() != Some("false"),
        })
    }

    /// Check that everything the renewal engine needs is present, naming
    /// exactly the missing variables otherwise.
    pub fn validate_login(&self) -> HarnessResult<()> {
        let prefix = self.environment.var_prefix();
        let mut missing = Vec::new();

        if self.dominio_login.is_empty() {
            missing.push(format!("{prefix}_DOMINIO_LOGIN"));
        }
        if self.email.is_empty() {
            missing.push(format!("{prefix}_EMAIL"));
        }
        if self.senha.is_empty() {
            missing.push(format!("{prefix}_SENHA"));
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ConfigMissing {
                environment: self.environment.to_string(),
                missing,
            })
        }
    }

    /// Whether the selected categories/projects need the stored session to
    /// survive across runs. Desktop suites reuse a long-lived session.
    pub fn requires_persistent_session(&self) -> bool {
        self.test_categories.iter().any(|c| c == "desktop")
            || self.test_projects.iter().any(|p| p.contains("desktop"))
    }

    /// Join a path onto the configured base URL.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.dominio.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn masked_email(&self) -> String {
        match self.email.find('@') {
            Some(at) if at >= 3 => format!("{}...{}", &self.email[..3], &self.email[at..]),
            _ => "<unset>".to_string(),
        }
    }

    /// Log the effective configuration at run start.
    pub fn log_banner(&self) {
        info!("{}", "=".repeat(60));
        info!("environment: {}", self.environment);
        info!("base url: {}", self.dominio);
        info!("ci: {}", self.ci);
        info!("categories: {}", self.test_categories.join(", "));
        info!("projects: {}", self.test_projects.join(", "));
        info!("user: {}", self.masked_email());
        info!("headless: {}", self.headless);
        info!("workers: {:?}", self.workers);
        info!("video: {:?}", self.video);
        info!("{}", "=".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_dev() {
        let config = HarnessConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.environment, Environment::Dev);
        assert!(!config.ci);
        assert!(config.headless);
        assert_eq!(config.timeout, Duration::from_millis(60_000));
    }

    #[test]
    fn test_scoped_values_win_over_fallback() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("AMBIENTE", "prod"),
            ("DOMINIO", "https://fallback.example.com"),
            ("PROD_DOMINIO", "https://app.example.com"),
            ("PROD_EMAIL", "qa@example.com"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Prod);
        assert_eq!(config.dominio, "https://app.example.com");
        assert_eq!(config.email, "qa@example.com");
    }

    #[test]
    fn test_dominio_fallback() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            "DOMINIO",
            "https://fallback.example.com",
        )]))
        .unwrap();
        assert_eq!(config.dominio, "https://fallback.example.com");
    }

    #[test]
    fn test_invalid_environment_rejected() {
        let result = HarnessConfig::from_lookup(lookup_from(&[("AMBIENTE", "staging")]));
        assert!(matches!(result, Err(HarnessError::InvalidEnvironment(_))));
    }

    #[test]
    fn test_validate_login_enumerates_missing() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            "DEV_DOMINIO_LOGIN",
            "https://login.example.com",
        )]))
        .unwrap();

        match config.validate_login() {
            Err(HarnessError::ConfigMissing { missing, .. }) => {
                assert_eq!(missing, vec!["DEV_EMAIL", "DEV_SENHA"]);
            }
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_login_complete() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("DEV_DOMINIO_LOGIN", "https://login.example.com"),
            ("DEV_EMAIL", "qa@example.com"),
            ("DEV_SENHA", "secret"),
        ]))
        .unwrap();
        assert!(config.validate_login().is_ok());
    }

    #[test]
    fn test_requires_persistent_session() {
        let desktop = HarnessConfig::from_lookup(lookup_from(&[(
            "TEST_CATEGORIES",
            "smoke, desktop",
        )]))
        .unwrap();
        assert!(desktop.requires_persistent_session());

        let other = HarnessConfig::from_lookup(lookup_from(&[("TEST_CATEGORIES", "smoke")]))
            .unwrap();
        assert!(!other.requires_persistent_session());
    }

    #[test]
    fn test_url_for_normalizes_slashes() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            "DEV_DOMINIO",
            "https://app.example.com/",
        )]))
        .unwrap();
        assert_eq!(config.url_for("/login"), "https://app.example.com/login");
        assert_eq!(config.url_for("login"), "https://app.example.com/login");
    }

    #[test]
    fn test_ci_detection() {
        let ci = HarnessConfig::from_lookup(lookup_from(&[("CI", "true")])).unwrap();
        assert!(ci.ci);
        let gitlab = HarnessConfig::from_lookup(lookup_from(&[("GITLAB_CI", "1")])).unwrap();
        assert!(gitlab.ci);
    }
}
