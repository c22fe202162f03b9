//! Error types for the harness

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("invalid environment: {0}. Use: dev, prod")]
    InvalidEnvironment(String),

    #[error("incomplete configuration for environment {environment}: missing {}", .missing.join(", "))]
    ConfigMissing {
        environment: String,
        missing: Vec<String>,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Playwright not found. Install with: npm i playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("bridge error: {0}")]
    Bridge(String),

    #[error("bridge protocol error: {0}")]
    Protocol(String),

    #[error("login failed in environment {environment}: {reason}")]
    LoginFailed {
        environment: String,
        reason: String,
    },

    #[error("step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("timeout after {duration:?} waiting for: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("scenario spec parse error: {0}")]
    SpecParse(String),

    #[error("no scenario matched: {0}")]
    ScenarioNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Outcome of an operation that is allowed to fail without failing the run
/// (screenshots, storage replay, state cleanup). A degraded outcome carries
/// the message that was logged so callers can still inspect it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum BestEffort {
    Completed,
    Degraded(String),
}

impl BestEffort {
    pub fn degraded(detail: impl Into<String>) -> Self {
        BestEffort::Degraded(detail.into())
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BestEffort::Completed)
    }
}
