//! Declarative YAML scenario specification
//!
//! Scenarios carry the tag set the session classifier consumes and a list
//! of browser steps against the scheduling app. The harness does not care
//! what a scenario verifies, only how to drive and observe it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::browser::WaitState;
use crate::error::{HarnessError, HarnessResult};
use crate::session::store::SessionKind;

/// A complete scenario parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags, e.g. `@session:none` or `@perfil:selecionado`.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order.
    pub steps: Vec<ScenarioStep>,
}

/// A single step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Navigate to a path relative to the base URL.
    Navigate {
        path: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Fill an input field.
    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click an element.
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for an element to reach a state.
    WaitFor {
        selector: String,
        #[serde(default)]
        state: WaitState,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Wait until the page URL matches a regular expression.
    ExpectUrl {
        pattern: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Take a named screenshot.
    Screenshot {
        name: String,
        #[serde(default)]
        full_page: bool,
    },

    /// Capture the current browser state into a session file. This is how
    /// the `user` session gets written; renewal owns `profile`.
    SaveSession {
        #[serde(default)]
        kind: SessionKind,
    },

    /// Wait for a fixed amount of time (use sparingly).
    Sleep { ms: u64 },
}

fn default_wait_timeout() -> u64 {
    5000
}

impl ScenarioStep {
    /// Short label used in logs and evidence names.
    pub fn label(&self) -> String {
        match self {
            ScenarioStep::Navigate { path, .. } => format!("navigate:{path}"),
            ScenarioStep::Fill { selector, .. } => format!("fill:{selector}"),
            ScenarioStep::Click { selector, .. } => format!("click:{selector}"),
            ScenarioStep::WaitFor { selector, .. } => format!("wait:{selector}"),
            ScenarioStep::ExpectUrl { pattern, .. } => format!("expect-url:{pattern}"),
            ScenarioStep::Screenshot { name, .. } => format!("screenshot:{name}"),
            ScenarioStep::SaveSession { kind } => format!("save-session:{}", kind.as_str()),
            ScenarioStep::Sleep { ms } => format!("sleep:{ms}ms"),
        }
    }
}

impl ScenarioSpec {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml).map_err(HarnessError::from)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load every scenario under a directory, in file-name order.
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase() == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_scenario() {
        let yaml = r#"
name: login-valido
description: Login com credenciais validas redireciona para o dashboard
tags:
  - '@session:none'
  - '@smoke'
steps:
  - action: navigate
    path: /login
    wait_for_selector: '#email'
  - action: fill
    selector: '#email'
    value: qa@example.com
  - action: fill
    selector: '#password'
    value: secret
  - action: click
    selector: "button[type='submit']"
  - action: expect_url
    pattern: '/dashboard$'
    timeout_ms: 10000
  - action: screenshot
    name: dashboard-after-login
    full_page: true
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "login-valido");
        assert_eq!(spec.steps.len(), 6);
        assert!(spec.has_tag("@SESSION:NONE"));
        assert!(matches!(
            spec.steps[4],
            ScenarioStep::ExpectUrl { timeout_ms: 10000, .. }
        ));
    }

    #[test]
    fn test_parse_save_session_step() {
        let yaml = r#"
name: cadastro
steps:
  - action: navigate
    path: /cadastro
  - action: save_session
    kind: user
  - action: save_session
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        assert!(matches!(
            spec.steps[1],
            ScenarioStep::SaveSession {
                kind: SessionKind::User
            }
        ));
        // Kind defaults to user; profile is written only by renewal.
        assert!(matches!(
            spec.steps[2],
            ScenarioStep::SaveSession {
                kind: SessionKind::User
            }
        ));
    }

    #[test]
    fn test_wait_defaults() {
        let yaml = r#"
name: agendamentos
steps:
  - action: wait_for
    selector: '[data-testid="agenda-list"]'
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        match &spec.steps[0] {
            ScenarioStep::WaitFor {
                state, timeout_ms, ..
            } => {
                assert_eq!(*state, WaitState::Visible);
                assert_eq!(*timeout_ms, 5000);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_step_labels() {
        let step = ScenarioStep::Click {
            selector: "#confirmar".to_string(),
            timeout_ms: None,
        };
        assert_eq!(step.label(), "click:#confirmar");
        let step = ScenarioStep::SaveSession {
            kind: SessionKind::User,
        };
        assert_eq!(step.label(), "save-session:user");
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for (file, name) in [
            ("b-servicos.yaml", "servicos"),
            ("a-login.yaml", "login"),
            ("ignored.txt", "nope"),
        ] {
            std::fs::write(
                dir.path().join(file),
                format!("name: {name}\nsteps:\n  - action: navigate\n    path: /\n"),
            )
            .unwrap();
        }

        let specs = ScenarioSpec::load_all(dir.path()).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["login", "servicos"]);
    }
}
