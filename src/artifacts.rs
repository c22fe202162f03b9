//! Per-environment filesystem layout for run artifacts
//!
//! Session files, temporary browser profile data, evidence screenshots and
//! suite results each get a stable location under the workspace root,
//! segregated by environment so dev and prod runs never share state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{Environment, HarnessConfig};
use crate::error::HarnessResult;

/// Replace anything outside `[A-Za-z0-9_-]` so labels and scenario names
/// are safe as file names.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
    environment: Environment,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            root: root.into(),
            environment,
        }
    }

    pub fn for_config(config: &HarnessConfig) -> Self {
        Self::new(".", config.environment)
    }

    /// Directory holding the per-environment session files.
    pub fn session_dir(&self) -> PathBuf {
        self.root
            .join("test-data/session")
            .join(self.environment.as_str())
    }

    /// Root for disposable browser profile directories.
    pub fn user_data_root(&self) -> PathBuf {
        self.root
            .join("test-data/temp-user-data")
            .join(self.environment.as_str())
    }

    /// Failure screenshots and other diagnostic output.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("test-artifacts")
    }

    /// Per-step evidence screenshots.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.artifacts_dir().join("screenshots")
    }

    /// Context video recordings, when the video policy is on.
    pub fn videos_dir(&self) -> PathBuf {
        self.artifacts_dir().join("videos")
    }

    /// Suite result documents.
    pub fn results_dir(&self) -> PathBuf {
        self.root.join("test-results")
    }

    /// Create the whole directory layout.
    pub fn ensure_layout(&self) -> HarnessResult<()> {
        for dir in [
            self.session_dir(),
            self.user_data_root(),
            self.artifacts_dir(),
            self.screenshots_dir(),
            self.results_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        info!("environment: {}", self.environment);
        info!("session dir: {}", self.session_dir().display());
        info!("user data dir: {}", self.user_data_root().display());
        Ok(())
    }

    /// Timestamped path for a login-failure screenshot.
    pub fn login_failure_screenshot(&self) -> PathBuf {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
        self.artifacts_dir().join(format!(
            "login-error-{}-{}.png",
            self.environment, timestamp
        ))
    }

    /// A fresh, collision-free browser profile directory for one use,
    /// falling back to the system temp dir when the workspace location
    /// cannot be created.
    pub fn unique_user_data_dir(&self, label: &str) -> HarnessResult<PathBuf> {
        static SEQ: AtomicU64 = AtomicU64::new(0);

        let base = {
            let sanitized = sanitize(label);
            if sanitized.is_empty() {
                format!("process-{}", std::process::id())
            } else {
                sanitized
            }
        };
        let stamp = Utc::now().timestamp_millis();
        let seq = SEQ.fetch_add(1, Ordering::SeqCst);

        let dir = self
            .user_data_root()
            .join(format!("{base}_{stamp}_{seq}"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Ok(dir),
            Err(e) => {
                warn!("could not create {}: {e}, using system tmp", dir.display());
                let fallback = std::env::temp_dir().join(format!(
                    "playwright-{}-{base}-{stamp}-{seq}",
                    self.environment
                ));
                std::fs::create_dir_all(&fallback)?;
                Ok(fallback)
            }
        }
    }

    /// Drop accumulated browser profile data. CI wipes it; local runs keep
    /// it around for debugging.
    pub fn clean_user_data(&self, ci: bool) {
        if !ci {
            info!(
                "keeping user data for debugging (environment: {})",
                self.environment
            );
            return;
        }
        let root = self.user_data_root();
        if root.exists() {
            if let Err(e) = std::fs::remove_dir_all(&root) {
                warn!("failed to remove {}: {e}", root.display());
            }
        }
        if let Err(e) = std::fs::create_dir_all(&root) {
            warn!("failed to recreate {}: {e}", root.display());
        }
        info!("user data cleared (environment: {})", self.environment);
    }
}

/// Writes labeled evidence screenshots into a directory, numbering them so
/// attachment order is preserved on disk.
#[derive(Debug)]
pub struct EvidenceSink {
    dir: PathBuf,
    counter: AtomicU64,
}

impl EvidenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(1),
        })
    }

    /// Reserve the path for the next attachment with this label.
    pub fn next_path(&self, label: &str) -> PathBuf {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        self.dir.join(format!("{seq:04}-{}.png", sanitize(label)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("login | ok"), "login___ok");
        assert_eq!(sanitize("cadastro-básico"), "cadastro-b_sico");
        assert_eq!(sanitize("plain_name-1"), "plain_name-1");
    }

    #[test]
    fn test_layout_is_environment_scoped() {
        let dev = ArtifactPaths::new("/work", Environment::Dev);
        let prod = ArtifactPaths::new("/work", Environment::Prod);
        assert_ne!(dev.session_dir(), prod.session_dir());
        assert_ne!(dev.user_data_root(), prod.user_data_root());
        assert!(dev.session_dir().ends_with("test-data/session/dev"));
    }

    #[test]
    fn test_unique_user_data_dirs_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(tmp.path(), Environment::Dev);
        let a = paths.unique_user_data_dir("login scenario").unwrap();
        let b = paths.unique_user_data_dir("login scenario").unwrap();
        assert_ne!(a, b);
        assert!(a.exists());
        assert!(b.exists());
    }

    #[test]
    fn test_clean_user_data_keeps_local_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(tmp.path(), Environment::Dev);
        let dir = paths.unique_user_data_dir("scenario").unwrap();

        paths.clean_user_data(false);
        assert!(dir.exists());

        paths.clean_user_data(true);
        assert!(!dir.exists());
        assert!(paths.user_data_root().exists());
    }

    #[test]
    fn test_evidence_paths_are_ordered_and_labeled() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = EvidenceSink::new(tmp.path().join("shots")).unwrap();
        let first = sink.next_path("Screenshot | login | fill email");
        let second = sink.next_path("FAILED Screenshot | login | submit");
        let first_name = first.file_name().unwrap().to_string_lossy().to_string();
        let second_name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(first_name.starts_with("0001-"));
        assert!(second_name.starts_with("0002-"));
        assert!(second_name.contains("FAILED_Screenshot"));
        assert!(first < second);
    }
}
