//! File-backed persistence of captured sessions

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Environment;
use crate::error::HarnessResult;
use crate::session::state::StoredSession;

/// Age after which a session file is swept at process start.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Which of the two stored sessions a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    User,
    Profile,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::User => "user",
            SessionKind::Profile => "profile",
        }
    }
}

impl Default for SessionKind {
    fn default() -> Self {
        SessionKind::User
    }
}

/// One session file per (environment, kind) pair. Only the renewal engine
/// and the save-session step write; scenario-time readers only read.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    environment: Environment,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            dir: dir.into(),
            environment,
        }
    }

    /// Path of the session file for a kind. The directory and the file name
    /// both carry the environment, so paths cannot collide across
    /// environments.
    pub fn path(&self, kind: SessionKind) -> PathBuf {
        self.dir
            .join(format!("session-{}-{}.json", kind.as_str(), self.environment))
    }

    pub fn exists(&self, kind: SessionKind) -> bool {
        self.path(kind).exists()
    }

    /// Load a stored session. Absent, unreadable and corrupt files are all
    /// reported as `None`; callers treat every one of those as "no session".
    pub fn load(&self, kind: SessionKind) -> Option<StoredSession> {
        let path = self.path(kind);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("session file {} not readable: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(
                    "session file {} is corrupt, treating as absent: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persist a session, fully rewriting the target file. The document is
    /// written to a temporary file in the same directory and renamed into
    /// place, so a partial write is never observable as a complete session.
    pub fn save(&self, kind: SessionKind, session: &StoredSession) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path(kind);
        let json = serde_json::to_string_pretty(session)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(
            "session ({}) saved to {} ({} bytes)",
            kind.as_str(),
            path.display(),
            size
        );
        Ok(path)
    }

    /// Delete session files older than `max_age` (by modification time).
    /// Runs once at process start, never mid-scenario.
    pub fn sweep_expired(&self, max_age: Duration) {
        for kind in [SessionKind::User, SessionKind::Profile] {
            let path = self.path(kind);
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            let expired = meta
                .modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .map(|age| age > max_age)
                .unwrap_or(false);

            if expired {
                match std::fs::remove_file(&path) {
                    Ok(()) => info!("expired session removed: {}", path.display()),
                    Err(e) => warn!("could not remove expired session {}: {}", path.display(), e),
                }
            }
        }
    }
}
