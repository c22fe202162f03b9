//! Session lifecycle subsystem: classification, persistence, restoration
//! and renewal of captured authentication state.

pub mod classifier;
pub mod renewal;
pub mod restorer;
pub mod state;
pub mod store;

pub use classifier::{resolve, SessionRequirement};
pub use renewal::{RenewalEngine, RenewalOutcome, AUTH_COOKIE_NAME, RENEWAL_SAFETY_MARGIN};
pub use restorer::{RestoreOutcome, SessionRestorer};
pub use state::{Cookie, LocalStorageEntry, OriginState, SessionMeta, StoredSession};
pub use store::{SessionKind, SessionStore, SESSION_MAX_AGE};

use chrono::Utc;

use crate::browser::{BrowserContext, BrowserPage};
use crate::config::Environment;
use crate::error::HarnessResult;

/// Capture the context's cookies and the current page's localStorage as a
/// complete stored session tagged with environment metadata.
pub(crate) async fn capture_storage_state(
    context: &dyn BrowserContext,
    page: &dyn BrowserPage,
    origin: &str,
    environment: Environment,
) -> HarnessResult<StoredSession> {
    let cookies = context.cookies().await?;
    let value = page
        .evaluate("Object.entries(localStorage).map(([name, value]) => ({ name, value }))")
        .await?;
    let local_storage: Vec<LocalStorageEntry> = serde_json::from_value(value).unwrap_or_default();

    Ok(StoredSession {
        cookies,
        origins: vec![OriginState {
            origin: origin.to_string(),
            local_storage,
        }],
        meta: Some(SessionMeta {
            environment: environment.to_string(),
            created_at: Utc::now().to_rfc3339(),
            dominio: origin.to_string(),
        }),
    })
}
