//! AgendaPro E2E Test Harness
//!
//! This crate drives browser end-to-end tests against the AgendaPro
//! scheduling web app, with first-class management of authenticated
//! session reuse across runs:
//! - Controls Playwright through a long-lived Node sidecar (JSON-lines
//!   protocol over stdio)
//! - Classifies scenarios by tag into a session requirement
//! - Persists captured sessions per environment and restores them into
//!   fresh browser contexts
//! - Renews stale sessions once per run with a real login
//! - Isolates per-scenario failure state and tears down broken pages
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   HarnessRunner (per run)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  sweep_expired()  ──  once, at start                        │
//! │  RenewalEngine.run()  ──  once, before scenarios            │
//! │    ├── should_renew()  (CI / absent files / token expiry)   │
//! │    └── login + capture storage state ──▶ SessionStore       │
//! │  per scenario:                                              │
//! │    ScenarioLifecycle.begin(tags, context, page)             │
//! │      ├── classifier::resolve(tags) -> none | user | profile │
//! │      ├── SessionRestorer.clear() / .restore()  ◀─ Store     │
//! │      └── ScenarioGuard: run_step()* then finish()           │
//! │            └── on failure: abort routes, close page+context │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Bridge (Node sidecar)  ──  implements BrowserContext/Page  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod bridge;
pub mod browser;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod session;
pub mod spec;

pub use config::{Environment, HarnessConfig};
pub use error::{BestEffort, HarnessError, HarnessResult};
pub use runner::{HarnessRunner, RunnerConfig, SuiteResult};
pub use session::{SessionKind, SessionRequirement, SessionStore, StoredSession};
pub use spec::{ScenarioSpec, ScenarioStep};
