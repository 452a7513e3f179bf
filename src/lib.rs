//! Coaching backend core: check-ins, AI plan generation on a bounded work
//! queue, a resumable check-in workflow and plan-ready notifications.
//!
//! [`AppState::bootstrap`] starts the work queue and recovers its table, so
//! only one process per database should build an `AppState`. Request
//! handlers belong in that process (normally `coach-worker`).

pub mod check_in;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod i18n;
pub mod identity;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod notifier;
pub mod onboarding;
pub mod plans;
pub mod prompts;
pub mod queue;
pub mod rate_gate;
pub mod state;
pub mod storage;
pub mod workflow;

#[cfg(test)]
mod test_utils;

pub use config::AppConfig;
pub use error::CoachError;
pub use state::AppState;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .compact()
    .init();
}
