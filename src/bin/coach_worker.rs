//! Owns the work queue and workflow driver. Run one instance per database.

use tokio::signal;

use checkin_coach_lib::{init_tracing, AppConfig, AppState, CoachError};

#[tokio::main]
async fn main() -> Result<(), CoachError> {
  // Load environment variables from .env file
  dotenvy::dotenv().ok();
  init_tracing();

  let config = AppConfig::from_env()?;
  tracing::info!(
    component = "worker",
    max_parallelism = config.queue.max_parallelism,
    smtp_enabled = config.smtp.is_some(),
    blob_gateway = config.blob_gateway_url.is_some(),
    "loaded configuration"
  );

  let state = AppState::bootstrap(config).await?;

  let resumed = state.workflow.resume_incomplete().await?;
  if !resumed.is_empty() {
    tracing::info!(count = resumed.len(), "resuming interrupted check-in workflows");
  }

  if let Err(e) = signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for shutdown signal");
  }
  tracing::info!("worker received shutdown signal");

  state.shutdown().await;
  Ok(())
}
