use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::CoachError;

pub type DbPool = SqlitePool;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Initialize the database connection pool and run migrations
pub async fn initialize_db(database_url: &str) -> Result<DbPool, CoachError> {
  tracing::info!(database_url, "initializing database");

  let options = SqliteConnectOptions::from_str(database_url)?
    .create_if_missing(true)
    .foreign_keys(true);

  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect_with(options)
    .await?;

  MIGRATOR.run(&pool).await?;

  tracing::info!("database initialized");
  Ok(pool)
}

/// Unix milliseconds, the storage format for every timestamp column
pub fn to_millis(at: DateTime<Utc>) -> i64 {
  at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Generate a new record id
pub fn new_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// Decode a JSON text column holding a string list; bad data reads as empty
pub fn decode_string_list(json: &str) -> Vec<String> {
  serde_json::from_str(json).unwrap_or_default()
}

pub fn encode_string_list(items: &[String]) -> String {
  serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
