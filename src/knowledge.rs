//! Coach knowledge retrieval
//!
//! Coaches curate short passages (nutrition rules, programming notes). At
//! generation time the assessment is turned into a query and the best
//! matching passages are appended to the prompt as context.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::db::to_millis;
use crate::error::CoachError;
use crate::models::Assessment;

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
  async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CoachError>;
}

/// Query text from the parts of an assessment that steer a plan
pub fn build_knowledge_query(assessment: &Assessment) -> String {
  let mut parts = vec![assessment.goals.clone(), assessment.experience_level.as_str().to_string()];
  parts.extend(assessment.dietary_restrictions.iter().cloned());
  parts.extend(assessment.dietary_preferences.iter().cloned());
  parts.extend(assessment.allergies.iter().cloned());
  parts.retain(|p| !p.trim().is_empty());
  parts.join(" ")
}

fn terms(text: &str) -> HashSet<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| t.chars().count() > 2)
    .map(|t| t.to_lowercase())
    .collect()
}

/// Passages stored in `coach_knowledge`, ranked by how many distinct query
/// terms they contain
pub struct SqliteKnowledgeBase {
  pool: SqlitePool,
}

impl SqliteKnowledgeBase {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  pub async fn add_passage(
    &self,
    title: &str,
    body: &str,
    created_by: &str,
  ) -> Result<i64, CoachError> {
    if title.trim().is_empty() || body.trim().is_empty() {
      return Err(CoachError::Validation("passage title and body are required".to_string()));
    }

    let result = sqlx::query(
      "INSERT INTO coach_knowledge (title, body, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(title.trim())
    .bind(body.trim())
    .bind(created_by)
    .bind(to_millis(Utc::now()))
    .execute(&self.pool)
    .await?;

    Ok(result.last_insert_rowid())
  }
}

#[async_trait]
impl KnowledgeBase for SqliteKnowledgeBase {
  async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CoachError> {
    let wanted = terms(query);
    if wanted.is_empty() || limit == 0 {
      return Ok(vec![]);
    }

    let rows = sqlx::query("SELECT title, body FROM coach_knowledge ORDER BY created_at DESC, id DESC")
      .fetch_all(&self.pool)
      .await?;

    let mut scored: Vec<(usize, String)> = rows
      .iter()
      .filter_map(|row| {
        let title: String = row.get("title");
        let body: String = row.get("body");
        let haystack = terms(&format!("{} {}", title, body));
        let score = wanted.intersection(&haystack).count();
        (score > 0).then(|| (score, format!("{}: {}", title, body)))
      })
      .collect();

    // Stable: equal scores keep newest-first order
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(limit);

    Ok(scored.into_iter().map(|(_, passage)| passage).collect())
  }
}
