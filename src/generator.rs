//! Meal and workout plan generation
//!
//! One [`PlanGenerator::generate`] call is one queue job: gather the
//! client's records, build the prompt, call the model, persist whatever came
//! back. Model output that is not valid JSON is stored flagged rather than
//! dropped, and can be repaired later.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::check_in;
use crate::error::CoachError;
use crate::i18n::Language;
use crate::knowledge::{build_knowledge_query, KnowledgeBase};
use crate::llm::{extract_json, strip_code_fence, TextGenerator};
use crate::models::plan::NewPlan;
use crate::models::{Plan, PlanContent, PlanKind};
use crate::onboarding;
use crate::plans;
use crate::prompts;

const KNOWLEDGE_LIMIT: usize = 5;
/// Any coach cycle length is a valid default duration
pub const MAX_DURATION_DAYS: i64 = crate::onboarding::MAX_CYCLE_LENGTH_DAYS;

/// Arguments of one generation job. Stored as the queue job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
  pub kind: PlanKind,
  pub user_id: String,
  pub check_in_id: Option<String>,
  pub language: Language,
  pub duration_days: i64,
}

/// Strict parse: fence stripping only
pub fn parse_plan_content(raw: &str) -> PlanContent {
  match serde_json::from_str(strip_code_fence(raw)) {
    Ok(value) => PlanContent::Structured(value),
    Err(_) => PlanContent::Unparsed {
      raw_text: raw.to_string(),
    },
  }
}

/// Plan windows run 1 to [`MAX_DURATION_DAYS`] days
pub fn validate_duration(duration_days: i64) -> Result<(), CoachError> {
  if !(1..=MAX_DURATION_DAYS).contains(&duration_days) {
    return Err(CoachError::Validation(format!(
      "duration must be between 1 and {} days",
      MAX_DURATION_DAYS
    )));
  }
  Ok(())
}

pub struct PlanGenerator {
  pool: sqlx::SqlitePool,
  llm: Arc<dyn TextGenerator>,
  knowledge: Arc<dyn KnowledgeBase>,
}

impl PlanGenerator {
  pub fn new(
    pool: sqlx::SqlitePool,
    llm: Arc<dyn TextGenerator>,
    knowledge: Arc<dyn KnowledgeBase>,
  ) -> Self {
    Self { pool, llm, knowledge }
  }

  /// Generate and persist one plan, returning its id
  pub async fn generate(&self, request: &GenerationRequest) -> Result<String, CoachError> {
    validate_duration(request.duration_days)?;

    let user_id = request.user_id.as_str();
    let profile = onboarding::get_profile(&self.pool, user_id)
      .await?
      .ok_or_else(|| CoachError::Precondition("profile not found".to_string()))?;
    let assessment = onboarding::get_assessment(&self.pool, user_id)
      .await?
      .ok_or_else(|| CoachError::Precondition("assessment not completed".to_string()))?;

    let check_in = match &request.check_in_id {
      Some(id) => Some(
        check_in::get_check_in(&self.pool, user_id, id)
          .await?
          .ok_or_else(|| CoachError::NotFound(format!("check-in {}", id)))?,
      ),
      None => None,
    };

    let query = build_knowledge_query(&assessment);
    let knowledge = match self.knowledge.search(&query, KNOWLEDGE_LIMIT).await {
      Ok(passages) => passages,
      Err(e) => {
        tracing::warn!(user_id, kind = %request.kind, error = %e, "knowledge retrieval failed, continuing without context");
        vec![]
      }
    };

    let system_prompt = prompts::build_system_prompt(request.kind, request.language);
    let user_prompt = prompts::build_user_prompt(
      request.kind,
      &profile,
      &assessment,
      check_in.as_ref(),
      &knowledge,
      request.duration_days,
    );

    let raw_text = self
      .llm
      .generate(&system_prompt, &user_prompt, prompts::generation_options(request.kind))
      .await?;

    let content = parse_plan_content(&raw_text);
    if content.is_parse_error() {
      tracing::warn!(user_id, kind = %request.kind, "model output was not valid JSON, storing raw text");
    }

    let (start_date, end_date) = plans::plan_window(Utc::now().date_naive(), request.duration_days);
    let plan_id = plans::insert_plan(
      &self.pool,
      &NewPlan {
        kind: request.kind,
        user_id: user_id.to_string(),
        check_in_id: request.check_in_id.clone(),
        language: request.language,
        start_date,
        end_date,
        content,
        raw_text,
      },
    )
    .await?;

    tracing::info!(user_id, kind = %request.kind, plan_id = %plan_id, "plan generated");
    Ok(plan_id)
  }
}

/// Re-run lenient extraction over a parse-failed plan's raw text. Plans that
/// already have structured content are returned unchanged.
pub async fn repair_plan(
  pool: &sqlx::SqlitePool,
  kind: PlanKind,
  user_id: &str,
  plan_id: &str,
) -> Result<Plan, CoachError> {
  let plan = plans::get_plan(pool, kind, user_id, plan_id)
    .await?
    .ok_or_else(|| CoachError::NotFound(format!("{} plan {}", kind, plan_id)))?;

  if !plan.content.is_parse_error() {
    return Ok(plan);
  }

  let value = extract_json(&plan.raw_text)
    .ok()
    .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
    .ok_or_else(|| CoachError::Validation("plan output could not be repaired".to_string()))?;

  plans::patch_plan_content(pool, kind, plan_id, &value).await?;
  tracing::info!(user_id, kind = %kind, plan_id, "plan content repaired");

  plans::get_plan(pool, kind, user_id, plan_id)
    .await?
    .ok_or_else(|| CoachError::NotFound(format!("{} plan {}", kind, plan_id)))
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{
    mock_check_in_fields, seed_onboarded_user, setup_test_db, teardown_test_db, FailingKnowledge,
    ScriptedGenerator, StaticKnowledge,
  };
  use serde_json::json;

  fn request(kind: PlanKind, check_in_id: Option<String>) -> GenerationRequest {
    GenerationRequest {
      kind,
      user_id: "user-1".to_string(),
      check_in_id,
      language: Language::En,
      duration_days: 14,
    }
  }

  #[test]
  fn test_parse_strips_fences() {
    let content = parse_plan_content("```json\n{\"days\": []}\n```");
    assert_eq!(content, PlanContent::Structured(json!({"days": []})));
  }

  #[test]
  fn test_parse_failure_keeps_raw_text() {
    let raw = "Here is your plan: Day 1 - oats";
    assert_eq!(
      parse_plan_content(raw),
      PlanContent::Unparsed {
        raw_text: raw.to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_generate_persists_plan_with_window() {
    let pool = setup_test_db().await;
    seed_onboarded_user(&pool, "user-1").await;
    let check_in_id = check_in::record(&pool, "user-1", &mock_check_in_fields()).await.unwrap();

    let llm = Arc::new(ScriptedGenerator::always(r#"{"days": [{"day": 1}]}"#));
    let generator = PlanGenerator::new(pool.clone(), llm.clone(), Arc::new(StaticKnowledge::new(vec!["Eat protein"])));

    let plan_id = generator
      .generate(&request(PlanKind::Meal, Some(check_in_id.clone())))
      .await
      .unwrap();

    let plan = plans::get_plan(&pool, PlanKind::Meal, "user-1", &plan_id).await.unwrap().unwrap();
    let today = Utc::now().date_naive();
    assert_eq!(plan.start_date, today);
    assert_eq!(plan.end_date, today + chrono::Duration::days(14));
    assert_eq!(plan.check_in_id, Some(check_in_id));
    assert!(!plan.content.is_parse_error());

    // Prompt carried the retrieved passage and the check-in
    let prompts = llm.user_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Eat protein"));
    assert!(prompts[0].contains("Energy level: 7/10"));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_missing_assessment_is_precondition_error() {
    let pool = setup_test_db().await;
    crate::onboarding::upsert_profile(&pool, "user-1", &Default::default()).await.unwrap();

    let llm = Arc::new(ScriptedGenerator::always("{}"));
    let generator = PlanGenerator::new(pool.clone(), llm.clone(), Arc::new(StaticKnowledge::new(vec![])));

    let err = generator.generate(&request(PlanKind::Workout, None)).await.unwrap_err();
    assert!(matches!(err, CoachError::Precondition(_)));
    assert!(llm.user_prompts().is_empty());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_retrieval_failure_is_soft() {
    let pool = setup_test_db().await;
    seed_onboarded_user(&pool, "user-1").await;

    let llm = Arc::new(ScriptedGenerator::always(r#"{"days": []}"#));
    let generator = PlanGenerator::new(pool.clone(), llm.clone(), Arc::new(FailingKnowledge));

    assert!(generator.generate(&request(PlanKind::Workout, None)).await.is_ok());
    assert!(!llm.user_prompts()[0].contains("COACH GUIDANCE"));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_unparseable_output_is_stored_then_repaired() {
    let pool = setup_test_db().await;
    seed_onboarded_user(&pool, "user-1").await;

    let raw = "Sure! Here is the plan:\n{\"days\": [{\"day\": 1}]}\nEnjoy.";
    let generator = PlanGenerator::new(
      pool.clone(),
      Arc::new(ScriptedGenerator::always(raw)),
      Arc::new(StaticKnowledge::new(vec![])),
    );

    let plan_id = generator.generate(&request(PlanKind::Meal, None)).await.unwrap();
    let stored = plans::get_plan(&pool, PlanKind::Meal, "user-1", &plan_id).await.unwrap().unwrap();
    assert_eq!(stored.content.to_payload(), json!({"raw": raw, "parseError": true}));

    let repaired = repair_plan(&pool, PlanKind::Meal, "user-1", &plan_id).await.unwrap();
    assert_eq!(repaired.content, PlanContent::Structured(json!({"days": [{"day": 1}]})));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_ai_errors_propagate() {
    let pool = setup_test_db().await;
    seed_onboarded_user(&pool, "user-1").await;

    let generator = PlanGenerator::new(
      pool.clone(),
      Arc::new(ScriptedGenerator::failing()),
      Arc::new(StaticKnowledge::new(vec![])),
    );

    let err = generator.generate(&request(PlanKind::Meal, None)).await.unwrap_err();
    assert!(matches!(err, CoachError::Llm(_)));
    assert!(plans::list_plans(&pool, PlanKind::Meal, "user-1").await.unwrap().is_empty());

    teardown_test_db(pool).await;
  }
}
