//! Prompt construction for plan generation
//!
//! Output is a pure function of its inputs: the same profile, assessment,
//! check-in and retrieved passages always produce the same prompt text.

use crate::i18n::Language;
use crate::llm::GenerationOptions;
use crate::models::{Assessment, CheckIn, PlanKind, Profile};

const MEAL_SYSTEM: &str = include_str!("prompts/meal_system.txt");
const WORKOUT_SYSTEM: &str = include_str!("prompts/workout_system.txt");
const ARABIC_ADDENDUM: &str = include_str!("prompts/arabic.txt");

const MEAL_SHAPE: &str = r#"{
  "summary": "One or two sentences on the approach for this period",
  "dailyCalories": 2200,
  "macros": {"proteinG": 160, "carbsG": 220, "fatG": 70},
  "days": [
    {
      "day": 1,
      "meals": [
        {
          "name": "Breakfast",
          "time": "08:00",
          "items": [{"food": "Oats", "quantity": "60 g"}],
          "calories": 450,
          "proteinG": 30
        }
      ]
    }
  ],
  "tips": ["Short practical tip"]
}"#;

const WORKOUT_SHAPE: &str = r#"{
  "summary": "One or two sentences on the focus for this period",
  "daysPerWeek": 4,
  "days": [
    {
      "day": 1,
      "focus": "Upper body",
      "exercises": [
        {"name": "Push-up", "sets": 3, "reps": "8-12", "restSeconds": 90, "notes": "Slow lowering"}
      ]
    }
  ],
  "progression": "How to progress week to week",
  "tips": ["Short practical tip"]
}"#;

pub fn generation_options(kind: PlanKind) -> GenerationOptions {
  match kind {
    PlanKind::Meal => GenerationOptions {
      temperature: 0.7,
      max_tokens: 8192,
    },
    PlanKind::Workout => GenerationOptions {
      temperature: 0.6,
      max_tokens: 6144,
    },
  }
}

pub fn build_system_prompt(kind: PlanKind, language: Language) -> String {
  let base = match kind {
    PlanKind::Meal => MEAL_SYSTEM,
    PlanKind::Workout => WORKOUT_SYSTEM,
  };

  match language {
    Language::Ar => format!("{}\n{}", base.trim_end(), ARABIC_ADDENDUM),
    Language::En => base.to_string(),
  }
}

fn list_or_none(items: &[String]) -> String {
  if items.is_empty() {
    "none".to_string()
  } else {
    items.join(", ")
  }
}

fn push_opt<T: std::fmt::Display>(out: &mut String, label: &str, value: Option<T>, unit: &str) {
  if let Some(v) = value {
    out.push_str(&format!("- {}: {}{}\n", label, v, unit));
  }
}

pub fn build_user_prompt(
  kind: PlanKind,
  profile: &Profile,
  assessment: &Assessment,
  check_in: Option<&CheckIn>,
  knowledge: &[String],
  duration_days: i64,
) -> String {
  let mut out = String::new();

  out.push_str(&format!(
    "Create a {}-day {} plan for this client.\n\n",
    duration_days,
    kind.as_str()
  ));

  out.push_str("CLIENT PROFILE:\n");
  if let Some(name) = &profile.display_name {
    out.push_str(&format!("- Name: {}\n", name));
  }
  out.push_str(&format!("- Goals: {}\n", assessment.goals));
  out.push_str(&format!("- Experience: {}\n", assessment.experience_level.as_str()));
  push_opt(&mut out, "Age", assessment.age, "");
  push_opt(&mut out, "Gender", assessment.gender.as_deref(), "");
  push_opt(&mut out, "Height", assessment.height_cm, " cm");
  push_opt(&mut out, "Starting weight", assessment.weight_kg, " kg");
  push_opt(&mut out, "Target weight", assessment.target_weight_kg, " kg");
  push_opt(&mut out, "Activity level", assessment.activity_level.as_deref(), "");

  match kind {
    PlanKind::Meal => {
      out.push_str(&format!("- Dietary preferences: {}\n", list_or_none(&assessment.dietary_preferences)));
      out.push_str(&format!("- Allergies: {}\n", list_or_none(&assessment.allergies)));
      out.push_str(&format!("- Dietary restrictions: {}\n", list_or_none(&assessment.dietary_restrictions)));
    }
    PlanKind::Workout => {
      out.push_str(&format!("- Equipment: {}\n", list_or_none(&assessment.equipment)));
      push_opt(&mut out, "Training days per week", assessment.training_days_per_week, "");
      push_opt(&mut out, "Session length", assessment.session_minutes, " min");
    }
  }
  push_opt(&mut out, "Medical notes", assessment.medical_notes.as_deref(), "");

  if let Some(check_in) = check_in {
    let f = &check_in.fields;
    out.push_str("\nLATEST CHECK-IN:\n");
    push_opt(&mut out, "Weight", f.weight, " kg");
    for (name, value) in f.measurements.named() {
      push_opt(&mut out, name, value, " cm");
    }
    out.push_str(&format!("- Workout performance: {}\n", f.workout_performance));
    out.push_str(&format!("- Energy level: {}/10\n", f.energy_level));
    out.push_str(&format!("- Sleep quality: {}/10\n", f.sleep_quality));
    out.push_str(&format!("- Dietary adherence: {}/10\n", f.dietary_adherence));
    push_opt(&mut out, "Notes", f.notes.as_deref(), "");
  }

  if !knowledge.is_empty() {
    out.push_str("\nCOACH GUIDANCE:\n");
    for passage in knowledge {
      out.push_str(&format!("- {}\n", passage));
    }
  }

  let shape = match kind {
    PlanKind::Meal => MEAL_SHAPE,
    PlanKind::Workout => WORKOUT_SHAPE,
  };
  out.push_str(&format!(
    "\nInclude exactly {} entries in \"days\". Respond with valid JSON in this exact shape:\n{}",
    duration_days, shape
  ));

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{mock_assessment, mock_check_in, mock_profile};

  #[test]
  fn test_arabic_adds_language_instruction() {
    let en = build_system_prompt(PlanKind::Meal, Language::En);
    let ar = build_system_prompt(PlanKind::Meal, Language::Ar);
    assert!(!en.contains("Modern Standard Arabic"));
    assert!(ar.contains("Modern Standard Arabic"));
    assert!(ar.starts_with(en.trim_end()));
  }

  #[test]
  fn test_user_prompt_is_deterministic() {
    let profile = mock_profile("user-1");
    let assessment = mock_assessment();
    let check_in = mock_check_in("user-1");
    let knowledge = vec!["Protein: 2g per kg".to_string()];

    let a = build_user_prompt(PlanKind::Workout, &profile, &assessment, Some(&check_in), &knowledge, 14);
    let b = build_user_prompt(PlanKind::Workout, &profile, &assessment, Some(&check_in), &knowledge, 14);
    assert_eq!(a, b);
  }

  #[test]
  fn test_user_prompt_embeds_check_in_and_guidance() {
    let profile = mock_profile("user-1");
    let assessment = mock_assessment();
    let check_in = mock_check_in("user-1");

    let prompt = build_user_prompt(
      PlanKind::Meal,
      &profile,
      &assessment,
      Some(&check_in),
      &["Halal: no pork".to_string()],
      14,
    );
    assert!(prompt.contains("Create a 14-day meal plan"));
    assert!(prompt.contains("- Weight: 80 kg"));
    assert!(prompt.contains("- Energy level: 7/10"));
    assert!(prompt.contains("COACH GUIDANCE:\n- Halal: no pork"));
    assert!(prompt.contains("\"dailyCalories\""));

    let without = build_user_prompt(PlanKind::Meal, &profile, &assessment, None, &[], 7);
    assert!(!without.contains("LATEST CHECK-IN"));
    assert!(!without.contains("COACH GUIDANCE"));
  }
}
