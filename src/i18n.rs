//! Supported client languages and the few user-facing strings the core emits

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  #[default]
  En,
  Ar,
}

impl Language {
  /// Anything other than "ar" is treated as English
  pub fn from_code(code: &str) -> Self {
    if code.trim().eq_ignore_ascii_case("ar") {
      Self::Ar
    } else {
      Self::En
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      Self::En => "en",
      Self::Ar => "ar",
    }
  }
}

/// Human-readable "try again in ..." hint
pub fn retry_hint(language: Language, retry_after_secs: u64) -> String {
  let hours = retry_after_secs / 3600;
  let minutes = (retry_after_secs % 3600).div_ceil(60);
  let days = retry_after_secs.div_ceil(86_400);

  match language {
    Language::En if retry_after_secs >= 2 * 86_400 => format!("{} days", days),
    Language::En if hours > 0 => format!("{}h {}m", hours, minutes),
    Language::En => format!("{} min", minutes.max(1)),
    Language::Ar if retry_after_secs >= 2 * 86_400 => format!("{} أيام", days),
    Language::Ar if hours > 0 => format!("{} ساعة و{} دقيقة", hours, minutes),
    Language::Ar => format!("{} دقيقة", minutes.max(1)),
  }
}

pub fn submission_limit_message(language: Language, limit: u32, retry_after_secs: u64) -> String {
  let wait = retry_hint(language, retry_after_secs);
  match language {
    Language::En => format!(
      "You can submit at most {} check-ins per day. Try again in {}.",
      limit, wait
    ),
    Language::Ar => format!(
      "يمكنك إرسال {} تسجيلات كحد أقصى يوميًا. حاول مرة أخرى بعد {}.",
      limit, wait
    ),
  }
}

pub fn quota_message(language: Language, cycle_days: i64, retry_after_secs: u64) -> String {
  let wait = retry_hint(language, retry_after_secs);
  match language {
    Language::En => format!(
      "New plans were already generated in this {}-day coaching cycle. Try again in {}.",
      cycle_days, wait
    ),
    Language::Ar => format!(
      "تم إنشاء خطط جديدة بالفعل في دورة التدريب الحالية ({} يومًا). حاول مرة أخرى بعد {}.",
      cycle_days, wait
    ),
  }
}

/// Check-in kept, but no new plans
pub fn generation_failed_warning(language: Language) -> &'static str {
  match language {
    Language::En => "Your check-in was saved, but we couldn't generate new plans. Your current plans stay active.",
    Language::Ar => "تم حفظ تسجيلك، لكن تعذر إنشاء خطط جديدة. ستبقى خططك الحالية فعالة.",
  }
}

pub fn generation_timed_out_warning(language: Language) -> &'static str {
  match language {
    Language::En => "Your check-in was saved, but plan generation is taking longer than expected.",
    Language::Ar => "تم حفظ تسجيلك، لكن إنشاء الخطط يستغرق وقتًا أطول من المتوقع.",
  }
}

/// Push notification title and body once both plans exist
pub fn plans_ready_push(language: Language) -> (&'static str, &'static str) {
  match language {
    Language::En => ("Your new plans are ready", "Your meal and workout plans have been updated."),
    Language::Ar => ("خططك الجديدة جاهزة", "تم تحديث خطة الوجبات وخطة التمارين الخاصة بك."),
  }
}

/// Email subject and body for users without push notifications
pub fn plans_ready_email(language: Language, name: Option<&str>) -> (String, String) {
  match language {
    Language::En => (
      "Your new coaching plans are ready".to_string(),
      format!(
        "Hi {},\n\nThanks for checking in. Your updated meal and workout plans are ready in the app.\n",
        name.unwrap_or("there")
      ),
    ),
    Language::Ar => (
      "خططك التدريبية الجديدة جاهزة".to_string(),
      format!(
        "مرحبًا {}،\n\nشكرًا على تسجيلك. خطة الوجبات وخطة التمارين المحدثتان متاحتان الآن في التطبيق.\n",
        name.unwrap_or("")
      ),
    ),
  }
}
