pub mod check_in;
pub mod onboarding;
pub mod plan;

pub use check_in::{CheckIn, CheckInFields, Measurements};
pub use onboarding::{Assessment, CoachingStatus, ExperienceLevel, Profile, Role};
pub use plan::{Plan, PlanContent, PlanKind};
