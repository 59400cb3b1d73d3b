pub mod ai_quota;
pub mod course_authoring;
pub mod course_query;
pub mod dashboard;
pub mod gamification;
pub mod instructor_ai;
pub mod llm_provider;
pub mod progress;
pub mod recommendation;
pub mod student_ai;
