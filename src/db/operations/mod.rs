pub mod ai_generations;
pub mod badges;
pub mod courses;
pub mod enrollments;
pub mod users;
