use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::operations::enrollments::{Enrollment, EnrollmentStatus, QuizAttempt};
use crate::db::operations::{badges, enrollments, users};
use crate::db::DatabaseProxy;

pub const LESSON_COMPLETED_POINTS: i64 = 10;
pub const QUIZ_PASSED_POINTS: i64 = 20;
pub const COURSE_COMPLETED_POINTS: i64 = 100;
pub const POINTS_PER_LEVEL: i64 = 1000;
pub const QUIZ_PASS_RATIO: f64 = 0.7;

const STREAK_MILESTONES: [i32; 4] = [7, 14, 30, 100];

pub fn level_for_points(points: i64) -> i32 {
    let level = points.max(0) / POINTS_PER_LEVEL + 1;
    i32::try_from(level).unwrap_or(i32::MAX)
}

pub fn is_quiz_passed(score: f64, max_score: f64) -> bool {
    max_score > 0.0 && score / max_score >= QUIZ_PASS_RATIO
}

/// Distinct quiz lessons with at least one passing attempt.
pub fn passed_quiz_lessons<'a>(attempts: impl IntoIterator<Item = &'a QuizAttempt>) -> HashSet<Uuid> {
    attempts
        .into_iter()
        .filter(|attempt| is_quiz_passed(attempt.score, attempt.max_score))
        .map(|attempt| attempt.lesson_id)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub current: i32,
    pub longest: i32,
    pub last_activity_date: Option<NaiveDate>,
}

impl Streak {
    /// Same day keeps the streak, the next day extends it, any gap restarts it.
    pub fn record_activity(self, today: NaiveDate) -> Self {
        let current = match self.last_activity_date {
            Some(last) if last == today => self.current.max(1),
            Some(last) if last.succ_opt() == Some(today) => self.current.saturating_add(1),
            Some(last) if last > today => return self,
            _ => 1,
        };

        Self {
            current,
            longest: self.longest.max(current),
            last_activity_date: Some(today),
        }
    }

    pub fn is_active_on(&self, day: NaiveDate) -> bool {
        self.last_activity_date == Some(day)
    }
}

pub fn next_streak_milestone(current: i32) -> i32 {
    STREAK_MILESTONES
        .iter()
        .copied()
        .find(|milestone| current < *milestone)
        .unwrap_or_else(|| current.saturating_add(50))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeCriterion {
    LessonsCompleted,
    CoursesCompleted,
    StreakDays,
    QuizzesPassed,
    PointsEarned,
}

impl BadgeCriterion {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lessons_completed" => Some(Self::LessonsCompleted),
            "courses_completed" => Some(Self::CoursesCompleted),
            "streak_days" => Some(Self::StreakDays),
            "quizzes_passed" => Some(Self::QuizzesPassed),
            "points_earned" => Some(Self::PointsEarned),
            _ => None,
        }
    }

    fn current_value(self, totals: &LearnerTotals) -> i64 {
        match self {
            Self::LessonsCompleted => totals.lessons_completed,
            Self::CoursesCompleted => totals.courses_completed,
            Self::StreakDays => i64::from(totals.longest_streak),
            Self::QuizzesPassed => totals.quizzes_passed,
            Self::PointsEarned => totals.points,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub criterion: BadgeCriterion,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LearnerTotals {
    pub lessons_completed: i64,
    pub courses_completed: i64,
    pub quizzes_passed: i64,
    pub longest_streak: i32,
    pub points: i64,
}

impl LearnerTotals {
    pub fn from_enrollments<'a>(
        enrollments: impl IntoIterator<Item = &'a Enrollment>,
        points: i64,
        longest_streak: i32,
    ) -> Self {
        let mut totals = Self {
            points,
            longest_streak,
            ..Self::default()
        };

        for enrollment in enrollments {
            totals.lessons_completed += enrollment.progress.completed_lessons.len() as i64;
            if enrollment.status == EnrollmentStatus::Completed {
                totals.courses_completed += 1;
            }
            totals.quizzes_passed += passed_quiz_lessons(&enrollment.quiz_attempts).len() as i64;
        }

        totals
    }
}

pub fn newly_earned_badges<'a>(
    definitions: &'a [BadgeDefinition],
    already_earned: &HashSet<String>,
    totals: &LearnerTotals,
) -> Vec<&'a BadgeDefinition> {
    definitions
        .iter()
        .filter(|badge| !already_earned.contains(&badge.id))
        .filter(|badge| badge.criterion.current_value(totals) >= badge.value)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOutcome {
    pub points_awarded: i64,
    pub total_points: i64,
    pub level: i32,
    pub streak: Streak,
    pub new_badges: Vec<BadgeDefinition>,
}

/// Credits points, advances the streak and awards any badge whose criterion
/// is now satisfied.
pub async fn record_activity(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    points: i64,
    now: DateTime<Utc>,
) -> Result<ActivityOutcome, sqlx::Error> {
    let today = now.date_naive();
    let gamification = users::apply_activity(proxy, user_id, points, today).await?;

    let enrollments = enrollments::list_for_user(proxy, user_id, None).await?;
    let totals = LearnerTotals::from_enrollments(
        enrollments.iter().map(|item| &item.enrollment),
        gamification.points,
        gamification.streak.longest,
    );

    let definitions = badges::list_definitions(proxy).await?;
    let earned = badges::earned_badge_ids(proxy, user_id).await?;
    let candidates: Vec<String> = newly_earned_badges(&definitions, &earned, &totals)
        .into_iter()
        .map(|badge| badge.id.clone())
        .collect();

    let awarded = badges::award(proxy, user_id, &candidates, now).await?;
    let new_badges: Vec<BadgeDefinition> = definitions
        .into_iter()
        .filter(|badge| awarded.contains(&badge.id))
        .collect();

    if !new_badges.is_empty() {
        tracing::info!(
            user_id = %user_id,
            badges = ?new_badges.iter().map(|b| b.id.as_str()).collect::<Vec<_>>(),
            "badges awarded"
        );
    }

    Ok(ActivityOutcome {
        points_awarded: points,
        total_points: gamification.points,
        level: gamification.level,
        streak: gamification.streak,
        new_badges,
    })
}
