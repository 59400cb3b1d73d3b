use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::operations::badges::EarnedBadge;
use crate::db::operations::enrollments::{
    Certificate, EnrolledCourseSummary, EnrollmentStatus, EnrollmentWithCourse,
};
use crate::db::operations::users::{Gamification, User};
use crate::services::gamification::{self, BadgeDefinition, Streak, POINTS_PER_LEVEL};

const DASHBOARD_COURSES: usize = 6;
const WEEKLY_WINDOW_DAYS: i64 = 7;
const NEW_BADGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpProgress {
    pub current: i64,
    pub next_level: i64,
    pub percentage: i64,
}

pub fn xp_progress(points: i64, level: i32) -> XpProgress {
    let next_level = i64::from(level.max(1)) * POINTS_PER_LEVEL;
    let percentage = (points as f64 / next_level as f64 * 100.0).round() as i64;
    XpProgress {
        current: points,
        next_level,
        percentage,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyStats {
    /// Minutes.
    pub time_spent: i64,
    pub lessons_completed: i64,
    pub quizzes_attempted: i64,
    pub avg_quiz_score: i64,
}

/// Activity of enrollments touched in the last seven days.
pub fn weekly_stats(enrollments: &[EnrollmentWithCourse], now: DateTime<Utc>) -> WeeklyStats {
    let since = now - Duration::days(WEEKLY_WINDOW_DAYS);
    let recent: Vec<_> = enrollments
        .iter()
        .map(|item| &item.enrollment)
        .filter(|e| e.progress.last_accessed_at >= since)
        .collect();

    let seconds: i64 = recent.iter().map(|e| e.progress.time_spent).sum();
    let attempts: Vec<_> = recent.iter().flat_map(|e| e.quiz_attempts.iter()).collect();

    let avg_quiz_score = if attempts.is_empty() {
        0
    } else {
        let total: f64 = attempts
            .iter()
            .filter(|a| a.max_score > 0.0)
            .map(|a| a.score / a.max_score * 100.0)
            .sum();
        (total / attempts.len() as f64).round() as i64
    };

    WeeklyStats {
        time_spent: (seconds as f64 / 60.0).round() as i64,
        lessons_completed: recent
            .iter()
            .map(|e| e.progress.completed_lessons.len() as i64)
            .sum(),
        quizzes_attempted: attempts.len() as i64,
        avg_quiz_score,
    }
}

pub fn estimated_time_to_complete(total_duration: i32, percentage: i32) -> i64 {
    let remaining = 100 - percentage.clamp(0, 100);
    (f64::from(total_duration) * f64::from(remaining) / 100.0).round() as i64
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardProgress {
    pub percentage: i32,
    pub current_lesson: Option<Uuid>,
    pub completed_lessons: usize,
    /// Minutes.
    pub time_spent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCourse {
    pub course: EnrolledCourseSummary,
    pub progress: DashboardProgress,
    pub last_accessed_at: DateTime<Utc>,
    pub enrolled_at: DateTime<Utc>,
    pub estimated_time_to_complete: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAchievement {
    pub badge: BadgeDefinition,
    pub earned_at: DateTime<Utc>,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStreak {
    pub current: i32,
    pub is_active_today: bool,
    pub next_milestone: i32,
}

pub fn learning_streak(streak: &Streak, now: DateTime<Utc>) -> LearningStreak {
    LearningStreak {
        current: streak.current,
        is_active_today: streak.is_active_on(now.date_naive()),
        next_milestone: gamification::next_streak_milestone(streak.current),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub points: i64,
    pub level: i32,
    pub badges: i64,
    pub streak: Streak,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub xp_progress: XpProgress,
    pub enrolled_courses: usize,
    pub completed_courses: usize,
    pub active_courses: usize,
    pub total_badges: i64,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub weekly_stats: WeeklyStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub user: DashboardUser,
    pub stats: DashboardStats,
    pub enrolled_courses: Vec<DashboardCourse>,
    pub recent_achievements: Vec<RecentAchievement>,
    pub learning_streak: LearningStreak,
}

pub fn build_dashboard(
    user: &User,
    enrollments: &[EnrollmentWithCourse],
    recent_badges: Vec<EarnedBadge>,
    total_badges: i64,
    now: DateTime<Utc>,
) -> Dashboard {
    let Gamification { points, level, streak } = user.gamification;

    let mut active: Vec<&EnrollmentWithCourse> = enrollments
        .iter()
        .filter(|item| item.enrollment.status == EnrollmentStatus::Active)
        .collect();
    active.sort_by(|a, b| {
        b.enrollment
            .progress
            .last_accessed_at
            .cmp(&a.enrollment.progress.last_accessed_at)
    });
    let active_count = active.len();

    let completed_courses = enrollments
        .iter()
        .filter(|item| item.enrollment.status == EnrollmentStatus::Completed)
        .count();

    let enrolled_courses = active
        .into_iter()
        .take(DASHBOARD_COURSES)
        .map(|item| {
            let progress = &item.enrollment.progress;
            DashboardCourse {
                course: item.course.clone(),
                progress: DashboardProgress {
                    percentage: progress.percentage,
                    current_lesson: progress.current_lesson,
                    completed_lessons: progress.completed_lessons.len(),
                    time_spent: (progress.time_spent as f64 / 60.0).round() as i64,
                },
                last_accessed_at: progress.last_accessed_at,
                enrolled_at: item.enrollment.enrolled_at,
                estimated_time_to_complete: estimated_time_to_complete(
                    item.course.total_duration,
                    progress.percentage,
                ),
            }
        })
        .collect();

    let new_since = now - Duration::days(NEW_BADGE_DAYS);
    let recent_achievements = recent_badges
        .into_iter()
        .map(|earned| RecentAchievement {
            is_new: earned.earned_at > new_since,
            earned_at: earned.earned_at,
            badge: earned.badge,
        })
        .collect();

    Dashboard {
        user: DashboardUser {
            id: user.id,
            first_name: user.profile.first_name.clone(),
            last_name: user.profile.last_name.clone(),
            avatar: user.profile.avatar.clone(),
            points,
            level,
            badges: total_badges,
            streak,
        },
        stats: DashboardStats {
            xp_progress: xp_progress(points, level),
            enrolled_courses: active_count,
            completed_courses,
            active_courses: active_count,
            total_badges,
            current_streak: streak.current,
            longest_streak: streak.longest,
            weekly_stats: weekly_stats(enrollments, now),
        },
        enrolled_courses,
        recent_achievements,
        learning_streak: learning_streak(&streak, now),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    pub total_courses: usize,
    pub completed_courses: usize,
    pub in_progress_courses: usize,
    /// Seconds.
    pub total_learning_time: i64,
    pub average_progress: i64,
    pub total_quizzes_passed: usize,
    pub certificates_earned: usize,
}

pub fn progress_stats(enrollments: &[EnrollmentWithCourse]) -> ProgressStats {
    let all: Vec<_> = enrollments.iter().map(|item| &item.enrollment).collect();
    if all.is_empty() {
        return ProgressStats::default();
    }

    let percentage_sum: i64 = all.iter().map(|e| i64::from(e.progress.percentage)).sum();

    ProgressStats {
        total_courses: all.len(),
        completed_courses: all
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Completed)
            .count(),
        in_progress_courses: all
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Active)
            .count(),
        total_learning_time: all.iter().map(|e| e.progress.time_spent).sum(),
        average_progress: (percentage_sum as f64 / all.len() as f64).round() as i64,
        total_quizzes_passed: all
            .iter()
            .map(|e| gamification::passed_quiz_lessons(&e.quiz_attempts).len())
            .sum(),
        certificates_earned: all.iter().filter(|e| e.certificate.issued).count(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateEntry {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub course: EnrolledCourseSummary,
    pub completed_at: Option<DateTime<Utc>>,
}

pub fn certificates(enrollments: &[EnrollmentWithCourse]) -> Vec<CertificateEntry> {
    enrollments
        .iter()
        .filter(|item| item.enrollment.certificate.issued)
        .map(|item| CertificateEntry {
            certificate: item.enrollment.certificate.clone(),
            course: item.course.clone(),
            completed_at: item.enrollment.completed_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::courses::{CourseLevel, PricingType};
    use crate::db::operations::enrollments::QuizAttempt;
    use crate::services::progress::fixtures;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 20, 10, 0, 0).unwrap()
    }

    fn item(status: EnrollmentStatus, accessed_days_ago: i64) -> EnrollmentWithCourse {
        let mut enrollment = fixtures::enrollment(now());
        enrollment.status = status;
        enrollment.progress.last_accessed_at = now() - Duration::days(accessed_days_ago);
        EnrollmentWithCourse {
            course: EnrolledCourseSummary {
                id: enrollment.course_id,
                title: "Course".to_string(),
                slug: "course".to_string(),
                thumbnail: None,
                short_description: String::new(),
                level: CourseLevel::Beginner,
                category_id: None,
                subcategory_id: None,
                tags: Vec::new(),
                pricing_type: PricingType::Free,
                total_lessons: 10,
                total_duration: 120,
                instructor: None,
            },
            enrollment,
        }
    }

    fn attempt(score: f64, max_score: f64) -> QuizAttempt {
        QuizAttempt {
            lesson_id: Uuid::new_v4(),
            score,
            max_score,
            attempted_at: now(),
        }
    }

    #[test]
    fn xp_progress_targets_next_level() {
        let xp = xp_progress(1500, 2);
        assert_eq!(xp.next_level, 2000);
        assert_eq!(xp.percentage, 75);
    }

    #[test]
    fn estimated_time_uses_remaining_share() {
        assert_eq!(estimated_time_to_complete(120, 25), 90);
        assert_eq!(estimated_time_to_complete(120, 100), 0);
        assert_eq!(estimated_time_to_complete(0, 10), 0);
    }

    #[test]
    fn weekly_stats_only_count_recent_enrollments() {
        let mut recent = item(EnrollmentStatus::Active, 2);
        recent.enrollment.progress.time_spent = 1800;
        recent.enrollment.progress.completed_lessons = vec![Uuid::new_v4(), Uuid::new_v4()];
        recent.enrollment.quiz_attempts = vec![attempt(8.0, 10.0), attempt(5.0, 10.0)];

        let mut stale = item(EnrollmentStatus::Active, 30);
        stale.enrollment.progress.time_spent = 9_000;
        stale.enrollment.quiz_attempts = vec![attempt(1.0, 10.0)];

        let stats = weekly_stats(&[recent, stale], now());
        assert_eq!(stats.time_spent, 30);
        assert_eq!(stats.lessons_completed, 2);
        assert_eq!(stats.quizzes_attempted, 2);
        assert_eq!(stats.avg_quiz_score, 65);
    }

    #[test]
    fn progress_stats_average_and_passes() {
        let mut a = item(EnrollmentStatus::Completed, 1);
        a.enrollment.progress.percentage = 100;
        a.enrollment.certificate.issued = true;
        a.enrollment.quiz_attempts = vec![attempt(7.0, 10.0), attempt(6.9, 10.0)];
        let mut b = item(EnrollmentStatus::Active, 1);
        b.enrollment.progress.percentage = 25;

        let stats = progress_stats(&[a, b]);
        assert_eq!(stats.total_courses, 2);
        assert_eq!(stats.completed_courses, 1);
        assert_eq!(stats.in_progress_courses, 1);
        assert_eq!(stats.average_progress, 63);
        assert_eq!(stats.total_quizzes_passed, 1);
        assert_eq!(stats.certificates_earned, 1);
        assert_eq!(progress_stats(&[]), ProgressStats::default());
    }

    #[test]
    fn certificates_only_include_issued() {
        let mut done = item(EnrollmentStatus::Completed, 1);
        done.enrollment.certificate.issued = true;
        done.enrollment.completed_at = Some(now());
        let entries = certificates(&[done, item(EnrollmentStatus::Active, 1)]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].completed_at, Some(now()));
    }

    #[test]
    fn streak_summary_reports_today() {
        let streak = Streak {
            current: 8,
            longest: 8,
            last_activity_date: Some(now().date_naive()),
        };
        let summary = learning_streak(&streak, now());
        assert!(summary.is_active_today);
        assert_eq!(summary.next_milestone, 14);
    }
}
