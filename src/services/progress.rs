use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::courses::{CourseContent, Lesson, LessonType};
use crate::db::operations::enrollments::{Certificate, Enrollment, EnrollmentStatus, QuizAttempt};
use crate::services::gamification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletionOutcome {
    pub lesson_newly_completed: bool,
    pub course_completed: bool,
    pub percentage: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttemptOutcome {
    pub passed: bool,
    /// First passing attempt for this lesson; only this one earns points.
    pub first_pass: bool,
    pub percentage: i32,
}

#[derive(Debug, Error, PartialEq)]
pub enum QuizScoreError {
    #[error("maxScore must be greater than zero")]
    InvalidMaxScore,
    #[error("score must be between 0 and maxScore")]
    ScoreOutOfRange,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizLessonError {
    #[error("Lesson not found")]
    NotFound,
    #[error("Quiz attempts can only be recorded for quiz lessons")]
    NotAQuiz,
}

/// The lesson a quiz attempt targets; it must exist and be a quiz.
pub fn quiz_lesson(content: &CourseContent, lesson_id: Uuid) -> Result<&Lesson, QuizLessonError> {
    let lesson = content
        .find_lesson(lesson_id)
        .ok_or(QuizLessonError::NotFound)?;
    if lesson.lesson_type != LessonType::Quiz {
        return Err(QuizLessonError::NotAQuiz);
    }
    Ok(lesson)
}

/// `round(completed / total * 100)`, clamped to `0..=100`.
pub fn progress_percentage(completed: usize, total_lessons: i32) -> i32 {
    if total_lessons <= 0 {
        return 0;
    }
    let ratio = completed as f64 / f64::from(total_lessons);
    (ratio * 100.0).round().clamp(0.0, 100.0) as i32
}

pub fn certificate_id(enrollment_id: Uuid, issued_at: DateTime<Utc>) -> String {
    let simple = enrollment_id.simple().to_string().to_uppercase();
    format!("CERT-{}-{}", &simple[..8], issued_at.format("%Y%m%d"))
}

pub fn apply_lesson_completion(
    enrollment: &mut Enrollment,
    lesson_id: Uuid,
    total_lessons: i32,
    now: DateTime<Utc>,
) -> LessonCompletionOutcome {
    let progress = &mut enrollment.progress;

    let lesson_newly_completed = !progress.completed_lessons.contains(&lesson_id);
    if lesson_newly_completed {
        progress.completed_lessons.push(lesson_id);
    }

    progress.percentage = progress_percentage(progress.completed_lessons.len(), total_lessons);
    progress.current_lesson = Some(lesson_id);
    progress.last_accessed_at = now;

    let course_completed = progress.percentage == 100 && enrollment.completed_at.is_none();
    if course_completed {
        enrollment.completed_at = Some(now);
        enrollment.status = EnrollmentStatus::Completed;
        enrollment.certificate = Certificate {
            issued: true,
            issued_at: Some(now),
            certificate_id: Some(certificate_id(enrollment.id, now)),
        };
    }

    LessonCompletionOutcome {
        lesson_newly_completed,
        course_completed,
        percentage: enrollment.progress.percentage,
    }
}

pub fn validate_quiz_score(score: f64, max_score: f64) -> Result<(), QuizScoreError> {
    if !max_score.is_finite() || max_score <= 0.0 {
        return Err(QuizScoreError::InvalidMaxScore);
    }
    if !score.is_finite() || score < 0.0 || score > max_score {
        return Err(QuizScoreError::ScoreOutOfRange);
    }
    Ok(())
}

pub fn apply_quiz_attempt(enrollment: &mut Enrollment, attempt: QuizAttempt) -> QuizAttemptOutcome {
    let passed = gamification::is_quiz_passed(attempt.score, attempt.max_score);
    let percentage = score_percentage(attempt.score, attempt.max_score);
    let first_pass = passed
        && !gamification::passed_quiz_lessons(&enrollment.quiz_attempts).contains(&attempt.lesson_id);

    enrollment.progress.last_accessed_at = attempt.attempted_at;
    enrollment.quiz_attempts.push(attempt);

    QuizAttemptOutcome {
        passed,
        first_pass,
        percentage,
    }
}

pub fn score_percentage(score: f64, max_score: f64) -> i32 {
    if max_score <= 0.0 {
        return 0;
    }
    ((score / max_score) * 100.0).round().clamp(0.0, 100.0) as i32
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::db::operations::enrollments::{EnrollmentProgress, Payment};

    pub fn enrollment(now: DateTime<Utc>) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            status: EnrollmentStatus::Active,
            progress: EnrollmentProgress {
                completed_lessons: Vec::new(),
                current_lesson: None,
                percentage: 0,
                time_spent: 0,
                last_accessed_at: now,
            },
            quiz_attempts: Vec::new(),
            certificate: Certificate::default(),
            payment: Payment {
                amount: 0.0,
                method: "free".to_string(),
            },
            enrolled_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()
    }

    #[test]
    fn percentage_rounds_to_nearest() {
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 67);
        assert_eq!(progress_percentage(3, 3), 100);
        assert_eq!(progress_percentage(5, 0), 0);
    }

    #[test]
    fn completing_same_lesson_twice_is_idempotent() {
        let mut enrollment = fixtures::enrollment(now());
        let lesson = Uuid::new_v4();

        let first = apply_lesson_completion(&mut enrollment, lesson, 4, now());
        let second = apply_lesson_completion(&mut enrollment, lesson, 4, now());

        assert!(first.lesson_newly_completed);
        assert!(!second.lesson_newly_completed);
        assert_eq!(enrollment.progress.completed_lessons.len(), 1);
        assert_eq!(second.percentage, 25);
        assert_eq!(enrollment.progress.current_lesson, Some(lesson));
    }

    #[test]
    fn finishing_last_lesson_completes_course_once() {
        let mut enrollment = fixtures::enrollment(now());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(!apply_lesson_completion(&mut enrollment, a, 2, now()).course_completed);
        let done = apply_lesson_completion(&mut enrollment, b, 2, now());
        assert!(done.course_completed);
        assert_eq!(enrollment.status, EnrollmentStatus::Completed);
        assert_eq!(enrollment.completed_at, Some(now()));
        assert!(enrollment.certificate.issued);
        assert!(enrollment
            .certificate
            .certificate_id
            .as_deref()
            .is_some_and(|id| id.starts_with("CERT-") && id.ends_with("20260314")));

        let again = apply_lesson_completion(&mut enrollment, b, 2, now());
        assert!(!again.course_completed);
    }

    #[test]
    fn quiz_pass_threshold_is_seventy_percent() {
        let mut enrollment = fixtures::enrollment(now());
        let lesson_id = Uuid::new_v4();

        let failed = apply_quiz_attempt(
            &mut enrollment,
            QuizAttempt {
                lesson_id,
                score: 6.0,
                max_score: 10.0,
                attempted_at: now(),
            },
        );
        let passed = apply_quiz_attempt(
            &mut enrollment,
            QuizAttempt {
                lesson_id,
                score: 7.0,
                max_score: 10.0,
                attempted_at: now(),
            },
        );

        assert!(!failed.passed);
        assert!(!failed.first_pass);
        assert!(passed.passed);
        assert!(passed.first_pass);
        assert_eq!(passed.percentage, 70);
        assert_eq!(enrollment.quiz_attempts.len(), 2);
    }

    #[test]
    fn only_the_first_pass_of_a_quiz_is_rewarded() {
        let mut enrollment = fixtures::enrollment(now());
        let lesson_id = Uuid::new_v4();
        let pass = || QuizAttempt {
            lesson_id,
            score: 10.0,
            max_score: 10.0,
            attempted_at: now(),
        };

        let outcomes: Vec<_> = (0..5)
            .map(|_| apply_quiz_attempt(&mut enrollment, pass()))
            .collect();

        assert!(outcomes.iter().all(|o| o.passed));
        assert_eq!(outcomes.iter().filter(|o| o.first_pass).count(), 1);
        assert!(outcomes[0].first_pass);
        assert_eq!(enrollment.quiz_attempts.len(), 5);

        let other = apply_quiz_attempt(
            &mut enrollment,
            QuizAttempt {
                lesson_id: Uuid::new_v4(),
                ..pass()
            },
        );
        assert!(other.first_pass);
    }

    #[test]
    fn quiz_attempts_target_quiz_lessons_only() {
        use crate::db::operations::courses::CourseModule;

        let lesson = |lesson_type| Lesson {
            id: Uuid::new_v4(),
            title: "Lesson".to_string(),
            slug: "lesson".to_string(),
            lesson_type,
            duration: 10,
            content: None,
            is_preview: false,
            order: 0,
        };
        let quiz = lesson(LessonType::Quiz);
        let article = lesson(LessonType::Article);
        let (quiz_id, article_id) = (quiz.id, article.id);
        let content = CourseContent {
            modules: vec![CourseModule {
                id: Uuid::new_v4(),
                title: "Module".to_string(),
                description: None,
                order: 0,
                lessons: vec![quiz, article],
            }],
            total_lessons: 2,
            total_duration: 20,
            total_quizzes: 1,
        };

        assert_eq!(quiz_lesson(&content, quiz_id).map(|l| l.id), Ok(quiz_id));
        assert_eq!(
            quiz_lesson(&content, article_id).map(|l| l.id),
            Err(QuizLessonError::NotAQuiz)
        );
        assert_eq!(
            quiz_lesson(&content, Uuid::new_v4()).map(|l| l.id),
            Err(QuizLessonError::NotFound)
        );
    }

    #[test]
    fn quiz_score_validation() {
        assert_eq!(validate_quiz_score(1.0, 0.0), Err(QuizScoreError::InvalidMaxScore));
        assert_eq!(validate_quiz_score(11.0, 10.0), Err(QuizScoreError::ScoreOutOfRange));
        assert_eq!(validate_quiz_score(-1.0, 10.0), Err(QuizScoreError::ScoreOutOfRange));
        assert!(validate_quiz_score(10.0, 10.0).is_ok());
    }

    proptest! {
        #[test]
        fn percentage_always_within_bounds(completed in 0usize..500, total in -5i32..500) {
            let pct = progress_percentage(completed, total);
            prop_assert!((0..=100).contains(&pct));
        }

        #[test]
        fn percentage_is_monotonic_in_completed(completed in 0usize..200, total in 1i32..200) {
            prop_assert!(progress_percentage(completed, total) <= progress_percentage(completed + 1, total));
        }
    }
}
