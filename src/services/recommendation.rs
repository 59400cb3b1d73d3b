use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::operations::courses::{CourseLevel, CourseWithRefs, PricingType};
use crate::db::operations::enrollments::{EnrollmentStatus, EnrollmentWithCourse};

pub const DEFAULT_RECOMMENDATIONS: i64 = 8;
pub const MAX_RECOMMENDATIONS: i64 = 20;
/// Candidates fetched per requested recommendation.
pub const CANDIDATE_FACTOR: i64 = 3;

const CATEGORY_POINTS: f64 = 30.0;
const SUBCATEGORY_POINTS: f64 = 15.0;
const TAG_POINTS: f64 = 5.0;
const MAX_TAG_POINTS: f64 = 25.0;
const LEVEL_POINTS: f64 = 15.0;
const MAX_POPULARITY_POINTS: f64 = 10.0;
const RECENT_POINTS: f64 = 5.0;
const FREE_POINTS: f64 = 5.0;
const RECENT_DAYS: i64 = 30;
const MAX_REASONS: usize = 2;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedCourse {
    #[serde(flatten)]
    pub course: CourseWithRefs,
    pub recommendation_score: i64,
    pub match_percentage: i64,
    pub match_reasons: Vec<String>,
}

/// What the learner's enrollments say about their interests.
#[derive(Debug, Clone, Default)]
pub struct LearnerInterests {
    pub categories: HashSet<Uuid>,
    pub subcategories: HashSet<Uuid>,
    pub tags: HashSet<String>,
    pub levels: Vec<CourseLevel>,
}

impl LearnerInterests {
    pub fn from_enrollments(enrollments: &[EnrollmentWithCourse]) -> Self {
        let mut interests = Self::default();
        for item in enrollments {
            interests.categories.extend(item.course.category_id);
            interests.subcategories.extend(item.course.subcategory_id);
            interests
                .tags
                .extend(item.course.tags.iter().map(|tag| tag.to_lowercase()));
        }
        interests.levels = recommended_levels(enrollments);
        interests
    }
}

pub fn recommended_levels(enrollments: &[EnrollmentWithCourse]) -> Vec<CourseLevel> {
    let completed: Vec<CourseLevel> = enrollments
        .iter()
        .filter(|item| item.enrollment.status == EnrollmentStatus::Completed)
        .map(|item| item.course.level)
        .collect();

    match completed.len() {
        0 => vec![CourseLevel::Beginner],
        1 | 2 => vec![CourseLevel::Beginner, CourseLevel::Intermediate],
        _ if completed.iter().any(|level| *level != CourseLevel::Beginner) => {
            vec![CourseLevel::Intermediate, CourseLevel::Advanced]
        }
        _ => vec![CourseLevel::Intermediate],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub value: f64,
    pub reasons: Vec<String>,
}

pub fn score_course(course: &CourseWithRefs, interests: &LearnerInterests, now: DateTime<Utc>) -> Score {
    let course = &course.course;
    let mut value = 0.0;
    let mut reasons = Vec::new();

    if course.category_id.is_some_and(|id| interests.categories.contains(&id)) {
        value += CATEGORY_POINTS;
        reasons.push("Same category as your courses".to_string());
    }

    if course.subcategory_id.is_some_and(|id| interests.subcategories.contains(&id)) {
        value += SUBCATEGORY_POINTS;
        reasons.push("Related subcategory".to_string());
    }

    let matching_tags = course
        .tags
        .iter()
        .filter(|tag| interests.tags.contains(&tag.to_lowercase()))
        .count();
    if matching_tags > 0 {
        value += (matching_tags as f64 * TAG_POINTS).min(MAX_TAG_POINTS);
        reasons.push(format!("{matching_tags} matching topics"));
    }

    if interests.levels.contains(&course.level) {
        value += LEVEL_POINTS;
        reasons.push(format!("{} level", course.level.label()));
    }

    let popularity = (course.stats.enrollments as f64 / 100.0).min(MAX_POPULARITY_POINTS);
    value += popularity;
    if popularity > 5.0 {
        reasons.push("Popular course".to_string());
    }

    let rating = course.stats.average_rating / 5.0 * 5.0;
    value += rating;
    if rating > 3.0 {
        reasons.push("Highly rated".to_string());
    }

    if course
        .published_at
        .is_some_and(|published| now - published < Duration::days(RECENT_DAYS))
    {
        value += RECENT_POINTS;
        reasons.push("Recently added".to_string());
    }

    if course.pricing.pricing_type == PricingType::Free {
        value += FREE_POINTS;
    }

    reasons.truncate(MAX_REASONS);
    Score { value, reasons }
}

/// Scores every candidate and keeps the best `limit`, highest first.
pub fn rank(
    candidates: Vec<CourseWithRefs>,
    interests: &LearnerInterests,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<RecommendedCourse> {
    let mut scored: Vec<(Score, CourseWithRefs)> = candidates
        .into_iter()
        .map(|course| (score_course(&course, interests, now), course))
        .collect();

    scored.sort_by(|(a, _), (b, _)| b.value.total_cmp(&a.value));
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(score, course)| {
            let rounded = score.value.round() as i64;
            RecommendedCourse {
                course,
                recommendation_score: rounded,
                match_percentage: rounded.min(100),
                match_reasons: score.reasons,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::courses::{Course, CourseContent, CourseStats, CourseStatus, Pricing};
    use crate::db::operations::enrollments::EnrolledCourseSummary;
    use crate::services::progress::fixtures;

    fn candidate(level: CourseLevel, category: Option<Uuid>, tags: &[&str]) -> CourseWithRefs {
        let now = Utc::now();
        CourseWithRefs {
            course: Course {
                id: Uuid::new_v4(),
                slug: "course".to_string(),
                title: "Course".to_string(),
                short_description: String::new(),
                description: String::new(),
                thumbnail: None,
                instructor_id: Uuid::new_v4(),
                category_id: category,
                subcategory_id: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                level,
                pricing: Pricing {
                    pricing_type: PricingType::Paid,
                    price: 20.0,
                    currency: "USD".to_string(),
                },
                status: CourseStatus::Published,
                content: CourseContent::default(),
                stats: CourseStats::default(),
                published_at: Some(now - Duration::days(365)),
                created_at: now,
                updated_at: now,
            },
            instructor: None,
            category: None,
        }
    }

    fn enrolled(level: CourseLevel, status: EnrollmentStatus, category: Option<Uuid>, tags: &[&str]) -> EnrollmentWithCourse {
        let mut enrollment = fixtures::enrollment(Utc::now());
        enrollment.status = status;
        EnrollmentWithCourse {
            course: EnrolledCourseSummary {
                id: enrollment.course_id,
                title: "Enrolled".to_string(),
                slug: "enrolled".to_string(),
                thumbnail: None,
                short_description: String::new(),
                level,
                category_id: category,
                subcategory_id: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                pricing_type: PricingType::Free,
                total_lessons: 4,
                total_duration: 60,
                instructor: None,
            },
            enrollment,
        }
    }

    #[test]
    fn newcomers_get_beginner_courses() {
        assert_eq!(recommended_levels(&[]), vec![CourseLevel::Beginner]);
    }

    #[test]
    fn levels_advance_with_completions() {
        let one = vec![enrolled(CourseLevel::Beginner, EnrollmentStatus::Completed, None, &[])];
        assert_eq!(
            recommended_levels(&one),
            vec![CourseLevel::Beginner, CourseLevel::Intermediate]
        );

        let beginners: Vec<_> = (0..3)
            .map(|_| enrolled(CourseLevel::Beginner, EnrollmentStatus::Completed, None, &[]))
            .collect();
        assert_eq!(recommended_levels(&beginners), vec![CourseLevel::Intermediate]);

        let mut mixed = beginners;
        mixed.push(enrolled(CourseLevel::Advanced, EnrollmentStatus::Completed, None, &[]));
        assert_eq!(
            recommended_levels(&mixed),
            vec![CourseLevel::Intermediate, CourseLevel::Advanced]
        );
    }

    #[test]
    fn category_and_tags_drive_the_score() {
        let category = Uuid::new_v4();
        let history = vec![enrolled(
            CourseLevel::Beginner,
            EnrollmentStatus::Active,
            Some(category),
            &["rust", "async"],
        )];
        let interests = LearnerInterests::from_enrollments(&history);

        let course = candidate(CourseLevel::Beginner, Some(category), &["Rust", "Async", "tokio"]);
        let score = score_course(&course, &interests, Utc::now());

        // 30 category + 10 tags + 15 level
        assert!((score.value - 55.0).abs() < f64::EPSILON);
        assert_eq!(
            score.reasons,
            vec!["Same category as your courses".to_string(), "2 matching topics".to_string()]
        );
    }

    #[test]
    fn tag_points_are_capped() {
        let tags = ["a", "b", "c", "d", "e", "f", "g"];
        let history = vec![enrolled(CourseLevel::Advanced, EnrollmentStatus::Active, None, &tags)];
        let interests = LearnerInterests::from_enrollments(&history);
        let course = candidate(CourseLevel::Advanced, None, &tags);

        let score = score_course(&course, &interests, Utc::now());
        assert!((score.value - MAX_TAG_POINTS).abs() < f64::EPSILON);
    }

    #[test]
    fn ranking_orders_by_score_and_caps_percentage() {
        let category = Uuid::new_v4();
        let interests = LearnerInterests {
            categories: [category].into_iter().collect(),
            levels: vec![CourseLevel::Beginner],
            ..LearnerInterests::default()
        };

        let weak = candidate(CourseLevel::Advanced, None, &[]);
        let mut strong = candidate(CourseLevel::Beginner, Some(category), &[]);
        strong.course.stats.enrollments = 5_000;
        strong.course.stats.average_rating = 4.8;
        strong.course.published_at = Some(Utc::now() - Duration::days(2));
        strong.course.pricing.pricing_type = PricingType::Free;
        let strong_id = strong.course.id;

        let ranked = rank(vec![weak, strong], &interests, 1, Utc::now());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].course.course.id, strong_id);
        // 30 + 15 + 10 + 4.8 + 5 + 5
        assert_eq!(ranked[0].recommendation_score, 70);
        assert_eq!(ranked[0].match_percentage, 70);
        assert_eq!(ranked[0].match_reasons.len(), MAX_REASONS);
    }

    #[test]
    fn recommendation_serializes_match_reasons() {
        let category = Uuid::new_v4();
        let interests = LearnerInterests {
            categories: [category].into_iter().collect(),
            ..LearnerInterests::default()
        };
        let ranked = rank(
            vec![candidate(CourseLevel::Beginner, Some(category), &[])],
            &interests,
            1,
            Utc::now(),
        );

        let json = serde_json::to_value(&ranked[0]).unwrap();
        assert_eq!(json["matchReasons"][0], "Same category as your courses");
        assert!(json.get("reasons").is_none());
        assert!(json.get("matchPercentage").is_some());
    }
}
