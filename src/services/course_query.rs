use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::courses::CourseLevel;

pub const DEFAULT_PAGE_SIZE: i64 = 12;
pub const MAX_PAGE_SIZE: i64 = 50;
const MAX_SEARCH_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseSort {
    Newest,
    Popular,
    Rating,
    PriceLow,
    PriceHigh,
}

impl CourseSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "newest" => Some(Self::Newest),
            "popular" => Some(Self::Popular),
            "rating" => Some(Self::Rating),
            "price-low" => Some(Self::PriceLow),
            "price-high" => Some(Self::PriceHigh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingFilter {
    Free,
    Paid,
}

/// Raw catalog query string, everything optional and untyped.
#[derive(Debug, Default, Deserialize)]
pub struct CourseQueryParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub pricing: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCourseQuery {
    pub page: i64,
    pub limit: i64,
    pub category: Option<Uuid>,
    pub level: Option<CourseLevel>,
    pub pricing: Option<PricingFilter>,
    pub search: Option<String>,
    pub sort: CourseSort,
}

impl ValidatedCourseQuery {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CourseQueryError {
    #[error("page must be a positive integer")]
    InvalidPage,
    #[error("limit must be between 1 and {MAX_PAGE_SIZE}")]
    InvalidLimit,
    #[error("level must be one of beginner, intermediate, advanced")]
    InvalidLevel,
    #[error("pricing must be free or paid")]
    InvalidPricing,
    #[error("sort must be one of newest, popular, rating, price-low, price-high")]
    InvalidSort,
    #[error("search is limited to {MAX_SEARCH_CHARS} characters")]
    SearchTooLong,
}

pub fn validate_course_query(params: &CourseQueryParams) -> Result<ValidatedCourseQuery, CourseQueryError> {
    let page = match non_empty(&params.page) {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or(CourseQueryError::InvalidPage)?,
        None => 1,
    };

    let limit = match non_empty(&params.limit) {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|limit| (1..=MAX_PAGE_SIZE).contains(limit))
            .ok_or(CourseQueryError::InvalidLimit)?,
        None => DEFAULT_PAGE_SIZE,
    };

    // Unknown category ids simply do not filter.
    let category = non_empty(&params.category).and_then(|raw| Uuid::parse_str(raw).ok());

    let level = non_empty(&params.level)
        .map(|raw| CourseLevel::parse(raw).ok_or(CourseQueryError::InvalidLevel))
        .transpose()?;

    let pricing = non_empty(&params.pricing)
        .map(|raw| match raw {
            "free" => Ok(PricingFilter::Free),
            "paid" | "subscription" => Ok(PricingFilter::Paid),
            _ => Err(CourseQueryError::InvalidPricing),
        })
        .transpose()?;

    let search = match non_empty(&params.search) {
        Some(raw) if raw.chars().count() > MAX_SEARCH_CHARS => {
            return Err(CourseQueryError::SearchTooLong)
        }
        Some(raw) => Some(raw.to_string()),
        None => None,
    };

    let sort = non_empty(&params.sort)
        .map(|raw| CourseSort::parse(raw).ok_or(CourseQueryError::InvalidSort))
        .transpose()?
        .unwrap_or(CourseSort::Newest);

    Ok(ValidatedCourseQuery {
        page,
        limit,
        category,
        level,
        pricing,
        search,
        sort,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total,
            pages,
            has_more: page * limit < total,
        }
    }
}

/// Lowercases and collapses every run of non-alphanumerics into one dash.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CourseQueryParams {
        CourseQueryParams::default()
    }

    #[test]
    fn defaults_apply_when_params_missing() {
        let query = validate_course_query(&params()).unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(query.sort, CourseSort::Newest);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn rejects_out_of_range_limit() {
        let mut raw = params();
        raw.limit = Some("500".to_string());
        assert_eq!(validate_course_query(&raw), Err(CourseQueryError::InvalidLimit));

        raw.limit = Some("0".to_string());
        assert_eq!(validate_course_query(&raw), Err(CourseQueryError::InvalidLimit));
    }

    #[test]
    fn rejects_non_positive_page() {
        let mut raw = params();
        raw.page = Some("0".to_string());
        assert_eq!(validate_course_query(&raw), Err(CourseQueryError::InvalidPage));
    }

    #[test]
    fn invalid_category_is_ignored() {
        let mut raw = params();
        raw.category = Some("not-a-uuid".to_string());
        let query = validate_course_query(&raw).unwrap();
        assert!(query.category.is_none());
    }

    #[test]
    fn subscription_pricing_maps_to_paid() {
        let mut raw = params();
        raw.pricing = Some("subscription".to_string());
        raw.sort = Some("price-high".to_string());
        raw.page = Some("3".to_string());
        raw.limit = Some("10".to_string());
        let query = validate_course_query(&raw).unwrap();
        assert_eq!(query.pricing, Some(PricingFilter::Paid));
        assert_eq!(query.sort, CourseSort::PriceHigh);
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn pagination_math() {
        let pagination = Pagination::new(2, 12, 30);
        assert_eq!(pagination.pages, 3);
        assert!(pagination.has_more);

        let last = Pagination::new(3, 12, 30);
        assert!(!last.has_more);

        let empty = Pagination::new(1, 12, 0);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_more);
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Intro to Rust: Ownership & Borrowing!"), "intro-to-rust-ownership-borrowing");
        assert_eq!(slugify("  --Hello--World--  "), "hello-world");
        assert_eq!(slugify("!!!"), "");
    }
}
