use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::db::operations::courses::Lesson;

pub const DEFAULT_QUESTION_COUNT: u32 = 5;
pub const DEFAULT_MODULE_COUNT: u32 = 5;
const MAX_GENERATED_ITEMS: u32 = 20;
const DEFAULT_WORD_COUNT: u32 = 800;
const MIN_WORD_COUNT: u32 = 100;
const MAX_WORD_COUNT: u32 = 5000;
const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstructorAiError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("count must be between 1 and {MAX_GENERATED_ITEMS}")]
    CountOutOfRange,
    #[error("moduleCount must be between 1 and {MAX_GENERATED_ITEMS}")]
    ModuleCountOutOfRange,
    #[error("wordCount must be between {MIN_WORD_COUNT} and {MAX_WORD_COUNT}")]
    WordCountOutOfRange,
    #[error("AI response could not be parsed: {0}")]
    InvalidResponse(String),
}

/// A system prompt plus the user message sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRequest {
    pub topic: Option<String>,
    pub course_title: Option<String>,
    pub level: Option<String>,
    pub word_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsRequest {
    pub content: Option<String>,
    pub count: Option<u32>,
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineRequest {
    pub topic: Option<String>,
    pub level: Option<String>,
    pub module_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImproveRequest {
    pub content: Option<String>,
    pub instructions: Option<String>,
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, InstructorAiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(InstructorAiError::MissingField(field))
}

fn level_or_default(level: &Option<String>) -> &str {
    level
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("beginner")
}

pub fn article_prompt(request: &ArticleRequest) -> Result<PromptPair, InstructorAiError> {
    let topic = required(&request.topic, "topic")?;
    let word_count = request.word_count.unwrap_or(DEFAULT_WORD_COUNT);
    if !(MIN_WORD_COUNT..=MAX_WORD_COUNT).contains(&word_count) {
        return Err(InstructorAiError::WordCountOutOfRange);
    }
    let level = level_or_default(&request.level);

    let mut user = format!(
        "Write a {level}-level lesson article of about {word_count} words on \"{topic}\"."
    );
    if let Some(course) = request.course_title.as_deref().filter(|c| !c.trim().is_empty()) {
        user.push_str(&format!(" It belongs to the course \"{}\".", course.trim()));
    }

    Ok(PromptPair {
        system: "You are an expert instructional designer. Write engaging, accurate lesson \
                 articles in Markdown with headings, examples and a short summary."
            .to_string(),
        user,
    })
}

pub fn questions_prompt(request: &QuestionsRequest) -> Result<(PromptPair, u32), InstructorAiError> {
    let content = required(&request.content, "content")?;
    let count = request.count.unwrap_or(DEFAULT_QUESTION_COUNT);
    if !(1..=MAX_GENERATED_ITEMS).contains(&count) {
        return Err(InstructorAiError::CountOutOfRange);
    }
    let difficulty = request
        .difficulty
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("medium");

    let prompt = PromptPair {
        system: "You write multiple-choice quiz questions. Reply with JSON only: an array of \
                 objects with keys question, options (exactly 4 strings), correctIndex (0-3) \
                 and explanation."
            .to_string(),
        user: format!(
            "Write {count} {difficulty} multiple-choice questions about the following lesson:\n\n{content}"
        ),
    };
    Ok((prompt, count))
}

pub fn outline_prompt(request: &OutlineRequest) -> Result<PromptPair, InstructorAiError> {
    let topic = required(&request.topic, "topic")?;
    let module_count = request.module_count.unwrap_or(DEFAULT_MODULE_COUNT);
    if !(1..=MAX_GENERATED_ITEMS).contains(&module_count) {
        return Err(InstructorAiError::ModuleCountOutOfRange);
    }
    let level = level_or_default(&request.level);

    Ok(PromptPair {
        system: "You design online course curricula. Reply with JSON only: an object with \
                 title, description and modules; each module has title, description and \
                 lessons; each lesson has title, type (video, article, quiz or exercise) and \
                 duration in minutes."
            .to_string(),
        user: format!("Create a {level}-level course outline on \"{topic}\" with {module_count} modules."),
    })
}

pub fn improve_prompt(request: &ImproveRequest) -> Result<PromptPair, InstructorAiError> {
    let content = required(&request.content, "content")?;
    let instructions = request
        .instructions
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("Improve clarity, structure and engagement while keeping the meaning.");

    Ok(PromptPair {
        system: "You are an editor for educational content. Return only the revised article in Markdown."
            .to_string(),
        user: format!("{instructions}\n\n---\n\n{content}"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: String,
}

/// Strips Markdown code fences and any prose around the JSON payload.
pub fn extract_json(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }

    let start = text.find(|c: char| c == '[' || c == '{');
    let end = text.rfind(|c: char| c == ']' || c == '}');
    match (start, end) {
        (Some(start), Some(end)) if start <= end => &text[start..=end],
        _ => text,
    }
}

pub fn parse_questions(raw: &str, expected: u32) -> Result<Vec<GeneratedQuestion>, InstructorAiError> {
    let value: Value = serde_json::from_str(extract_json(raw))
        .map_err(|err| InstructorAiError::InvalidResponse(err.to_string()))?;

    let list = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("questions")
            .ok_or_else(|| InstructorAiError::InvalidResponse("missing questions".to_string()))?,
        _ => return Err(InstructorAiError::InvalidResponse("expected a JSON array".to_string())),
    };

    let questions: Vec<GeneratedQuestion> = serde_json::from_value(list)
        .map_err(|err| InstructorAiError::InvalidResponse(err.to_string()))?;

    let valid: Vec<GeneratedQuestion> = questions
        .into_iter()
        .filter(|q| {
            !q.question.trim().is_empty()
                && q.options.len() == OPTIONS_PER_QUESTION
                && q.correct_index < OPTIONS_PER_QUESTION
        })
        .take(expected as usize)
        .collect();

    if valid.is_empty() {
        return Err(InstructorAiError::InvalidResponse("no usable questions".to_string()));
    }
    Ok(valid)
}

/// Outline JSON as returned by the provider, normalized to an object with `modules`.
pub fn parse_outline(raw: &str) -> Result<Value, InstructorAiError> {
    let value: Value = serde_json::from_str(extract_json(raw))
        .map_err(|err| InstructorAiError::InvalidResponse(err.to_string()))?;

    match value {
        Value::Object(map) if map.get("modules").is_some_and(Value::is_array) => Ok(Value::Object(map)),
        Value::Array(modules) => Ok(json!({ "modules": modules })),
        _ => Err(InstructorAiError::InvalidResponse("outline has no modules".to_string())),
    }
}

/// Stores `article` under `content.article`, keeping other content keys.
pub fn attach_article(lesson: &mut Lesson, article: String) {
    match lesson.content.as_mut() {
        Some(Value::Object(map)) => {
            map.insert("article".to_string(), Value::String(article));
        }
        _ => lesson.content = Some(json!({ "article": article })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::courses::LessonType;
    use uuid::Uuid;

    const QUESTIONS: &str = r#"[
        {"question": "What is ownership?", "options": ["a","b","c","d"], "correctIndex": 1, "explanation": "b"},
        {"question": "Bad", "options": ["a","b"], "correctIndex": 0, "explanation": ""}
    ]"#;

    #[test]
    fn parses_fenced_question_json() {
        let fenced = format!("Here you go:\n```json\n{QUESTIONS}\n```");
        let questions = parse_questions(&fenced, 5).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_index, 1);
    }

    #[test]
    fn parses_wrapped_questions_and_truncates() {
        let raw = r#"{"questions": [
            {"question": "Q1", "options": ["a","b","c","d"], "correctIndex": 0},
            {"question": "Q2", "options": ["a","b","c","d"], "correctIndex": 3}
        ]}"#;
        let questions = parse_questions(raw, 1).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question, "Q1");
    }

    #[test]
    fn rejects_unparseable_answers() {
        assert!(matches!(
            parse_questions("sorry, I cannot help", 3),
            Err(InstructorAiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn outline_accepts_bare_module_array() {
        let outline = parse_outline("```\n[{\"title\": \"Intro\", \"lessons\": []}]\n```").unwrap();
        assert_eq!(outline["modules"][0]["title"], "Intro");
        assert!(parse_outline("{\"title\": \"x\"}").is_err());
    }

    #[test]
    fn request_validation() {
        assert_eq!(
            questions_prompt(&QuestionsRequest {
                content: Some("text".to_string()),
                count: Some(21),
                difficulty: None,
            })
            .unwrap_err(),
            InstructorAiError::CountOutOfRange
        );
        let (_, count) = questions_prompt(&QuestionsRequest {
            content: Some("text".to_string()),
            ..QuestionsRequest::default()
        })
        .unwrap();
        assert_eq!(count, DEFAULT_QUESTION_COUNT);

        assert_eq!(
            outline_prompt(&OutlineRequest {
                topic: Some("Rust".to_string()),
                module_count: Some(0),
                level: None,
            })
            .unwrap_err(),
            InstructorAiError::ModuleCountOutOfRange
        );
        assert_eq!(
            article_prompt(&ArticleRequest::default()).unwrap_err(),
            InstructorAiError::MissingField("topic")
        );
    }

    #[test]
    fn article_prompt_mentions_course() {
        let prompt = article_prompt(&ArticleRequest {
            topic: Some("Lifetimes".to_string()),
            course_title: Some("Rust Basics".to_string()),
            level: Some("advanced".to_string()),
            word_count: None,
        })
        .unwrap();
        assert!(prompt.user.contains("advanced-level"));
        assert!(prompt.user.contains("Rust Basics"));
    }

    #[test]
    fn article_is_merged_into_existing_content() {
        let mut lesson = Lesson {
            id: Uuid::new_v4(),
            title: "Intro".to_string(),
            slug: "intro".to_string(),
            lesson_type: LessonType::Article,
            duration: 10,
            content: Some(json!({ "videoUrl": "https://example.test/v.mp4" })),
            is_preview: false,
            order: 0,
        };
        attach_article(&mut lesson, "# Hello".to_string());
        let content = lesson.content.unwrap();
        assert_eq!(content["article"], "# Hello");
        assert_eq!(content["videoUrl"], "https://example.test/v.mp4");
    }
}
