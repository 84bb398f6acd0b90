use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonAttempt {
    pub id: i64,
    pub user_id: String,
    pub lesson_id: i64,
    pub plan_id: i64,
    pub channel_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_complete: bool,
    pub is_successful: bool,
    pub percentage_score: i32,
}

/// Snapshot of one question page inside a lesson attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPageAttempt {
    pub id: i64,
    pub page_id: i64,
    pub lesson_attempt_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Question,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Multichoice,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Question => "question",
        }
    }
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Multichoice => "multichoice",
        }
    }
}

/// Question page as listed by the catalog for a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPage {
    pub content_type: ContentType,
    pub question_type: QuestionType,
    pub page_id: i64,
}

/// Value stored in the answer cache for one page attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPageAnswer {
    #[serde(default)]
    pub page_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
}

impl CachedPageAnswer {
    pub fn unanswered(page_id: i64) -> Self {
        Self {
            page_id,
            user_answer: String::new(),
            is_correct: false,
        }
    }

    pub fn into_page_attempt(self, lesson_attempt_id: i64, page_attempt_id: i64) -> QuestionPageAttempt {
        QuestionPageAttempt {
            id: page_attempt_id,
            page_id: self.page_id,
            lesson_attempt_id,
            user_answer: self.user_answer,
            is_correct: self.is_correct,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewLessonAttempt {
    pub user_id: String,
    pub lesson_id: i64,
    pub plan_id: i64,
    pub channel_id: i64,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPageAttempt {
    pub lesson_attempt_id: i64,
    pub page_id: i64,
    pub content_type: ContentType,
    pub question_type: QuestionType,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PageAttemptUpdate {
    pub page_attempt_id: i64,
    pub lesson_attempt_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LessonAttemptCompletion {
    pub lesson_attempt_id: i64,
    pub user_id: String,
    pub end_time: DateTime<Utc>,
    pub is_successful: bool,
    pub percentage_score: i32,
}
