use serde::{Deserialize, Serialize};
use validator::Validate;

use super::attempt::{LessonAttempt, QuestionPageAttempt};

pub const DEFAULT_ATTEMPTS_LIMIT: i64 = 10;
pub const MAX_ATTEMPTS_LIMIT: i64 = 100;

/// Identifies the lesson instance a learner attempts.
/// At most one open attempt exists per scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct LessonAttemptScope {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(range(min = 1, message = "lesson_id is required"))]
    pub lesson_id: i64,
    #[validate(range(min = 1, message = "plan_id is required"))]
    pub plan_id: i64,
    #[validate(range(min = 1, message = "channel_id is required"))]
    pub channel_id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(range(min = 1, message = "lesson_attempt_id is required"))]
    pub lesson_attempt_id: i64,
    #[validate(range(min = 1, message = "page_id is required"))]
    pub page_id: i64,
    #[validate(range(min = 1, message = "question_page_attempt_id is required"))]
    pub page_attempt_id: i64,
    #[validate(length(min = 1, message = "user_answer is required"))]
    pub user_answer: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CompleteLessonRequest {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(range(min = 1, message = "lesson_attempt_id is required"))]
    pub lesson_attempt_id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LessonAttemptsQuery {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(range(min = 1, message = "lesson_id is required"))]
    pub lesson_id: i64,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    #[validate(range(min = 0, message = "offset must not be negative"))]
    pub offset: Option<i64>,
}

impl LessonAttemptsQuery {
    pub fn limit_or_default(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_ATTEMPTS_LIMIT)
            .min(MAX_ATTEMPTS_LIMIT)
    }

    pub fn offset_or_default(&self) -> u64 {
        self.offset.unwrap_or(0).max(0) as u64
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PermissionForUser {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[validate(range(min = 1, message = "lesson_attempt_id is required"))]
    pub lesson_attempt_id: i64,
}

// HTTP bodies and query strings. Identifiers taken from the path are merged in by the handlers.
// Fields default so that missing values reach validation instead of failing deserialization.

#[derive(Debug, Deserialize)]
pub struct TryLessonBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub plan_id: i64,
    #[serde(default)]
    pub channel_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub page_id: i64,
    #[serde(default)]
    pub user_answer: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteLessonBody {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LessonAttemptsParams {
    #[serde(default)]
    pub user_id: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UserParams {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TryLessonResponse {
    pub question_page_attempts: Vec<QuestionPageAttempt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteLessonResponse {
    pub id: i64,
    pub is_successful: bool,
    pub percentage_score: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LessonAttemptsResponse {
    pub lesson_attempts: Vec<LessonAttempt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub allowed: bool,
}
