#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use lesson_attempts_api::{
    config::Config,
    create_router,
    services::{
        in_memory::{InMemoryAnswerCache, InMemoryAttemptStore, InMemoryQuestionCatalog},
        question_catalog::QuestionCatalog,
        AppState,
    },
};

pub const LESSON_ID: i64 = 3;
pub const EMPTY_LESSON_ID: i64 = 5;
pub const QUESTION_PAGES: [i64; 4] = [40, 41, 42, 43];
pub const RIGHT_ANSWER: &str = "OPTION_A";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryAttemptStore>,
    pub cache: Arc<InMemoryAnswerCache>,
}

/// Lesson 3 has four multiple-choice pages answered by OPTION_A; lesson 5 has none.
pub fn default_catalog() -> InMemoryQuestionCatalog {
    QUESTION_PAGES
        .iter()
        .fold(InMemoryQuestionCatalog::new(), |catalog, page_id| {
            catalog.with_question_page(LESSON_ID, *page_id, Some(RIGHT_ANSWER))
        })
        .with_question_page(7, 70, None)
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::default(), Arc::new(default_catalog()))
}

pub fn create_test_app_with(config: Config, catalog: Arc<dyn QuestionCatalog>) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(InMemoryAttemptStore::new());
    let cache = Arc::new(InMemoryAnswerCache::new());
    let app_state = Arc::new(AppState::from_parts(
        config,
        store.clone(),
        cache.clone(),
        catalog,
    ));

    TestApp {
        router: create_router(app_state),
        store,
        cache,
    }
}

pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };

    (status, json)
}

pub async fn try_lesson(app: &Router, user_id: &str, lesson_id: i64) -> (StatusCode, Value) {
    send_json(
        app,
        "POST",
        &format!("/api/v1/lessons/{}/attempts", lesson_id),
        Some(serde_json::json!({
            "user_id": user_id,
            "plan_id": 2,
            "channel_id": 1,
        })),
    )
    .await
}

pub async fn submit_answer(
    app: &Router,
    user_id: &str,
    page_attempt: &Value,
    user_answer: &str,
) -> (StatusCode, Value) {
    send_json(
        app,
        "PUT",
        &format!(
            "/api/v1/attempts/{}/pages/{}",
            page_attempt["lesson_attempt_id"], page_attempt["id"]
        ),
        Some(serde_json::json!({
            "user_id": user_id,
            "page_id": page_attempt["page_id"],
            "user_answer": user_answer,
        })),
    )
    .await
}

pub async fn complete_lesson(
    app: &Router,
    user_id: &str,
    lesson_attempt_id: i64,
) -> (StatusCode, Value) {
    send_json(
        app,
        "POST",
        &format!("/api/v1/attempts/{}/complete", lesson_attempt_id),
        Some(serde_json::json!({ "user_id": user_id })),
    )
    .await
}

pub fn page_attempts(body: &Value) -> Vec<Value> {
    body["question_page_attempts"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}
