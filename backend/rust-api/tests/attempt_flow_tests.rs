use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use lesson_attempts_api::{
    config::Config,
    models::QuestionPage,
    services::{
        answer_cache::AnswerCache, attempt_store::AttemptStore, question_catalog::QuestionCatalog,
    },
    StoreError,
};

mod common;
use common::{
    complete_lesson, create_test_app, create_test_app_with, default_catalog, page_attempts,
    send_json, submit_answer, try_lesson, EMPTY_LESSON_ID, LESSON_ID, QUESTION_PAGES,
    RIGHT_ANSWER,
};

#[tokio::test]
async fn test_try_lesson_creates_page_attempts() {
    let app = create_test_app();

    let (status, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;

    assert_eq!(status, StatusCode::OK);
    let pages = page_attempts(&body);
    let page_ids: Vec<i64> = pages.iter().map(|p| p["page_id"].as_i64().unwrap()).collect();
    assert_eq!(page_ids, QUESTION_PAGES.to_vec());
    for page in &pages {
        assert_eq!(page["user_answer"], "");
        assert_eq!(page["is_correct"], false);
    }
}

#[tokio::test]
async fn test_try_lesson_twice_returns_same_attempt() {
    let app = create_test_app();

    let (_, first) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let (status, second) = try_lesson(&app.router, "learner-1", LESSON_ID).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(app.store.lesson_attempt_count().await, 1);
}

#[tokio::test]
async fn test_resume_shows_submitted_answers() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let pages = page_attempts(&body);

    let (status, answered) = submit_answer(&app.router, "learner-1", &pages[2], "OPTION_C").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answered, json!({ "success": true }));

    let (_, resumed) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let resumed = page_attempts(&resumed);
    assert_eq!(resumed[2]["user_answer"], "OPTION_C");
    assert_eq!(resumed[2]["is_correct"], false);
}

#[tokio::test]
async fn test_resume_after_cache_loss_restores_pages() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let lesson_attempt_id = page_attempts(&body)[0]["lesson_attempt_id"].as_i64().unwrap();

    app.cache.clear(lesson_attempt_id).await.unwrap();

    let (status, resumed) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed, body);
    assert_eq!(app.cache.read_all(lesson_attempt_id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_complete_three_of_four_passes() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let pages = page_attempts(&body);
    let lesson_attempt_id = pages[0]["lesson_attempt_id"].as_i64().unwrap();

    for page in &pages[..3] {
        submit_answer(&app.router, "learner-1", page, RIGHT_ANSWER).await;
    }
    submit_answer(&app.router, "learner-1", &pages[3], "OPTION_E").await;

    let (status, result) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        result,
        json!({
            "id": lesson_attempt_id,
            "is_successful": true,
            "percentage_score": 75,
        })
    );
}

#[tokio::test]
async fn test_complete_two_of_four_fails() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let pages = page_attempts(&body);
    let lesson_attempt_id = pages[0]["lesson_attempt_id"].as_i64().unwrap();

    submit_answer(&app.router, "learner-1", &pages[0], RIGHT_ANSWER).await;
    submit_answer(&app.router, "learner-1", &pages[1], RIGHT_ANSWER).await;

    let (status, result) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["percentage_score"], 50);
    assert_eq!(result["is_successful"], false);
}

#[tokio::test]
async fn test_lesson_without_questions_scores_100() {
    let app = create_test_app();

    let (status, body) = try_lesson(&app.router, "learner-1", EMPTY_LESSON_ID).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page_attempts(&body).is_empty());

    let (_, listed) = send_json(
        &app.router,
        "GET",
        &format!("/api/v1/lessons/{}/attempts?user_id=learner-1", EMPTY_LESSON_ID),
        None,
    )
    .await;
    let lesson_attempt_id = listed["lesson_attempts"][0]["id"].as_i64().unwrap();

    let (status, result) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["percentage_score"], 100);
    assert_eq!(result["is_successful"], true);
}

#[tokio::test]
async fn test_resuming_lesson_without_questions_is_not_found() {
    let app = create_test_app();

    try_lesson(&app.router, "learner-1", EMPTY_LESSON_ID).await;
    let (status, body) = try_lesson(&app.router, "learner-1", EMPTY_LESSON_ID).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_complete_twice_is_not_found() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let lesson_attempt_id = page_attempts(&body)[0]["lesson_attempt_id"].as_i64().unwrap();

    let (first, _) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;
    let (second, _) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_answer_after_completion_is_rejected() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let pages = page_attempts(&body);
    let lesson_attempt_id = pages[0]["lesson_attempt_id"].as_i64().unwrap();

    submit_answer(&app.router, "learner-1", &pages[0], RIGHT_ANSWER).await;
    let (completed, _) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;
    assert_eq!(completed, StatusCode::OK);
    let before = app.store.list_page_attempts(lesson_attempt_id).await.unwrap();

    let (late, error) = submit_answer(&app.router, "learner-1", &pages[1], RIGHT_ANSWER).await;
    assert_eq!(late, StatusCode::NOT_FOUND);
    assert_eq!(error["status"], 404);

    let (again, _) = complete_lesson(&app.router, "learner-1", lesson_attempt_id).await;
    assert_eq!(again, StatusCode::NOT_FOUND);
    assert_eq!(
        app.store.list_page_attempts(lesson_attempt_id).await.unwrap(),
        before
    );
}

#[tokio::test]
async fn test_answer_for_unknown_page_attempt_is_not_found() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let mut stray = page_attempts(&body)[0].clone();
    stray["id"] = json!(9999);

    let (status, error) = submit_answer(&app.router, "learner-1", &stray, RIGHT_ANSWER).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["status"], 404);
}

#[tokio::test]
async fn test_answer_with_wrong_page_is_bad_request() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let mut mislabeled = page_attempts(&body)[0].clone();
    mislabeled["page_id"] = json!(QUESTION_PAGES[1]);

    let (status, error) =
        submit_answer(&app.router, "learner-1", &mislabeled, RIGHT_ANSWER).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["status"], 400);
}

#[tokio::test]
async fn test_concurrent_try_lesson_conflicts() {
    let app = create_test_app();
    app.store.set_yield_on_lookup(true);

    let ((first, _), (second, _)) = tokio::join!(
        try_lesson(&app.router, "learner-1", LESSON_ID),
        try_lesson(&app.router, "learner-1", LESSON_ID)
    );

    let mut statuses = vec![first.as_u16(), second.as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 409]);
    assert_eq!(app.store.lesson_attempt_count().await, 1);
}

#[tokio::test]
async fn test_try_lesson_after_completion_starts_new_attempt() {
    let app = create_test_app();
    let (_, first) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let first_id = page_attempts(&first)[0]["lesson_attempt_id"].as_i64().unwrap();
    complete_lesson(&app.router, "learner-1", first_id).await;

    let (status, second) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let second_id = page_attempts(&second)[0]["lesson_attempt_id"].as_i64().unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn test_answer_by_non_owner_is_forbidden() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let pages = page_attempts(&body);

    let (status, error) = submit_answer(&app.router, "intruder", &pages[0], RIGHT_ANSWER).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["status"], 403);
    let cached = app
        .cache
        .read_all(pages[0]["lesson_attempt_id"].as_i64().unwrap())
        .await
        .unwrap();
    assert!(cached.iter().all(|page| page.user_answer.is_empty()));
}

#[tokio::test]
async fn test_complete_by_non_owner_is_forbidden() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let lesson_attempt_id = page_attempts(&body)[0]["lesson_attempt_id"].as_i64().unwrap();

    let (status, _) = complete_lesson(&app.router, "intruder", lesson_attempt_id).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    let stored = app.store.lesson_attempt(lesson_attempt_id).await.unwrap();
    assert!(!stored.is_complete);
}

#[tokio::test]
async fn test_answer_for_page_without_answer_is_not_found() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", 7).await;
    let pages = page_attempts(&body);

    let (status, error) = submit_answer(&app.router, "learner-1", &pages[0], RIGHT_ANSWER).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["status"], 404);
}

#[tokio::test]
async fn test_empty_answer_is_rejected() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let pages = page_attempts(&body);

    let (status, error) = submit_answer(&app.router, "learner-1", &pages[0], "").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["status"], 400);
}

#[tokio::test]
async fn test_try_lesson_missing_fields_is_bad_request() {
    let app = create_test_app();

    let (status, _) = send_json(
        &app.router,
        "POST",
        &format!("/api/v1/lessons/{}/attempts", LESSON_ID),
        Some(json!({ "user_id": "learner-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.lesson_attempt_count().await, 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = create_test_app();

    let response = send_json(
        &app.router,
        "POST",
        &format!("/api/v1/lessons/{}/attempts", LESSON_ID),
        Some(json!("not an object")),
    )
    .await;

    assert_eq!(response.0, StatusCode::BAD_REQUEST);
    assert_eq!(response.1["status"], 400);
}

#[tokio::test]
async fn test_cache_outage_is_service_unavailable() {
    let app = create_test_app();
    app.cache.set_fail_writes(true);

    let (status, error) = try_lesson(&app.router, "learner-1", LESSON_ID).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["status"], 503);
}

#[tokio::test]
async fn test_page_insert_failure_is_internal_error() {
    let app = create_test_app();
    app.store.set_fail_page_inserts(true);

    let (status, _) = try_lesson(&app.router, "learner-1", LESSON_ID).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_list_lesson_attempts_paginates() {
    let app = create_test_app();
    for _ in 0..3 {
        let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
        let id = page_attempts(&body)[0]["lesson_attempt_id"].as_i64().unwrap();
        complete_lesson(&app.router, "learner-1", id).await;
    }
    try_lesson(&app.router, "learner-2", LESSON_ID).await;

    let (status, all) = send_json(
        &app.router,
        "GET",
        &format!("/api/v1/lessons/{}/attempts?user_id=learner-1", LESSON_ID),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let attempts = all["lesson_attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a["user_id"] == "learner-1"));
    assert!(attempts.iter().all(|a| a["is_complete"] == true));

    let (_, page) = send_json(
        &app.router,
        "GET",
        &format!(
            "/api/v1/lessons/{}/attempts?user_id=learner-1&limit=1&offset=1",
            LESSON_ID
        ),
        None,
    )
    .await;
    let page = page["lesson_attempts"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["id"], attempts[1]["id"]);
}

#[tokio::test]
async fn test_list_lesson_attempts_rejects_zero_limit() {
    let app = create_test_app();

    let (status, _) = send_json(
        &app.router,
        "GET",
        &format!("/api/v1/lessons/{}/attempts?user_id=learner-1&limit=0", LESSON_ID),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_check_permission() {
    let app = create_test_app();
    let (_, body) = try_lesson(&app.router, "learner-1", LESSON_ID).await;
    let lesson_attempt_id = page_attempts(&body)[0]["lesson_attempt_id"].as_i64().unwrap();

    let uri = |user: &str, id: i64| format!("/api/v1/attempts/{}/permission?user_id={}", id, user);

    let (status, owner) = send_json(&app.router, "GET", &uri("learner-1", lesson_attempt_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(owner, json!({ "allowed": true }));

    let (_, stranger) = send_json(&app.router, "GET", &uri("learner-2", lesson_attempt_id), None).await;
    assert_eq!(stranger, json!({ "allowed": false }));

    let (_, missing) = send_json(&app.router, "GET", &uri("learner-1", 9999), None).await;
    assert_eq!(missing, json!({ "allowed": false }));
}

struct SlowCatalog;

#[async_trait]
impl QuestionCatalog for SlowCatalog {
    async fn list_question_pages(&self, lesson_id: i64) -> Result<Vec<QuestionPage>, StoreError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        default_catalog().list_question_pages(lesson_id).await
    }

    async fn canonical_answer(&self, page_id: i64) -> Result<Option<String>, StoreError> {
        default_catalog().canonical_answer(page_id).await
    }
}

#[tokio::test]
async fn test_slow_backend_hits_deadline() {
    let config = Config {
        request_timeout_ms: 50,
        ..Config::default()
    };
    let app = create_test_app_with(config, Arc::new(SlowCatalog));

    let (status, error) = try_lesson(&app.router, "learner-1", LESSON_ID).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error["status"], 504);
}
