use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::ApiError;
use crate::errors::AttemptError;
use crate::extractors::AppJson;
use crate::models::{
    CompleteLessonBody, CompleteLessonRequest, LessonAttemptScope, LessonAttemptsParams,
    LessonAttemptsQuery, LessonAttemptsResponse, PermissionForUser, PermissionResponse,
    SubmitAnswerBody, SubmitAnswerRequest, SubmitAnswerResponse, TryLessonBody,
    TryLessonResponse, UserParams,
};
use crate::services::AppState;

/// Runs an attempt operation under the configured request deadline.
async fn with_deadline<T, F>(state: &AppState, operation: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, AttemptError>>,
{
    let deadline = Duration::from_millis(state.config.request_timeout_ms);
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            tracing::warn!(
                "Attempt operation exceeded {}ms deadline",
                state.config.request_timeout_ms
            );
            Err(AttemptError::Timeout.into())
        }
    }
}

/// POST /api/v1/lessons/{lesson_id}/attempts
pub async fn try_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<i64>,
    AppJson(body): AppJson<TryLessonBody>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Trying lesson {} for user_id={}", lesson_id, body.user_id);

    let scope = LessonAttemptScope {
        user_id: body.user_id,
        lesson_id,
        plan_id: body.plan_id,
        channel_id: body.channel_id,
    };
    let service = state.attempt_service();
    let pages = with_deadline(&state, service.try_lesson(&scope)).await?;

    Ok((
        StatusCode::OK,
        Json(TryLessonResponse {
            question_page_attempts: pages,
        }),
    ))
}

/// GET /api/v1/lessons/{lesson_id}/attempts
pub async fn list_lesson_attempts(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<i64>,
    Query(params): Query<LessonAttemptsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = LessonAttemptsQuery {
        user_id: params.user_id,
        lesson_id,
        limit: params.limit,
        offset: params.offset,
    };
    let service = state.attempt_service();
    let attempts = with_deadline(&state, service.list_lesson_attempts(&query)).await?;

    Ok(Json(LessonAttemptsResponse {
        lesson_attempts: attempts,
    }))
}

/// PUT /api/v1/attempts/{lesson_attempt_id}/pages/{page_attempt_id}
pub async fn update_page_attempt(
    State(state): State<Arc<AppState>>,
    Path((lesson_attempt_id, page_attempt_id)): Path<(i64, i64)>,
    AppJson(body): AppJson<SubmitAnswerBody>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Submitting answer for lesson attempt {} page attempt {}",
        lesson_attempt_id,
        page_attempt_id
    );

    let service = state.attempt_service();
    let owner = PermissionForUser {
        user_id: body.user_id,
        lesson_attempt_id,
    };
    let req = SubmitAnswerRequest {
        lesson_attempt_id,
        page_id: body.page_id,
        page_attempt_id,
        user_answer: body.user_answer,
    };

    with_deadline(&state, async {
        service.ensure_owner(&owner).await?;
        service.submit_answer(&req).await
    })
    .await?;

    Ok(Json(SubmitAnswerResponse { success: true }))
}

/// POST /api/v1/attempts/{lesson_attempt_id}/complete
pub async fn complete_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_attempt_id): Path<i64>,
    AppJson(body): AppJson<CompleteLessonBody>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Completing lesson attempt {} for user_id={}",
        lesson_attempt_id,
        body.user_id
    );

    let service = state.attempt_service();
    let owner = PermissionForUser {
        user_id: body.user_id.clone(),
        lesson_attempt_id,
    };
    let req = CompleteLessonRequest {
        user_id: body.user_id,
        lesson_attempt_id,
    };

    let result = with_deadline(&state, async {
        service.ensure_owner(&owner).await?;
        service.complete_lesson(&req).await
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/v1/attempts/{lesson_attempt_id}/permission
pub async fn check_permission(
    State(state): State<Arc<AppState>>,
    Path(lesson_attempt_id): Path<i64>,
    Query(params): Query<UserParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PermissionForUser {
        user_id: params.user_id,
        lesson_attempt_id,
    };
    let service = state.attempt_service();
    let allowed = with_deadline(&state, service.check_permission(&req)).await?;

    Ok(Json(PermissionResponse { allowed }))
}
