use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Duration;
use serde_json::json;
use validator::Validate;

use crate::dto::integration_dto::{
    AttemptListQuery, AttemptListResponse, AttemptView, ExamSettingsPayload, LaunchLinkPayload,
    LaunchLinkResponse,
};
use crate::error::{Error, Result};
use crate::models::exam_attempt::ExamAttempt;
use crate::models::exam_settings::{ExamModule, ExamSettings};
use crate::routes::launch::LAUNCH_PATH;
use crate::services::access_guard::AccessDecision;
use crate::utils::token::issue_launch_token;
use crate::AppState;

async fn load_attempt(state: &AppState, learner_id: i64, attempt_id: &str) -> Result<ExamAttempt> {
    state
        .backends
        .attempts
        .find(learner_id, attempt_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
}

#[utoipa::path(
    get,
    path = "/api/integration/exams/{exam_id}/settings",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Exam settings"),
        (status = 404, description = "Exam has no settings")
    )
)]
#[axum::debug_handler]
pub async fn get_exam_settings(
    State(state): State<AppState>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let settings = state
        .backends
        .settings
        .get(exam_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Exam {} has no settings", exam_id)))?;
    Ok(Json(settings))
}

#[utoipa::path(
    put,
    path = "/api/integration/exams/{exam_id}/settings",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Settings saved"),
        (status = 400, description = "Invalid payload")
    )
)]
#[axum::debug_handler]
pub async fn put_exam_settings(
    State(state): State<AppState>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<ExamSettingsPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    if ExamModule::parse(&payload.exam_module).is_none() {
        return Err(Error::BadRequest(
            "exam_module must look like <module id>:<revision id>".to_string(),
        ));
    }
    if state.config.credentials(&payload.credential_set).is_none() {
        return Err(Error::BadRequest(format!(
            "unknown credential set: {}",
            payload.credential_set
        )));
    }

    let saved = state
        .backends
        .settings
        .upsert(&ExamSettings {
            exam_id,
            credential_set: Some(payload.credential_set),
            exam_module: Some(payload.exam_module.trim().to_string()),
            import_only: payload.import_only,
            validity_hours: payload.validity_hours,
        })
        .await?;
    tracing::info!(exam_id, "exam settings saved");
    Ok(Json(saved))
}

#[axum::debug_handler]
pub async fn check_access(
    State(state): State<AppState>,
    Path((exam_id, learner_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse> {
    let decision = state.access.can_start(exam_id, learner_id, true).await?;
    let message = match &decision {
        AccessDecision::Denied(reason) => Some(reason.message()),
        AccessDecision::Allowed => None,
    };
    Ok(Json(json!({
        "exam_id": exam_id,
        "learner_id": learner_id,
        "access": decision,
        "message": message,
    })))
}

#[utoipa::path(
    post,
    path = "/api/integration/exams/{exam_id}/learners/{learner_id}/start",
    params(
        ("exam_id" = i64, Path, description = "Exam ID"),
        ("learner_id" = i64, Path, description = "Learner ID")
    ),
    responses(
        (status = 201, description = "Attempt booked"),
        (status = 403, description = "Learner may not start this exam"),
        (status = 502, description = "Remote exam service failed")
    )
)]
#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Path((exam_id, learner_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse> {
    let exam_url = state.lifecycle.start_attempt(exam_id, learner_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "exam_url": exam_url }))))
}

#[axum::debug_handler]
pub async fn import_attempts(
    State(state): State<AppState>,
    Path((exam_id, learner_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse> {
    let report = state
        .lifecycle
        .import_external_attempts(exam_id, learner_id)
        .await?;
    let status = if report.succeeded() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(report)))
}

#[utoipa::path(
    get,
    path = "/api/integration/attempts",
    responses(
        (status = 200, description = "Matching attempts")
    )
)]
#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptListQuery>,
) -> Result<impl IntoResponse> {
    let (page, per_page) = query.pagination();
    let (attempts, total) = state
        .backends
        .attempts
        .search(&query.filter(), (page - 1) * per_page, per_page)
        .await?;
    Ok(Json(AttemptListResponse {
        items: attempts.iter().map(AttemptView::from).collect(),
        total,
        page,
        per_page,
    }))
}

#[axum::debug_handler]
pub async fn delete_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptListQuery>,
) -> Result<impl IntoResponse> {
    let filter = query.filter();
    if filter.is_empty() {
        return Err(Error::BadRequest(
            "refusing to delete without at least one filter".to_string(),
        ));
    }
    let deleted = state.backends.attempts.delete_matching(&filter).await?;
    tracing::warn!(deleted, filter = ?filter, "attempts deleted administratively");
    Ok(Json(json!({ "deleted": deleted })))
}

#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Path((learner_id, attempt_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse> {
    let attempt = load_attempt(&state, learner_id, &attempt_id).await?;
    Ok(Json(AttemptView::from(&attempt)))
}

#[axum::debug_handler]
pub async fn refresh_attempt(
    State(state): State<AppState>,
    Path((learner_id, attempt_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse> {
    let attempt = load_attempt(&state, learner_id, &attempt_id).await?;
    let resolved = state
        .lifecycle
        .fetch_results(attempt.exam_id, learner_id, &attempt_id)
        .await?;
    let attempt = load_attempt(&state, learner_id, &attempt_id).await?;
    Ok(Json(json!({
        "resolved": resolved,
        "attempt": AttemptView::from(&attempt),
    })))
}

#[axum::debug_handler]
pub async fn cancel_attempt(
    State(state): State<AppState>,
    Path((learner_id, attempt_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse> {
    let attempt = load_attempt(&state, learner_id, &attempt_id).await?;
    let canceled = state
        .lifecycle
        .cancel_attempt(attempt.exam_id, learner_id, &attempt_id)
        .await?;
    Ok(Json(json!({ "canceled": canceled })))
}

#[utoipa::path(
    post,
    path = "/api/integration/launch-links",
    responses(
        (status = 201, description = "Single-use launch link"),
        (status = 400, description = "Invalid payload")
    )
)]
#[axum::debug_handler]
pub async fn create_launch_link(
    State(state): State<AppState>,
    Json(payload): Json<LaunchLinkPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let ttl = Duration::seconds(state.config.launch_token_ttl_seconds.max(1));
    let (token, claims) = issue_launch_token(
        &state.config.jwt_secret,
        payload.exam_id,
        payload.learner_id,
        ttl,
        state.backends.clock.now(),
    )
    .map_err(|e| Error::Internal(format!("could not sign launch token: {}", e)))?;

    let running = state
        .access
        .running_attempt(payload.exam_id, payload.learner_id)
        .await?;

    let mut url = state.config.public_url(LAUNCH_PATH);
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("exam_id", &payload.exam_id.to_string())
            .append_pair("learner_id", &payload.learner_id.to_string())
            .append_pair("token", &token);
        if let Some(attempt) = &running {
            pairs
                .append_pair("attempt_id", &attempt.id)
                .append_pair("key", attempt.secret_key());
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(LaunchLinkResponse {
            url: url.to_string(),
            expires_at: claims.expires_at(),
            attempt_id: running.map(|a| a.id),
        }),
    ))
}

#[axum::debug_handler]
pub async fn run_poller(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let summary = state.poller.run_once().await?;
    Ok(Json(summary))
}
