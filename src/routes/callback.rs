use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;

use crate::error::{Error, Result};
use crate::routes::pages;
use crate::services::callback_gateway::CallbackParams;
use crate::AppState;

/// Asynchronous event from the remote exam service. Failures keep their
/// status so the remote retries.
#[axum::debug_handler]
pub async fn notify(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    body: String,
) -> Result<impl IntoResponse> {
    let outcome = state
        .callback_gateway
        .handle_notification(&params, &body)
        .await?;
    Ok(Json(json!({ "acknowledged": true, "outcome": outcome })))
}

/// The learner's browser coming back from the remote exam.
#[axum::debug_handler]
pub async fn return_from_exam(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state.callback_gateway.handle_return(&params).await {
        Ok(results_url) => Redirect::to(&results_url).into_response(),
        Err(Error::Exam(err)) => pages::notice(&err.user_message()),
        Err(err) => {
            tracing::debug!(error = %err, "rejected exam return");
            pages::notice("Something went wrong.")
        }
    }
}
