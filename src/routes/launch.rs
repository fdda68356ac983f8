use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Duration;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Error;
use crate::routes::pages;
use crate::utils::token::{verify_launch_token, LaunchClaims};
use crate::AppState;

pub const LAUNCH_PATH: &str = "/api/exams/launch";

#[derive(Debug, Default, Deserialize)]
pub struct LaunchParams {
    pub exam_id: Option<String>,
    pub learner_id: Option<String>,
    pub token: Option<String>,
    pub attempt_id: Option<String>,
    pub key: Option<String>,
}

fn token_key(claims: &LaunchClaims) -> String {
    format!("launch-token:{}", claims.jti)
}

// The ids in the query must repeat the ones the token was issued for.
fn verified_claims(state: &AppState, params: &LaunchParams) -> Option<LaunchClaims> {
    let token = params.token.as_deref()?;
    let claims = match verify_launch_token(&state.config.jwt_secret, token, state.backends.clock.now())
    {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "launch token rejected");
            return None;
        }
    };
    let exam_id = params.exam_id.as_deref()?.trim().parse::<i64>().ok()?;
    let learner_id = params.learner_id.as_deref()?.trim().parse::<i64>().ok()?;
    (claims.exam_id == exam_id && claims.learner_id == learner_id).then_some(claims)
}

/// Single-use entry point for learners: resumes the running attempt or books
/// a new one, then sends the browser to the remote exam.
#[axum::debug_handler]
pub async fn launch(State(state): State<AppState>, Query(params): Query<LaunchParams>) -> Response {
    let Some(claims) = verified_claims(&state, &params) else {
        return pages::expired_link();
    };

    let remaining = claims.expires_at() - state.backends.clock.now();
    let ttl = remaining.max(Duration::seconds(1));
    match state
        .backends
        .cache
        .insert_if_absent(&token_key(&claims), "used", ttl)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(jti = %claims.jti, "launch token replayed");
            return pages::expired_link();
        }
        Err(e) => {
            warn!(error = %e, "could not consume launch token");
            return pages::notice("Something went wrong.");
        }
    }

    let attempt = params
        .attempt_id
        .as_deref()
        .zip(params.key.as_deref())
        .filter(|(id, key)| !id.is_empty() && !key.is_empty());

    match state
        .lifecycle
        .launch(claims.exam_id, claims.learner_id, attempt)
        .await
    {
        Ok(exam_url) => Redirect::to(&exam_url).into_response(),
        Err(Error::Exam(err)) => pages::notice(&err.user_message()),
        Err(_) => pages::notice("Something went wrong."),
    }
}
