pub mod callback;
pub mod health;
pub mod integration;
pub mod launch;
pub mod pages;

use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::auth::require_integration_role;
use crate::middleware::rate_limit::{rps_middleware, RateLimiter};
use crate::services::callback_gateway::{NOTIFY_PATH, RETURN_PATH};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let base_routes = Router::new().route("/health", get(health::health));

    let callback_api = Router::new()
        .route(NOTIFY_PATH, post(callback::notify))
        .route(RETURN_PATH, get(callback::return_from_exam))
        .route(launch::LAUNCH_PATH, get(launch::launch))
        .layer(from_fn_with_state(
            RateLimiter::new("callback", state.config.callback_rps),
            rps_middleware,
        ));

    let integration_api = Router::new()
        .route(
            "/api/integration/exams/:exam_id/settings",
            get(integration::get_exam_settings).put(integration::put_exam_settings),
        )
        .route(
            "/api/integration/exams/:exam_id/learners/:learner_id/access",
            get(integration::check_access),
        )
        .route(
            "/api/integration/exams/:exam_id/learners/:learner_id/start",
            post(integration::start_attempt),
        )
        .route(
            "/api/integration/exams/:exam_id/learners/:learner_id/import",
            post(integration::import_attempts),
        )
        .route(
            "/api/integration/attempts",
            get(integration::list_attempts).delete(integration::delete_attempts),
        )
        .route(
            "/api/integration/learners/:learner_id/attempts/:attempt_id",
            get(integration::get_attempt),
        )
        .route(
            "/api/integration/learners/:learner_id/attempts/:attempt_id/refresh",
            post(integration::refresh_attempt),
        )
        .route(
            "/api/integration/learners/:learner_id/attempts/:attempt_id/cancel",
            post(integration::cancel_attempt),
        )
        .route(
            "/api/integration/launch-links",
            post(integration::create_launch_link),
        )
        .route("/api/integration/poller/run", post(integration::run_poller))
        .route_layer(from_fn_with_state(state.clone(), require_integration_role))
        .layer(from_fn_with_state(
            RateLimiter::new("integration", state.config.integration_rps),
            rps_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any);

    base_routes
        .merge(callback_api)
        .merge(integration_api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
