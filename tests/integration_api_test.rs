mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;

use common::*;
use exam_booking_backend::models::exam_attempt::AttemptStatus;

#[tokio::test]
async fn health_is_public() {
    let app = test_app().await;
    let response = get(&app.router, "/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
    assert_eq!(response.json()["storage"], "memory");
}

#[tokio::test]
async fn integration_api_requires_privileged_token() {
    let app = test_app().await;
    let uri = "/api/integration/attempts";

    let response = get(&app.router, uri).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["error"], "missing_authorization");

    for (token, expected) in [
        (token_with_role(Some("learner")), StatusCode::FORBIDDEN),
        (token_with_role(None), StatusCode::FORBIDDEN),
        ("not-a-jwt".to_string(), StatusCode::UNAUTHORIZED),
        (token_with_role(Some("instructor")), StatusCode::OK),
    ] {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app.router, request).await.status, expected);
    }
}

#[tokio::test]
async fn exam_settings_round_trip_and_validation() {
    let app = test_app().await;
    let uri = "/api/integration/exams/55/settings";

    assert_eq!(admin_get(&app.router, uri).await.status, StatusCode::NOT_FOUND);

    let saved = admin_send(
        &app.router,
        "PUT",
        uri,
        Some(json!({
            "credential_set": "main",
            "exam_module": "mod-55:rev-2",
            "validity_hours": 48
        })),
    )
    .await;
    assert_eq!(saved.status, StatusCode::OK, "{}", saved.body);

    let fetched = admin_get(&app.router, uri).await.json();
    assert_eq!(fetched["exam_id"], 55);
    assert_eq!(fetched["exam_module"], "mod-55:rev-2");
    assert_eq!(fetched["import_only"], false);
    assert_eq!(fetched["validity_hours"], 48);

    let bad_module = admin_send(
        &app.router,
        "PUT",
        uri,
        Some(json!({ "credential_set": "main", "exam_module": "mod-55" })),
    )
    .await;
    assert_eq!(bad_module.status, StatusCode::BAD_REQUEST);

    let unknown_set = admin_send(
        &app.router,
        "PUT",
        uri,
        Some(json!({ "credential_set": "legacy", "exam_module": "mod-55:rev-2" })),
    )
    .await;
    assert_eq!(unknown_set.status, StatusCode::BAD_REQUEST);

    let bad_validity = admin_send(
        &app.router,
        "PUT",
        uri,
        Some(json!({ "credential_set": "main", "exam_module": "mod-55:rev-2", "validity_hours": 0 })),
    )
    .await;
    assert_eq!(bad_validity.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn configured_validity_window_is_used_for_booking() {
    let app = test_app().await;
    admin_send(
        &app.router,
        "PUT",
        "/api/integration/exams/7/settings",
        Some(json!({ "credential_set": "main", "exam_module": "mod-7:rev-3", "validity_hours": 2 })),
    )
    .await;

    let response = admin_send(&app.router, "POST", "/api/integration/exams/7/learners/42/start", None).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    assert!(response.json()["exam_url"].as_str().unwrap().contains("booking-"));

    let booking = app.remote.last_booking();
    assert_eq!(booking.valid_until - booking.valid_from, chrono::Duration::hours(2));
}

#[tokio::test]
async fn start_errors_carry_kind_and_context() {
    let app = test_app().await;
    let response = admin_send(&app.router, "POST", "/api/integration/exams/404/learners/42/start", None).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json();
    assert_eq!(body["error"], "not_configured");
    assert_eq!(body["context"], "start-exam");
    assert_eq!(body["message"], "Something went wrong. This exam is not set up yet.");
}

#[tokio::test]
async fn access_check_explains_denial() {
    let app = test_app().await;
    let uri = "/api/integration/exams/7/learners/42/access";

    let allowed = admin_get(&app.router, uri).await.json();
    assert_eq!(allowed["access"]["decision"], "allowed");

    let attempt_id = start_default_attempt(&app).await;
    let denied = admin_get(&app.router, uri).await.json();
    assert_eq!(denied["access"]["decision"], "denied");
    assert_eq!(denied["access"]["reason"], "attempt_running");
    assert_eq!(denied["access"]["attempt_id"], attempt_id);
    assert_eq!(denied["message"], "You already have an exam in progress.");
}

#[tokio::test]
async fn attempts_can_be_listed_inspected_and_cleaned_up() {
    let app = test_app().await;
    let first = start_default_attempt(&app).await;
    app.state
        .lifecycle
        .cancel_attempt(EXAM_ID, LEARNER_ID, &first)
        .await
        .unwrap();
    let second = start_default_attempt(&app).await;

    let page = admin_get(&app.router, "/api/integration/attempts?learner_id=42&per_page=1").await;
    assert_eq!(page.status, StatusCode::OK, "{}", page.body);
    let page = page.json();
    assert_eq!(page["total"], 2);
    assert_eq!(page["per_page"], 1);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    let canceled = admin_get(&app.router, "/api/integration/attempts?status=canceled").await.json();
    assert_eq!(canceled["total"], 1);
    assert_eq!(canceled["items"][0]["id"], first);

    let detail = admin_get(&app.router, &format!("/api/integration/learners/42/attempts/{}", second)).await;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(detail.json()["status"], "started");
    let secret = stored(&app, &second).await.secret_key().to_string();
    assert!(!detail.body.contains(&secret), "secret key must not be exposed");

    let missing = admin_get(&app.router, "/api/integration/learners/42/attempts/nope").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let unfiltered = admin_send(&app.router, "DELETE", "/api/integration/attempts", None).await;
    assert_eq!(unfiltered.status, StatusCode::BAD_REQUEST);

    let deleted = admin_send(&app.router, "DELETE", "/api/integration/attempts?status=canceled", None).await;
    assert_eq!(deleted.json()["deleted"], 1);
    let remaining = admin_get(&app.router, "/api/integration/attempts").await.json();
    assert_eq!(remaining["total"], 1);
}

#[tokio::test]
async fn refresh_and_cancel_endpoints() {
    let app = test_app().await;
    let attempt_id = start_default_attempt(&app).await;
    let booking = booking_of(&app, &attempt_id).await;
    let base = format!("/api/integration/learners/42/attempts/{}", attempt_id);

    let refreshed = admin_send(&app.router, "POST", &format!("{}/refresh", base), None).await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert_eq!(refreshed.json()["resolved"], false);
    assert_eq!(refreshed.json()["attempt"]["status"], "pending_results");

    app.remote
        .set_results(vec![evaluated_record(&booking, "att-1", "Pass", 10, 10)]);
    let refreshed = admin_send(&app.router, "POST", &format!("{}/refresh", base), None).await;
    assert_eq!(refreshed.json()["resolved"], true);
    assert_eq!(refreshed.json()["attempt"]["results"]["passed"], true);

    let cancel = admin_send(&app.router, "POST", &format!("{}/cancel", base), None).await;
    assert_eq!(cancel.status, StatusCode::OK);
    assert_eq!(cancel.json()["canceled"], false, "completed attempts stay completed");
    assert_eq!(stored(&app, &attempt_id).await.status(), AttemptStatus::Completed);
}
