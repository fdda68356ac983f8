#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value as JsonValue;
use tower::ServiceExt;

use exam_booking_backend::{
    config::{Config, RemoteCredentials},
    error::Result,
    middleware::auth::Claims,
    models::exam_settings::ExamSettings,
    repositories::AttemptStore,
    models::remote::{
        AccessUrl, BookExamRequest, Booking, CreateParticipantRequest, Evaluation,
        ExaminationAccessRequest, Participant, ParticipantOverview, ParticipantOverviewRequest,
        QuestionScore, ResultRecord,
    },
    routes,
    services::{
        events::{AttemptEvent, AttemptEventKind, AttemptObserver, EventBus},
        host_lms::HostLms,
        remote_gateway::{RemoteError, RemoteGateway, RemoteResult},
    },
    utils::time::ManualClock,
    AppState, Backends,
};

pub const JWT_SECRET: &str = "test-secret";
pub const EXAM_ID: i64 = 7;
pub const LEARNER_ID: i64 = 42;
pub const MODULE_ID: &str = "mod-7";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
}

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("SERVER_ADDRESS", "127.0.0.1:0"),
        ("PUBLIC_BASE_URL", "https://exams.example.org"),
        ("STORAGE_BACKEND", "memory"),
        ("JWT_SECRET", JWT_SECRET),
        (
            "REMOTE_CREDENTIALS",
            r#"{"main": {"api_url": "https://remote.example.org/api", "client_id": "lms", "client_secret": "s3cret"}}"#,
        ),
        ("HOST_LMS_URL", "https://lms.example.org/api"),
        ("RESULTS_VIEW_URL", "https://lms.example.org/exam/results"),
        ("CALLBACK_RPS", "1000"),
        ("INTEGRATION_RPS", "1000"),
    ]);
    Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).expect("test config")
}

/// Scripted stand-in for the remote exam service.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    counter: u32,
    participants: HashMap<String, bool>,
    results: Vec<ResultRecord>,
    fail_booking: bool,
    fail_overview: bool,
    bookings: Vec<BookExamRequest>,
    overview_calls: usize,
    access_requests: Vec<ExaminationAccessRequest>,
}

impl FakeRemote {
    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_results(&self, results: Vec<ResultRecord>) {
        self.with(|s| s.results = results);
    }

    pub fn fail_booking(&self, fail: bool) {
        self.with(|s| s.fail_booking = fail);
    }

    pub fn fail_overview(&self, fail: bool) {
        self.with(|s| s.fail_overview = fail);
    }

    pub fn deactivate_participant(&self, participant_id: &str) {
        self.with(|s| s.participants.insert(participant_id.to_string(), false));
    }

    pub fn participants_created(&self) -> usize {
        self.with(|s| s.participants.len())
    }

    pub fn bookings(&self) -> Vec<BookExamRequest> {
        self.with(|s| s.bookings.clone())
    }

    pub fn last_booking(&self) -> BookExamRequest {
        self.with(|s| s.bookings.last().cloned()).expect("a booking was made")
    }

    pub fn overview_calls(&self) -> usize {
        self.with(|s| s.overview_calls)
    }

    pub fn access_requests(&self) -> Vec<ExaminationAccessRequest> {
        self.with(|s| s.access_requests.clone())
    }
}

fn remote_down() -> RemoteError {
    RemoteError::ServerError {
        status: 503,
        message: "maintenance".to_string(),
    }
}

#[async_trait]
impl RemoteGateway for FakeRemote {
    async fn book_exam(
        &self,
        _credentials: &RemoteCredentials,
        request: &BookExamRequest,
    ) -> RemoteResult<Booking> {
        self.with(|s| {
            if s.fail_booking {
                return Err(remote_down());
            }
            s.counter += 1;
            s.bookings.push(request.clone());
            let booking_id = format!("booking-{}", s.counter);
            Ok(Booking {
                exam_url: format!("https://remote.example.org/exam/{}", booking_id),
                booking_id,
            })
        })
    }

    async fn get_participant_overview(
        &self,
        _credentials: &RemoteCredentials,
        request: &ParticipantOverviewRequest,
    ) -> RemoteResult<ParticipantOverview> {
        self.with(|s| {
            s.overview_calls += 1;
            if s.fail_overview {
                return Err(remote_down());
            }
            let results = s
                .results
                .iter()
                .filter(|r| match &request.booking_id {
                    Some(booking) => r.booking_id.as_deref() == Some(booking.as_str()),
                    None => true,
                })
                .cloned()
                .collect();
            Ok(ParticipantOverview {
                participant_id: Some(request.participant_id.clone()),
                results,
            })
        })
    }

    async fn create_participant(
        &self,
        _credentials: &RemoteCredentials,
        request: &CreateParticipantRequest,
    ) -> RemoteResult<Participant> {
        self.with(|s| {
            s.counter += 1;
            let participant_id = format!("participant-{}-{}", request.external_id, s.counter);
            s.participants.insert(participant_id.clone(), true);
            Ok(Participant {
                participant_id,
                active: true,
            })
        })
    }

    async fn check_participant(
        &self,
        _credentials: &RemoteCredentials,
        participant_id: &str,
    ) -> RemoteResult<Participant> {
        self.with(|s| match s.participants.get(participant_id) {
            Some(active) => Ok(Participant {
                participant_id: participant_id.to_string(),
                active: *active,
            }),
            None => Err(RemoteError::NotFound {
                code: "not_found".to_string(),
                message: "unknown participant".to_string(),
            }),
        })
    }

    async fn get_examination_access_url(
        &self,
        _credentials: &RemoteCredentials,
        request: &ExaminationAccessRequest,
    ) -> RemoteResult<AccessUrl> {
        self.with(|s| {
            s.access_requests.push(request.clone());
            Ok(AccessUrl {
                url: format!("https://remote.example.org/resume/{}", request.booking_id),
            })
        })
    }
}

/// Host LMS answers fixed up front.
#[derive(Debug, Clone)]
pub struct StaticHost {
    pub learner_exists: bool,
    pub missing_prerequisites: Vec<i64>,
    pub retake_limit: Option<u32>,
    pub accessible: bool,
}

impl Default for StaticHost {
    fn default() -> Self {
        Self {
            learner_exists: true,
            missing_prerequisites: Vec::new(),
            retake_limit: None,
            accessible: true,
        }
    }
}

#[async_trait]
impl HostLms for StaticHost {
    async fn learner_exists(&self, _learner_id: i64) -> Result<bool> {
        Ok(self.learner_exists)
    }

    async fn missing_prerequisites(&self, _exam_id: i64, _learner_id: i64) -> Result<Vec<i64>> {
        Ok(self.missing_prerequisites.clone())
    }

    async fn retake_limit(&self, _exam_id: i64) -> Result<Option<u32>> {
        Ok(self.retake_limit)
    }

    async fn is_accessible(&self, _exam_id: i64, _learner_id: i64) -> Result<bool> {
        Ok(self.accessible)
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AttemptEvent>>,
}

impl RecordingObserver {
    pub fn kinds(&self) -> Vec<AttemptEventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn events(&self) -> Vec<AttemptEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AttemptObserver for RecordingObserver {
    fn on_event(&self, event: &AttemptEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub remote: Arc<FakeRemote>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingObserver>,
}

pub async fn test_app() -> TestApp {
    test_app_with_host(StaticHost::default()).await
}

/// Memory-backed app with exam `EXAM_ID` configured against credential set "main".
pub async fn test_app_with_host(host: StaticHost) -> TestApp {
    build_test_app(host, None).await
}

/// Same as `test_app`, with attempts kept in the given store.
pub async fn test_app_with_attempts(attempts: Arc<dyn AttemptStore>) -> TestApp {
    build_test_app(StaticHost::default(), Some(attempts)).await
}

async fn build_test_app(host: StaticHost, attempts: Option<Arc<dyn AttemptStore>>) -> TestApp {
    let remote = Arc::new(FakeRemote::default());
    let clock = Arc::new(ManualClock::new(start_time()));
    let events = Arc::new(RecordingObserver::default());

    let mut backends = Backends::in_memory(remote.clone(), Arc::new(host), clock.clone())
        .with_events(EventBus::new().with_observer(events.clone()));
    if let Some(attempts) = attempts {
        backends.attempts = attempts;
    }
    backends
        .settings
        .upsert(&ExamSettings {
            exam_id: EXAM_ID,
            credential_set: Some("main".to_string()),
            exam_module: Some(format!("{}:rev-3", MODULE_ID)),
            import_only: false,
            validity_hours: None,
        })
        .await
        .expect("seed settings");

    let state = AppState::new(Arc::new(test_config()), backends);
    let router = routes::router(state.clone());
    TestApp {
        state,
        router,
        remote,
        clock,
        events,
    }
}

pub fn admin_token() -> String {
    token_with_role(Some("admin"))
}

pub fn token_with_role(role: Option<&str>) -> String {
    let claims = Claims {
        sub: "ops@lms".to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
        role: role.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> JsonValue {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("not json ({}): {}", e, self.body))
    }

    pub fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

pub async fn admin_get(router: &Router, uri: &str) -> TestResponse {
    let request = Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token()))
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn admin_send(router: &Router, method: &str, uri: &str, body: Option<JsonValue>) -> TestResponse {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token()));
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    send(router, request).await
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

pub async fn post_json(router: &Router, uri: &str, body: &str) -> TestResponse {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

/// Path and query of an absolute URL handed out by the service.
pub fn local_uri(absolute: &str) -> String {
    let url = url::Url::parse(absolute).unwrap();
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

pub fn query_param(absolute: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(absolute).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub fn evaluated_record(booking: &str, attendance: &str, result: &str, achieved: i64, max: i64) -> ResultRecord {
    ResultRecord {
        booking_id: Some(booking.to_string()),
        attendance_id: Some(attendance.to_string()),
        exam_module_id: Some(MODULE_ID.to_string()),
        workflow_state: Some("evaluated".to_string()),
        started_at: Some(start_time()),
        finished_at: Some(start_time() + chrono::Duration::minutes(45)),
        evaluation: Some(Evaluation {
            result: result.to_string(),
            achieved_score: achieved,
            max_score: max,
            percentage: None,
            time_spent_seconds: Some(2700),
            certificate_id: None,
            questions: vec![
                QuestionScore { points_reached: 1.0, max_points: 1.0 },
                QuestionScore { points_reached: 0.0, max_points: 1.0 },
            ],
        }),
    }
}

pub fn unevaluated_record(booking: &str, attendance: &str) -> ResultRecord {
    ResultRecord {
        booking_id: Some(booking.to_string()),
        attendance_id: Some(attendance.to_string()),
        exam_module_id: Some(MODULE_ID.to_string()),
        workflow_state: Some("finished".to_string()),
        started_at: Some(start_time()),
        finished_at: Some(start_time() + chrono::Duration::minutes(45)),
        evaluation: None,
    }
}

/// Starts an attempt for the default learner and returns its id.
pub async fn start_default_attempt(app: &TestApp) -> String {
    app.state
        .lifecycle
        .start_attempt(EXAM_ID, LEARNER_ID)
        .await
        .expect("start attempt");
    let callback = app.remote.last_booking().callback_url;
    query_param(&callback, "attempt_id").expect("attempt id in callback url")
}

pub async fn stored(app: &TestApp, attempt_id: &str) -> exam_booking_backend::models::exam_attempt::ExamAttempt {
    app.state
        .backends
        .attempts
        .find(LEARNER_ID, attempt_id)
        .await
        .expect("store lookup")
        .expect("attempt exists")
}

pub async fn booking_of(app: &TestApp, attempt_id: &str) -> String {
    stored(app, attempt_id).await.booking_ref.expect("attempt was booked")
}
