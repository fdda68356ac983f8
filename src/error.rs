use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Exam(#[from] ExamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, error_message) = match self {
            Error::Exam(err) => {
                let body = Json(json!({
                    "error": err.kind.code(),
                    "context": err.context.as_str(),
                    "message": err.user_message(),
                }));
                return (err.kind.status(), body).into_response();
            }
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            Error::Reqwest(err) => (
                StatusCode::BAD_GATEWAY,
                format!("External service error: {}", err),
            ),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
            ),
        };

        let body = Json(json!({ "error": error_message, "code": status.as_u16() }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}

/// The operation an engine error was raised from. The presentation layer keys
/// its notices on this, so the string forms are part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorContext {
    StartExam,
    EndExam,
    UpdateResults,
    ImportAttempt,
    Callback,
    Launch,
}

impl ErrorContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorContext::StartExam => "start-exam",
            ErrorContext::EndExam => "end-exam",
            ErrorContext::UpdateResults => "update-results",
            ErrorContext::ImportAttempt => "import-attempt",
            ErrorContext::Callback => "callback",
            ErrorContext::Launch => "launch",
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamErrorKind {
    NotConfigured,
    StartDisabled,
    NotAllowed,
    InvalidCredentials,
    InvalidExamModule,
    ParticipantCreationFailed,
    AttemptPersistenceFailed,
    BookingFailed,
    NoSuchAttempt,
    InvalidKey,
    InvalidParticipant,
    ResultsFetchFailed,
    ImportNoResults,
}

impl ExamErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ExamErrorKind::NotConfigured => "not_configured",
            ExamErrorKind::StartDisabled => "start_disabled",
            ExamErrorKind::NotAllowed => "not_allowed",
            ExamErrorKind::InvalidCredentials => "invalid_credentials",
            ExamErrorKind::InvalidExamModule => "invalid_exam_module",
            ExamErrorKind::ParticipantCreationFailed => "participant_creation_failed",
            ExamErrorKind::AttemptPersistenceFailed => "attempt_persistence_failed",
            ExamErrorKind::BookingFailed => "booking_failed",
            ExamErrorKind::NoSuchAttempt => "no_such_attempt",
            ExamErrorKind::InvalidKey => "invalid_key",
            ExamErrorKind::InvalidParticipant => "invalid_participant",
            ExamErrorKind::ResultsFetchFailed => "results_fetch_failed",
            ExamErrorKind::ImportNoResults => "import_no_results",
        }
    }

    /// Expected conditions (missing setup, not yet eligible) rather than faults.
    /// These are logged at debug and never raise an operational alert.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ExamErrorKind::NotConfigured
                | ExamErrorKind::StartDisabled
                | ExamErrorKind::NotAllowed
                | ExamErrorKind::ImportNoResults
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ExamErrorKind::NotConfigured
            | ExamErrorKind::StartDisabled
            | ExamErrorKind::InvalidCredentials
            | ExamErrorKind::InvalidExamModule => StatusCode::UNPROCESSABLE_ENTITY,
            ExamErrorKind::NotAllowed
            | ExamErrorKind::InvalidKey
            | ExamErrorKind::InvalidParticipant => StatusCode::FORBIDDEN,
            ExamErrorKind::ParticipantCreationFailed
            | ExamErrorKind::BookingFailed
            | ExamErrorKind::ResultsFetchFailed => StatusCode::BAD_GATEWAY,
            ExamErrorKind::AttemptPersistenceFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ExamErrorKind::NoSuchAttempt | ExamErrorKind::ImportNoResults => {
                StatusCode::NOT_FOUND
            }
        }
    }
}

impl fmt::Display for ExamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An engine failure tagged with the operation it came from and the ids involved.
///
/// `detail` is shown to learners and must stay human readable; `cause` holds the
/// underlying (possibly remote) message and only goes to the logs.
#[derive(Debug, Clone)]
pub struct ExamError {
    pub kind: ExamErrorKind,
    pub context: ErrorContext,
    pub detail: Option<String>,
    pub data: serde_json::Value,
    pub cause: Option<String>,
}

impl ExamError {
    pub fn new(kind: ExamErrorKind, context: ErrorContext) -> Self {
        Self {
            kind,
            context,
            detail: None,
            data: serde_json::Value::Null,
            cause: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn caused_by(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Logs the error at the severity its kind calls for and hands it back.
    pub fn record(self) -> Self {
        if self.kind.is_precondition() {
            tracing::debug!(
                context = %self.context,
                kind = self.kind.code(),
                data = %self.data,
                "{}",
                self
            );
        } else {
            tracing::error!(
                context = %self.context,
                kind = self.kind.code(),
                data = %self.data,
                cause = self.cause.as_deref().unwrap_or(""),
                "{}",
                self
            );
        }
        self
    }

    pub fn user_message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("Something went wrong. {}", detail),
            None => "Something went wrong.".to_string(),
        }
    }
}

impl fmt::Display for ExamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}", self.kind, self.context)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExamError {}
