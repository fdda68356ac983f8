use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, ErrorContext, ExamError, ExamErrorKind, Result};
use crate::models::exam_attempt::{AttemptStatus, ExamAttempt};
use crate::repositories::AttemptStore;
use crate::services::lifecycle_service::LifecycleService;

pub const NOTIFY_PATH: &str = "/api/callback/notify";
pub const RETURN_PATH: &str = "/api/callback/return";

/// Query parameters carried by callback and return URLs. Everything arrives
/// as text so malformed ids surface as our own 400 rather than an extractor
/// rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub exam_id: Option<String>,
    pub learner_id: Option<String>,
    pub attempt_id: Option<String>,
    pub key: Option<String>,
    pub participant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum CallbackEvent {
    #[serde(rename = "examStarted")]
    ExamStarted,
    #[serde(rename = "examFinished")]
    ExamFinished,
    #[serde(rename = "examEvaluated")]
    ExamEvaluated,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct CallbackNotification {
    pub event: CallbackEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Ended,
    AlreadyEnded,
    ResultsApplied,
    ResultsPending,
    Ignored,
}

/// Callback URL handed to the remote when booking. It carries the attempt's
/// secret key and no expiring token, since evaluation can arrive days later.
pub fn notification_url(config: &Config, attempt: &ExamAttempt) -> String {
    let mut url = config.public_url(NOTIFY_PATH);
    url.query_pairs_mut()
        .append_pair("exam_id", &attempt.exam_id.to_string())
        .append_pair("learner_id", &attempt.learner_id.to_string())
        .append_pair("attempt_id", &attempt.id)
        .append_pair("key", attempt.secret_key());
    url.to_string()
}

/// Where the remote sends the learner's browser after the exam.
pub fn return_url(config: &Config, attempt: &ExamAttempt) -> String {
    let mut url = config.public_url(RETURN_PATH);
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("exam_id", &attempt.exam_id.to_string())
            .append_pair("learner_id", &attempt.learner_id.to_string())
            .append_pair("attempt_id", &attempt.id)
            .append_pair("key", attempt.secret_key());
        if let Some(participant) = &attempt.participant_ref {
            pairs.append_pair("participant", participant);
        }
    }
    url.to_string()
}

struct AttemptLocator<'a> {
    exam_id: i64,
    learner_id: i64,
    attempt_id: &'a str,
    key: &'a str,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::BadRequest(format!("missing parameter: {}", name)))
}

fn required_id(value: &Option<String>, name: &str) -> Result<i64> {
    required(value, name)?
        .parse::<i64>()
        .map_err(|_| Error::BadRequest(format!("malformed parameter: {}", name)))
}

fn locate(params: &CallbackParams) -> Result<AttemptLocator<'_>> {
    let exam_id = required_id(&params.exam_id, "exam_id")?;
    let learner_id = required_id(&params.learner_id, "learner_id")?;
    let attempt_id = required(&params.attempt_id, "attempt_id")?;
    let key = params
        .key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Unauthorized("missing attempt key".to_string()))?;
    Ok(AttemptLocator {
        exam_id,
        learner_id,
        attempt_id,
        key,
    })
}

/// Inbound surface for the remote service: asynchronous event notifications
/// and the synchronous browser return.
pub struct CallbackGateway {
    config: Arc<Config>,
    attempts: Arc<dyn AttemptStore>,
    lifecycle: Arc<LifecycleService>,
}

impl CallbackGateway {
    pub fn new(
        config: Arc<Config>,
        attempts: Arc<dyn AttemptStore>,
        lifecycle: Arc<LifecycleService>,
    ) -> Self {
        Self {
            config,
            attempts,
            lifecycle,
        }
    }

    /// Resolves the attempt named by the parameters and checks its key (and
    /// participant, for browser returns) in constant time.
    pub async fn authorize(
        &self,
        params: &CallbackParams,
        check_participant: bool,
    ) -> Result<ExamAttempt> {
        let locator = locate(params)?;
        let data = json!({
            "exam_id": locator.exam_id,
            "learner_id": locator.learner_id,
            "attempt_id": locator.attempt_id,
        });

        let attempt = self
            .attempts
            .find(locator.learner_id, locator.attempt_id)
            .await?
            .filter(|a| a.exam_id == locator.exam_id)
            .ok_or_else(|| {
                ExamError::new(ExamErrorKind::NoSuchAttempt, ErrorContext::Callback)
                    .with_data(data.clone())
                    .record()
            })?;

        if !attempt.matches_key(locator.key) {
            return Err(ExamError::new(ExamErrorKind::InvalidKey, ErrorContext::Callback)
                .with_data(data)
                .record()
                .into());
        }

        if check_participant {
            let participant = params.participant.as_deref().unwrap_or("");
            if !attempt.matches_participant(participant) {
                return Err(
                    ExamError::new(ExamErrorKind::InvalidParticipant, ErrorContext::Callback)
                        .with_data(data)
                        .record()
                        .into(),
                );
            }
        }

        Ok(attempt)
    }

    /// Authenticates first, then reads the body.
    pub async fn handle_notification(
        &self,
        params: &CallbackParams,
        body: &str,
    ) -> Result<NotificationOutcome> {
        let attempt = self.authorize(params, false).await?;
        let notification: CallbackNotification = serde_json::from_str(body)
            .map_err(|e| Error::BadRequest(format!("invalid notification body: {}", e)))?;

        let outcome = match notification.event {
            CallbackEvent::ExamFinished => {
                if attempt.status() != AttemptStatus::Started {
                    NotificationOutcome::AlreadyEnded
                } else if self
                    .lifecycle
                    .end_attempt(attempt.exam_id, attempt.learner_id, &attempt.id)
                    .await?
                {
                    NotificationOutcome::Ended
                } else {
                    NotificationOutcome::AlreadyEnded
                }
            }
            CallbackEvent::ExamEvaluated => {
                if self
                    .lifecycle
                    .fetch_results(attempt.exam_id, attempt.learner_id, &attempt.id)
                    .await?
                {
                    NotificationOutcome::ResultsApplied
                } else {
                    NotificationOutcome::ResultsPending
                }
            }
            CallbackEvent::ExamStarted | CallbackEvent::Other => NotificationOutcome::Ignored,
        };

        info!(
            attempt_id = %attempt.id,
            event = ?notification.event,
            outcome = ?outcome,
            "remote notification handled"
        );
        Ok(outcome)
    }

    /// Ends the attempt if still running and returns the results page URL.
    pub async fn handle_return(&self, params: &CallbackParams) -> Result<String> {
        let attempt = self.authorize(params, true).await?;
        if attempt.status() == AttemptStatus::Started {
            self.lifecycle
                .end_attempt(attempt.exam_id, attempt.learner_id, &attempt.id)
                .await?;
        } else {
            debug!(attempt_id = %attempt.id, "learner returned from an already ended attempt");
        }
        Ok(self.config.results_url(attempt.exam_id, &attempt.id))
    }
}
