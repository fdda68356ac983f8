use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::exam_attempt::{AttemptResults, AttemptStatus, ExamAttempt};
use crate::repositories::AttemptFilter;

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExamSettingsPayload {
    #[validate(length(min = 1, max = 64))]
    pub credential_set: String,
    /// "<module id>:<content revision id>"
    #[validate(length(min = 3, max = 255))]
    pub exam_module: String,
    #[serde(default)]
    pub import_only: bool,
    #[validate(range(min = 1, max = 720))]
    pub validity_hours: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LaunchLinkPayload {
    #[validate(range(min = 1))]
    pub exam_id: i64,
    #[validate(range(min = 1))]
    pub learner_id: i64,
}

#[derive(Debug, Serialize)]
pub struct LaunchLinkResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the link resumes a running attempt.
    pub attempt_id: Option<String>,
}

/// Query string of the attempt listing and bulk delete. Spelled out field by
/// field because flattened structs lose number parsing in query strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttemptListQuery {
    pub exam_id: Option<i64>,
    pub learner_id: Option<i64>,
    pub status: Option<AttemptStatus>,
    pub booking_ref: Option<String>,
    pub attendance_ref: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl AttemptListQuery {
    pub fn filter(&self) -> AttemptFilter {
        AttemptFilter {
            exam_id: self.exam_id,
            learner_id: self.learner_id,
            status: self.status,
            booking_ref: self.booking_ref.clone(),
            attendance_ref: self.attendance_ref.clone(),
        }
    }

    /// (page, per_page), 1-based and clamped.
    pub fn pagination(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }
}

/// Administrative view of an attempt. The secret key is never exposed.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub id: String,
    pub exam_id: i64,
    pub learner_id: i64,
    pub status: AttemptStatus,
    pub credential_set: String,
    pub content_revision_ref: String,
    pub participant_ref: Option<String>,
    pub booking_ref: Option<String>,
    pub attendance_ref: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub results: Option<AttemptResults>,
    pub imported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ExamAttempt> for AttemptView {
    fn from(attempt: &ExamAttempt) -> Self {
        Self {
            id: attempt.id.clone(),
            exam_id: attempt.exam_id,
            learner_id: attempt.learner_id,
            status: attempt.status(),
            credential_set: attempt.credential_set.clone(),
            content_revision_ref: attempt.content_revision_ref.clone(),
            participant_ref: attempt.participant_ref.clone(),
            booking_ref: attempt.booking_ref.clone(),
            attendance_ref: attempt.attendance_ref.clone(),
            valid_until: attempt.valid_until,
            started_at: attempt.started_at,
            completed_at: attempt.completed_at,
            time_spent_seconds: attempt.time_spent_seconds,
            results: attempt.results.clone(),
            imported: attempt.imported,
            created_at: attempt.created_at,
            updated_at: attempt.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttemptListResponse {
    pub items: Vec<AttemptView>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}
