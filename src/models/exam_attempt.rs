use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::utils::crypto::{derive_attempt_id, secrets_match};
use crate::utils::token::generate_secret_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Started,
    PendingResults,
    Completed,
    Canceled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Started => "started",
            AttemptStatus::PendingResults => "pending_results",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Completed | AttemptStatus::Canceled)
    }

    /// Forward-only lifecycle: Started -> PendingResults -> Completed, with
    /// Canceled reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        match (self, next) {
            (AttemptStatus::Started, AttemptStatus::PendingResults)
            | (AttemptStatus::Started, AttemptStatus::Completed)
            | (AttemptStatus::PendingResults, AttemptStatus::Completed) => true,
            (current, AttemptStatus::Canceled) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Maps the remote service's workflow code onto a local status.
    pub fn from_workflow_state(code: Option<&str>) -> Self {
        let normalized = code.map(|c| c.trim().to_ascii_lowercase());
        match normalized.as_deref() {
            Some("finished") | Some("submitted") | Some("in_evaluation") => {
                AttemptStatus::PendingResults
            }
            Some("evaluated") => AttemptStatus::Completed,
            _ => AttemptStatus::Started,
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(AttemptStatus::Started),
            "pending_results" => Ok(AttemptStatus::PendingResults),
            "completed" => Ok(AttemptStatus::Completed),
            "canceled" => Ok(AttemptStatus::Canceled),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResults {
    pub passed: bool,
    pub score: i64,
    pub max_score: i64,
    pub percentage: Decimal,
    pub time_spent_seconds: i64,
    #[serde(default)]
    pub certificate_ref: Option<String>,
    #[serde(default)]
    pub questions_total: i64,
    #[serde(default)]
    pub questions_correct: i64,
}

/// Input for a freshly created attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub exam_id: i64,
    pub learner_id: i64,
    pub content_revision_ref: String,
    pub credential_set: String,
    pub participant_ref: Option<String>,
}

/// One learner's single sitting of one externally hosted exam.
///
/// `secret_key` and `status` are crate-private: the key never leaves the
/// service except inside callback URLs, and status only moves through the
/// transition methods below.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamAttempt {
    pub id: String,
    pub exam_id: i64,
    pub learner_id: i64,
    pub(crate) secret_key: String,
    pub(crate) status: AttemptStatus,
    pub credential_set: String,
    pub content_revision_ref: String,
    pub participant_ref: Option<String>,
    pub booking_ref: Option<String>,
    pub attendance_ref: Option<String>,
    pub exam_url: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub results: Option<AttemptResults>,
    pub(crate) has_results: bool,
    pub imported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExamAttempt {
    pub fn new(input: NewAttempt, created_at: DateTime<Utc>) -> Self {
        Self {
            id: derive_attempt_id(created_at, input.exam_id, &input.content_revision_ref),
            exam_id: input.exam_id,
            learner_id: input.learner_id,
            secret_key: generate_secret_key(),
            status: AttemptStatus::Started,
            credential_set: input.credential_set,
            content_revision_ref: input.content_revision_ref,
            participant_ref: input.participant_ref,
            booking_ref: None,
            attendance_ref: None,
            exam_url: None,
            valid_until: None,
            started_at: created_at,
            completed_at: None,
            time_spent_seconds: None,
            results: None,
            has_results: false,
            imported: false,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn matches_key(&self, candidate: &str) -> bool {
        secrets_match(candidate, &self.secret_key)
    }

    pub fn matches_participant(&self, candidate: &str) -> bool {
        match &self.participant_ref {
            Some(participant) => secrets_match(candidate, participant),
            None => false,
        }
    }

    /// Older rows only carried the flag, newer ones carry the results themselves.
    pub fn has_results(&self) -> bool {
        self.has_results || self.results.is_some()
    }

    /// Running means Started and still inside the booking window.
    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Started
            && self.valid_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn record_booking(
        &mut self,
        booking_ref: String,
        exam_url: String,
        valid_until: DateTime<Utc>,
    ) {
        self.booking_ref = Some(booking_ref);
        self.exam_url = Some(exam_url);
        self.valid_until = Some(valid_until);
    }

    /// Learner finished: stamps completion and elapsed time.
    pub fn submit(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != AttemptStatus::Started {
            return false;
        }
        self.status = AttemptStatus::PendingResults;
        self.completed_at = Some(now);
        self.time_spent_seconds = Some((now - self.started_at).num_seconds().max(0));
        true
    }

    /// The remote has not evaluated yet; parks a Started attempt as pending.
    pub fn await_results(&mut self) -> bool {
        if self.status != AttemptStatus::Started {
            return false;
        }
        self.status = AttemptStatus::PendingResults;
        true
    }

    /// Applies evaluated results. Re-applying to a Completed attempt replaces
    /// the results (manual re-grading); a Canceled attempt is left alone.
    pub fn complete(
        &mut self,
        results: AttemptResults,
        attendance_ref: Option<String>,
        finished_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status == AttemptStatus::Canceled {
            return false;
        }
        if self.attendance_ref.is_none() {
            self.attendance_ref = attendance_ref;
        }
        if self.completed_at.is_none() {
            self.completed_at = Some(finished_at.unwrap_or(now));
        }
        if self.time_spent_seconds.is_none() {
            self.time_spent_seconds = Some(results.time_spent_seconds);
        }
        self.results = Some(results);
        self.has_results = true;
        self.status = AttemptStatus::Completed;
        true
    }

    pub fn cancel(&mut self) -> bool {
        if !self.status.can_transition_to(AttemptStatus::Canceled) {
            return false;
        }
        self.status = AttemptStatus::Canceled;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(now: DateTime<Utc>) -> ExamAttempt {
        ExamAttempt::new(
            NewAttempt {
                exam_id: 7,
                learner_id: 11,
                content_revision_ref: "rev-1".to_string(),
                credential_set: "main".to_string(),
                participant_ref: Some("p-11".to_string()),
            },
            now,
        )
    }

    fn results() -> AttemptResults {
        AttemptResults {
            passed: true,
            score: 8,
            max_score: 10,
            percentage: Decimal::new(8000, 2),
            time_spent_seconds: 600,
            certificate_ref: None,
            questions_total: 10,
            questions_correct: 8,
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            AttemptStatus::Started,
            AttemptStatus::PendingResults,
            AttemptStatus::Completed,
            AttemptStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<AttemptStatus>(), Ok(status));
        }
        assert!("finished".parse::<AttemptStatus>().is_err());
    }

    #[test]
    fn transitions_only_move_forward() {
        use AttemptStatus::*;
        assert!(Started.can_transition_to(PendingResults));
        assert!(Started.can_transition_to(Completed));
        assert!(PendingResults.can_transition_to(Completed));
        assert!(PendingResults.can_transition_to(Canceled));
        assert!(!PendingResults.can_transition_to(Started));
        assert!(!Completed.can_transition_to(PendingResults));
        assert!(!Completed.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(Started));
    }

    #[test]
    fn workflow_codes_map_to_local_status() {
        use AttemptStatus::*;
        assert_eq!(AttemptStatus::from_workflow_state(Some("finished")), PendingResults);
        assert_eq!(AttemptStatus::from_workflow_state(Some("Submitted")), PendingResults);
        assert_eq!(AttemptStatus::from_workflow_state(Some("in_evaluation")), PendingResults);
        assert_eq!(AttemptStatus::from_workflow_state(Some("evaluated")), Completed);
        assert_eq!(AttemptStatus::from_workflow_state(Some("booked")), Started);
        assert_eq!(AttemptStatus::from_workflow_state(None), Started);
    }

    #[test]
    fn running_requires_started_and_open_window() {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        let mut attempt = sample(now);
        assert!(!attempt.is_running_at(now), "no booking window yet");

        attempt.record_booking("b-1".into(), "https://exam/1".into(), now + Duration::hours(24));
        assert!(attempt.is_running_at(now + Duration::hours(1)));
        assert!(!attempt.is_running_at(now + Duration::hours(24)));

        attempt.submit(now + Duration::hours(1));
        assert!(!attempt.is_running_at(now + Duration::hours(2)));
    }

    #[test]
    fn submit_stamps_elapsed_time_once() {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        let mut attempt = sample(now);
        assert!(attempt.submit(now + Duration::minutes(42)));
        assert_eq!(attempt.status(), AttemptStatus::PendingResults);
        assert_eq!(attempt.time_spent_seconds, Some(42 * 60));
        assert!(!attempt.submit(now + Duration::minutes(50)));
        assert_eq!(attempt.time_spent_seconds, Some(42 * 60));
    }

    #[test]
    fn complete_sets_results_and_keeps_existing_stamps() {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        let mut attempt = sample(now);
        attempt.submit(now + Duration::minutes(5));
        assert!(attempt.complete(results(), Some("att-1".into()), None, now + Duration::hours(1)));
        assert_eq!(attempt.status(), AttemptStatus::Completed);
        assert!(attempt.has_results());
        assert_eq!(attempt.attendance_ref.as_deref(), Some("att-1"));
        assert_eq!(attempt.completed_at, Some(now + Duration::minutes(5)));
        assert_eq!(attempt.time_spent_seconds, Some(300));
    }

    #[test]
    fn canceled_attempt_rejects_results() {
        let now = Utc::now();
        let mut attempt = sample(now);
        assert!(attempt.cancel());
        assert!(!attempt.complete(results(), None, None, now));
        assert!(attempt.results.is_none());
        assert!(!attempt.cancel());
    }

    #[test]
    fn key_and_participant_checks() {
        let attempt = sample(Utc::now());
        let key = attempt.secret_key().to_string();
        assert!(attempt.matches_key(&key));
        assert!(!attempt.matches_key(&key[1..]));
        assert!(attempt.matches_participant("p-11"));
        assert!(!attempt.matches_participant("p-12"));
    }

    #[test]
    fn legacy_flag_counts_as_results() {
        let mut attempt = sample(Utc::now());
        assert!(!attempt.has_results());
        attempt.has_results = true;
        assert!(attempt.has_results());
    }
}
