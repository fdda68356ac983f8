use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RemoteCredentials};
use crate::error::{Error, ErrorContext, ExamError, ExamErrorKind, Result};
use crate::models::exam_attempt::{AttemptStatus, ExamAttempt, NewAttempt};
use crate::models::exam_settings::{ExamModule, ExamSettings};
use crate::models::poll_job::PollJob;
use crate::models::remote::{
    BookExamRequest, CreateParticipantRequest, ExaminationAccessRequest,
    ParticipantOverviewRequest, ResultRecord,
};
use crate::repositories::{AttemptStore, ExamSettingsStore, JobScheduler, KeyValueCache};
use crate::services::access_guard::{AccessDecision, AccessGuard};
use crate::services::callback_gateway::{notification_url, return_url};
use crate::services::events::{AttemptEvent, AttemptEventKind, EventBus};
use crate::services::grading_service::GradingService;
use crate::services::remote_gateway::{RemoteError, RemoteGateway};
use crate::utils::time::Clock;
use crate::Backends;

const PARTICIPANT_CACHE_DAYS: i64 = 30;

/// Outcome of one import run. Per-record failures are counted, never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: Vec<String>,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportReport {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Drives attempts through their lifecycle against the remote exam service.
pub struct LifecycleService {
    config: Arc<Config>,
    attempts: Arc<dyn AttemptStore>,
    settings: Arc<dyn ExamSettingsStore>,
    cache: Arc<dyn KeyValueCache>,
    scheduler: Arc<dyn JobScheduler>,
    remote: Arc<dyn RemoteGateway>,
    access: Arc<AccessGuard>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    last_created: Mutex<Option<DateTime<Utc>>>,
}

fn ids(exam_id: i64, learner_id: i64) -> serde_json::Value {
    json!({ "exam_id": exam_id, "learner_id": learner_id })
}

fn attempt_ids(attempt: &ExamAttempt) -> serde_json::Value {
    json!({
        "exam_id": attempt.exam_id,
        "learner_id": attempt.learner_id,
        "attempt_id": attempt.id,
    })
}

fn persistence_failed(context: ErrorContext, attempt: &ExamAttempt, err: Error) -> Error {
    ExamError::new(ExamErrorKind::AttemptPersistenceFailed, context)
        .with_data(attempt_ids(attempt))
        .caused_by(err)
        .into()
}

/// Logs the failure once at the severity its kind calls for.
fn recorded(context: ErrorContext, err: Error) -> Error {
    match err {
        Error::Exam(e) => Error::Exam(e.record()),
        other => {
            error!(context = %context, error = %other, "exam lifecycle failure");
            other
        }
    }
}

impl LifecycleService {
    pub fn new(config: Arc<Config>, backends: &Backends, access: Arc<AccessGuard>) -> Self {
        Self {
            config,
            attempts: backends.attempts.clone(),
            settings: backends.settings.clone(),
            cache: backends.cache.clone(),
            scheduler: backends.scheduler.clone(),
            remote: backends.remote.clone(),
            access,
            events: backends.events.clone(),
            clock: backends.clock.clone(),
            last_created: Mutex::new(None),
        }
    }

    pub async fn start_attempt(&self, exam_id: i64, learner_id: i64) -> Result<String> {
        self.start_inner(exam_id, learner_id)
            .await
            .map_err(|e| recorded(ErrorContext::StartExam, e))
    }

    pub async fn end_attempt(&self, exam_id: i64, learner_id: i64, attempt_id: &str) -> Result<bool> {
        self.end_inner(exam_id, learner_id, attempt_id)
            .await
            .map_err(|e| recorded(ErrorContext::EndExam, e))
    }

    pub async fn fetch_results(
        &self,
        exam_id: i64,
        learner_id: i64,
        attempt_id: &str,
    ) -> Result<bool> {
        self.fetch_inner(exam_id, learner_id, attempt_id)
            .await
            .map_err(|e| recorded(ErrorContext::UpdateResults, e))
    }

    pub async fn import_external_attempts(
        &self,
        exam_id: i64,
        learner_id: i64,
    ) -> Result<ImportReport> {
        self.import_inner(exam_id, learner_id)
            .await
            .map_err(|e| recorded(ErrorContext::ImportAttempt, e))
    }

    /// Access URL for the learner's running attempt, if there is one.
    pub async fn resume_url(&self, exam_id: i64, learner_id: i64) -> Result<Option<String>> {
        let Some(attempt) = self.access.running_attempt(exam_id, learner_id).await? else {
            return Ok(None);
        };
        self.access_url(&attempt)
            .await
            .map(Some)
            .map_err(|e| recorded(ErrorContext::StartExam, e))
    }

    /// Resumes a specific attempt through a launch link. The caller must hold
    /// the attempt's key; an attempt that is no longer running falls back to a
    /// fresh start.
    pub async fn launch(
        &self,
        exam_id: i64,
        learner_id: i64,
        attempt: Option<(&str, &str)>,
    ) -> Result<String> {
        let Some((attempt_id, key)) = attempt else {
            return match self.resume_url(exam_id, learner_id).await? {
                Some(url) => Ok(url),
                None => self.start_attempt(exam_id, learner_id).await,
            };
        };

        let attempt = self
            .find_attempt(exam_id, learner_id, attempt_id, ErrorContext::Launch)
            .await
            .map_err(|e| recorded(ErrorContext::Launch, e))?;
        if !attempt.matches_key(key) {
            let err = ExamError::new(ExamErrorKind::InvalidKey, ErrorContext::Launch)
                .with_data(attempt_ids(&attempt));
            return Err(Error::Exam(err.record()));
        }
        if attempt.is_running_at(self.clock.now()) {
            return self
                .access_url(&attempt)
                .await
                .map_err(|e| recorded(ErrorContext::Launch, e));
        }
        self.start_attempt(exam_id, learner_id).await
    }

    /// Host-initiated cancellation of a non-terminal attempt.
    pub async fn cancel_attempt(
        &self,
        exam_id: i64,
        learner_id: i64,
        attempt_id: &str,
    ) -> Result<bool> {
        self.cancel_inner(exam_id, learner_id, attempt_id)
            .await
            .map_err(|e| recorded(ErrorContext::EndExam, e))
    }

    async fn start_inner(&self, exam_id: i64, learner_id: i64) -> Result<String> {
        let context = ErrorContext::StartExam;
        let settings = self.configured_settings(exam_id, learner_id, context).await?;

        if settings.import_only {
            return Err(ExamError::new(ExamErrorKind::StartDisabled, context)
                .with_data(ids(exam_id, learner_id))
                .with_detail("Starting this exam here is disabled.")
                .into());
        }

        if let AccessDecision::Denied(reason) =
            self.access.can_start(exam_id, learner_id, true).await?
        {
            let message = reason.message();
            return Err(ExamError::new(ExamErrorKind::NotAllowed, context)
                .with_data(json!({
                    "exam_id": exam_id,
                    "learner_id": learner_id,
                    "denial": reason,
                }))
                .with_detail(message)
                .into());
        }

        let credential_set = settings.credential_set.clone().unwrap_or_default();
        let credentials = self.credentials_for(&credential_set, context, ids(exam_id, learner_id))?;
        let module = self.exam_module(&settings, context, learner_id)?;
        let participant = self
            .ensure_participant(&credential_set, &credentials, learner_id, context)
            .await?;

        let now = self.clock.now();
        let mut attempt = ExamAttempt::new(
            NewAttempt {
                exam_id,
                learner_id,
                content_revision_ref: module.revision_id.clone(),
                credential_set,
                participant_ref: Some(participant.clone()),
            },
            self.creation_time(now),
        );
        self.attempts
            .insert(&attempt)
            .await
            .map_err(|e| persistence_failed(context, &attempt, e))?;

        let validity = settings
            .validity_hours
            .map(i64::from)
            .unwrap_or(self.config.booking_validity_hours);
        let valid_until = now + Duration::hours(validity);
        let request = BookExamRequest {
            participant_id: participant,
            exam_module_id: module.module_id,
            content_revision_id: module.revision_id,
            valid_from: now,
            valid_until,
            return_url: return_url(&self.config, &attempt),
            callback_url: notification_url(&self.config, &attempt),
        };

        let booking = match self.remote.book_exam(&credentials, &request).await {
            Ok(booking) => booking,
            Err(remote) => {
                if attempt.cancel() {
                    if let Err(e) = self.attempts.update(&attempt).await {
                        warn!(attempt_id = %attempt.id, error = %e, "could not cancel unbooked attempt");
                    }
                }
                return Err(ExamError::new(ExamErrorKind::BookingFailed, context)
                    .with_data(attempt_ids(&attempt))
                    .caused_by(remote)
                    .into());
            }
        };

        let exam_url = booking.exam_url.clone();
        attempt.record_booking(booking.booking_id, booking.exam_url, valid_until);
        self.attempts
            .update(&attempt)
            .await
            .map_err(|e| persistence_failed(context, &attempt, e))?;

        self.ensure_polling(&attempt).await;
        self.events
            .publish(AttemptEvent::new(AttemptEventKind::Started, &attempt, now));
        info!(
            exam_id,
            learner_id,
            attempt_id = %attempt.id,
            "exam attempt booked"
        );
        Ok(exam_url)
    }

    async fn end_inner(&self, exam_id: i64, learner_id: i64, attempt_id: &str) -> Result<bool> {
        let context = ErrorContext::EndExam;
        let mut attempt = self
            .find_attempt(exam_id, learner_id, attempt_id, context)
            .await?;

        let now = self.clock.now();
        if !attempt.submit(now) {
            debug!(attempt_id, status = %attempt.status(), "attempt already ended");
            return Ok(false);
        }
        let written = self
            .attempts
            .update_if_status(&attempt, AttemptStatus::Started)
            .await
            .map_err(|e| persistence_failed(context, &attempt, e))?;
        if !written {
            debug!(attempt_id, "attempt ended concurrently");
            return Ok(false);
        }

        self.events
            .publish(AttemptEvent::new(AttemptEventKind::Submitted, &attempt, now));

        if let Err(e) = self.fetch_results(exam_id, learner_id, attempt_id).await {
            warn!(attempt_id, error = %e, "immediate results fetch failed, polling will retry");
        }
        Ok(true)
    }

    async fn fetch_inner(&self, exam_id: i64, learner_id: i64, attempt_id: &str) -> Result<bool> {
        let context = ErrorContext::UpdateResults;
        let mut attempt = self
            .find_attempt(exam_id, learner_id, attempt_id, context)
            .await?;

        if attempt.status() == AttemptStatus::Canceled {
            self.cancel_polling(&attempt).await;
            return Ok(false);
        }

        let credentials =
            self.credentials_for(&attempt.credential_set, context, attempt_ids(&attempt))?;
        let participant_id = attempt.participant_ref.clone().ok_or_else(|| {
            Error::from(
                ExamError::new(ExamErrorKind::ResultsFetchFailed, context)
                    .with_data(attempt_ids(&attempt))
                    .caused_by("attempt has no participant reference"),
            )
        })?;
        let request = ParticipantOverviewRequest {
            participant_id,
            booking_id: attempt.booking_ref.clone(),
        };
        let overview = self
            .remote
            .get_participant_overview(&credentials, &request)
            .await
            .map_err(|remote| {
                Error::from(
                    ExamError::new(ExamErrorKind::ResultsFetchFailed, context)
                        .with_data(attempt_ids(&attempt))
                        .caused_by(remote),
                )
            })?;

        let now = self.clock.now();
        let evaluated = select_record(&attempt, &overview.results)
            .and_then(|record| record.evaluation.as_ref().map(|e| (record, e)));

        let Some((record, evaluation)) = evaluated else {
            if attempt.await_results() {
                let written = self
                    .attempts
                    .update_if_status(&attempt, AttemptStatus::Started)
                    .await
                    .map_err(|e| persistence_failed(context, &attempt, e))?;
                if !written {
                    debug!(attempt_id, "attempt changed while awaiting results");
                }
            }
            if !attempt.status().is_terminal() {
                self.ensure_polling(&attempt).await;
            }
            return Ok(false);
        };

        let first_completion = attempt.status() != AttemptStatus::Completed;
        let results = GradingService::map_results(evaluation, attempt.time_spent_seconds);
        if !attempt.complete(results, record.attendance_ref(), record.finished_at, now) {
            return Ok(false);
        }
        self.attempts
            .update(&attempt)
            .await
            .map_err(|e| persistence_failed(context, &attempt, e))?;
        self.cancel_polling(&attempt).await;

        if first_completion {
            self.events
                .publish(AttemptEvent::new(AttemptEventKind::Completed, &attempt, now));
        }
        info!(attempt_id, passed = attempt.results.as_ref().map(|r| r.passed), "results applied");
        Ok(true)
    }

    async fn cancel_inner(&self, exam_id: i64, learner_id: i64, attempt_id: &str) -> Result<bool> {
        let context = ErrorContext::EndExam;
        let mut attempt = self
            .find_attempt(exam_id, learner_id, attempt_id, context)
            .await?;
        let expected = attempt.status();
        if !attempt.cancel() {
            return Ok(false);
        }
        let written = self
            .attempts
            .update_if_status(&attempt, expected)
            .await
            .map_err(|e| persistence_failed(context, &attempt, e))?;
        if !written {
            return Ok(false);
        }
        self.cancel_polling(&attempt).await;
        self.events.publish(AttemptEvent::new(
            AttemptEventKind::Canceled,
            &attempt,
            self.clock.now(),
        ));
        info!(attempt_id, "attempt canceled");
        Ok(true)
    }

    async fn import_inner(&self, exam_id: i64, learner_id: i64) -> Result<ImportReport> {
        let context = ErrorContext::ImportAttempt;
        let settings = self.configured_settings(exam_id, learner_id, context).await?;

        if !self.access.can_import(learner_id).await? {
            return Err(ExamError::new(ExamErrorKind::NotAllowed, context)
                .with_data(ids(exam_id, learner_id))
                .into());
        }

        let credential_set = settings.credential_set.clone().unwrap_or_default();
        let credentials = self.credentials_for(&credential_set, context, ids(exam_id, learner_id))?;
        let module = self.exam_module(&settings, context, learner_id)?;
        let participant = self
            .ensure_participant(&credential_set, &credentials, learner_id, context)
            .await?;

        let request = ParticipantOverviewRequest {
            participant_id: participant.clone(),
            booking_id: None,
        };
        let overview = self
            .remote
            .get_participant_overview(&credentials, &request)
            .await
            .map_err(|remote| {
                Error::from(
                    ExamError::new(ExamErrorKind::ResultsFetchFailed, context)
                        .with_data(ids(exam_id, learner_id))
                        .caused_by(remote),
                )
            })?;

        let records: Vec<&ResultRecord> = overview
            .results
            .iter()
            .filter(|r| {
                r.exam_module_id
                    .as_deref()
                    .map_or(true, |m| m == module.module_id)
            })
            .collect();
        if records.is_empty() {
            return Err(ExamError::new(ExamErrorKind::ImportNoResults, context)
                .with_data(ids(exam_id, learner_id))
                .with_detail("No results were found for this exam.")
                .into());
        }

        let existing = self.attempts.list_for(learner_id, exam_id).await?;
        let mut known = KnownSittings::default();
        for attempt in &existing {
            known.add(attempt.booking_ref.as_deref(), attempt.attendance_ref.as_deref());
        }

        let mut report = ImportReport::default();
        for record in records {
            let (booking, attendance) = (record.booking_ref(), record.attendance_ref());
            if !record.is_evaluated() || !known.is_new(booking.as_deref(), attendance.as_deref()) {
                report.skipped += 1;
                continue;
            }
            match self
                .import_record(exam_id, learner_id, &credential_set, &module, &participant, record)
                .await
            {
                Ok(attempt) => {
                    known.add(booking.as_deref(), attendance.as_deref());
                    report.created.push(attempt.id);
                }
                Err(e) => {
                    let e = recorded(context, e);
                    warn!(
                        exam_id,
                        learner_id,
                        booking = booking.as_deref().unwrap_or(""),
                        error = %e,
                        "skipping remote record that could not be imported"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            exam_id,
            learner_id,
            created = report.created.len(),
            skipped = report.skipped,
            failed = report.failed,
            "import finished"
        );
        Ok(report)
    }

    async fn import_record(
        &self,
        exam_id: i64,
        learner_id: i64,
        credential_set: &str,
        module: &ExamModule,
        participant: &str,
        record: &ResultRecord,
    ) -> Result<ExamAttempt> {
        let context = ErrorContext::ImportAttempt;
        let now = self.clock.now();
        let mut attempt = ExamAttempt::new(
            NewAttempt {
                exam_id,
                learner_id,
                content_revision_ref: module.revision_id.clone(),
                credential_set: credential_set.to_string(),
                participant_ref: Some(participant.to_string()),
            },
            self.creation_time(now),
        );
        attempt.status = AttemptStatus::from_workflow_state(record.workflow_state.as_deref());
        attempt.booking_ref = record.booking_ref();
        attempt.attendance_ref = record.attendance_ref();
        attempt.started_at = record.started_at.unwrap_or(attempt.created_at);
        attempt.completed_at = record.finished_at;
        attempt.time_spent_seconds = match (record.started_at, record.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_seconds().max(0)),
            _ => None,
        };
        attempt.imported = true;

        // Results go in with the row itself so a Completed attempt is never
        // stored without them.
        let completed = match &record.evaluation {
            Some(evaluation) => {
                let results = GradingService::map_results(evaluation, attempt.time_spent_seconds);
                attempt.complete(results, record.attendance_ref(), record.finished_at, now)
            }
            None => false,
        };

        self.attempts
            .insert(&attempt)
            .await
            .map_err(|e| persistence_failed(context, &attempt, e))?;
        self.events
            .publish(AttemptEvent::new(AttemptEventKind::Started, &attempt, now));
        self.events
            .publish(AttemptEvent::new(AttemptEventKind::Submitted, &attempt, now));
        if completed {
            self.events
                .publish(AttemptEvent::new(AttemptEventKind::Completed, &attempt, now));
        }
        Ok(attempt)
    }

    async fn access_url(&self, attempt: &ExamAttempt) -> Result<String> {
        let context = ErrorContext::StartExam;
        let credentials =
            self.credentials_for(&attempt.credential_set, context, attempt_ids(attempt))?;
        let (Some(participant_id), Some(booking_id)) =
            (attempt.participant_ref.clone(), attempt.booking_ref.clone())
        else {
            return Err(ExamError::new(ExamErrorKind::BookingFailed, context)
                .with_data(attempt_ids(attempt))
                .caused_by("attempt has no booking to resume")
                .into());
        };
        let request = ExaminationAccessRequest {
            participant_id,
            booking_id,
            return_url: return_url(&self.config, attempt),
        };
        match self.remote.get_examination_access_url(&credentials, &request).await {
            Ok(access) => Ok(access.url),
            Err(remote) => Err(ExamError::new(ExamErrorKind::BookingFailed, context)
                .with_data(attempt_ids(attempt))
                .caused_by(remote)
                .into()),
        }
    }

    async fn configured_settings(
        &self,
        exam_id: i64,
        learner_id: i64,
        context: ErrorContext,
    ) -> Result<ExamSettings> {
        self.settings
            .get(exam_id)
            .await?
            .filter(ExamSettings::is_configured)
            .ok_or_else(|| {
                ExamError::new(ExamErrorKind::NotConfigured, context)
                    .with_data(ids(exam_id, learner_id))
                    .with_detail("This exam is not set up yet.")
                    .into()
            })
    }

    fn credentials_for(
        &self,
        credential_set: &str,
        context: ErrorContext,
        data: serde_json::Value,
    ) -> Result<RemoteCredentials> {
        match self.config.credentials(credential_set) {
            Some(credentials) if credentials.is_valid() => Ok(credentials.clone()),
            _ => Err(ExamError::new(ExamErrorKind::InvalidCredentials, context)
                .with_data(data)
                .caused_by(format!("credential set '{}' is missing or incomplete", credential_set))
                .into()),
        }
    }

    fn exam_module(
        &self,
        settings: &ExamSettings,
        context: ErrorContext,
        learner_id: i64,
    ) -> Result<ExamModule> {
        settings
            .exam_module
            .as_deref()
            .and_then(ExamModule::parse)
            .ok_or_else(|| {
                ExamError::new(ExamErrorKind::InvalidExamModule, context)
                    .with_data(ids(settings.exam_id, learner_id))
                    .caused_by(format!(
                        "exam module '{}' is not <module>:<revision>",
                        settings.exam_module.as_deref().unwrap_or("")
                    ))
                    .into()
            })
    }

    /// Cached participant per learner and credential set, re-validated with
    /// the remote before use.
    async fn ensure_participant(
        &self,
        credential_set: &str,
        credentials: &RemoteCredentials,
        learner_id: i64,
        context: ErrorContext,
    ) -> Result<String> {
        let key = format!("participant:{}:{}", credential_set, learner_id);
        let failed = |cause: RemoteError| -> Error {
            ExamError::new(ExamErrorKind::ParticipantCreationFailed, context)
                .with_data(json!({ "learner_id": learner_id, "credential_set": credential_set }))
                .caused_by(cause)
                .into()
        };

        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "participant cache unavailable");
                None
            }
        };
        if let Some(participant_id) = cached {
            match self.remote.check_participant(credentials, &participant_id).await {
                Ok(participant) if participant.active => return Ok(participant_id),
                Ok(_) => debug!(learner_id, "cached participant inactive, creating a new one"),
                Err(e) if e.is_not_found() => {
                    debug!(learner_id, "cached participant unknown remotely, creating a new one")
                }
                Err(e) => return Err(failed(e)),
            }
        }

        let created = self
            .remote
            .create_participant(
                credentials,
                &CreateParticipantRequest {
                    external_id: learner_id.to_string(),
                },
            )
            .await
            .map_err(failed)?;

        if let Err(e) = self
            .cache
            .set(&key, &created.participant_id, Duration::days(PARTICIPANT_CACHE_DAYS))
            .await
        {
            warn!(error = %e, "could not cache participant");
        }
        Ok(created.participant_id)
    }

    async fn find_attempt(
        &self,
        exam_id: i64,
        learner_id: i64,
        attempt_id: &str,
        context: ErrorContext,
    ) -> Result<ExamAttempt> {
        self.attempts
            .find(learner_id, attempt_id)
            .await?
            .filter(|a| a.exam_id == exam_id)
            .ok_or_else(|| {
                ExamError::new(ExamErrorKind::NoSuchAttempt, context)
                    .with_data(json!({
                        "exam_id": exam_id,
                        "learner_id": learner_id,
                        "attempt_id": attempt_id,
                    }))
                    .into()
            })
    }

    async fn ensure_polling(&self, attempt: &ExamAttempt) {
        let job = PollJob::fetch_results(attempt.exam_id, attempt.learner_id, &attempt.id);
        let interval = Duration::hours(self.config.results_poll_interval_hours);
        match self
            .scheduler
            .schedule(&job, interval, self.clock.now() + interval)
            .await
        {
            Ok(true) => debug!(attempt_id = %attempt.id, "results polling scheduled"),
            Ok(false) => {}
            Err(e) => error!(attempt_id = %attempt.id, error = %e, "could not schedule results polling"),
        }
    }

    async fn cancel_polling(&self, attempt: &ExamAttempt) {
        let job = PollJob::fetch_results(attempt.exam_id, attempt.learner_id, &attempt.id);
        if let Err(e) = self.scheduler.cancel(&job).await {
            warn!(attempt_id = %attempt.id, error = %e, "could not cancel results polling");
        }
    }

    // Attempt ids hash the creation instant, so instants handed out by this
    // process never repeat.
    fn creation_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self
            .last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = match *last {
            Some(previous) if previous >= now => previous + Duration::nanoseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

/// Picks the record describing this attempt: the stored booking first, then
/// the stored attendance, otherwise the most recent.
fn select_record<'a>(attempt: &ExamAttempt, records: &'a [ResultRecord]) -> Option<&'a ResultRecord> {
    let candidates: Vec<&ResultRecord> = match (&attempt.booking_ref, &attempt.attendance_ref) {
        (Some(booking), _) => records
            .iter()
            .filter(|r| r.booking_ref().as_deref() == Some(booking.as_str()))
            .collect(),
        (None, Some(attendance)) => records
            .iter()
            .filter(|r| r.attendance_ref().as_deref() == Some(attendance.as_str()))
            .collect(),
        (None, None) => Vec::new(),
    };

    if let Some(attendance) = &attempt.attendance_ref {
        if let Some(exact) = candidates
            .iter()
            .find(|r| r.attendance_ref().as_deref() == Some(attendance.as_str()))
        {
            return Some(exact);
        }
    }
    candidates.into_iter().max_by_key(|r| r.last_activity())
}

/// Sittings already stored locally, keyed by booking, with a separate bucket
/// for attendances that have no booking.
#[derive(Default)]
struct KnownSittings {
    by_booking: HashMap<String, Vec<Option<String>>>,
    without_booking: HashSet<String>,
}

impl KnownSittings {
    fn add(&mut self, booking: Option<&str>, attendance: Option<&str>) {
        match (booking, attendance) {
            (Some(booking), attendance) => self
                .by_booking
                .entry(booking.to_string())
                .or_default()
                .push(attendance.map(str::to_string)),
            (None, Some(attendance)) => {
                self.without_booking.insert(attendance.to_string());
            }
            (None, None) => {}
        }
    }

    // Records with neither reference are always treated as new.
    fn is_new(&self, booking: Option<&str>, attendance: Option<&str>) -> bool {
        match (booking, attendance) {
            (Some(booking), attendance) => match self.by_booking.get(booking) {
                Some(known) => !known.iter().any(|a| a.as_deref() == attendance),
                None => true,
            },
            (None, Some(attendance)) => !self.without_booking.contains(attendance),
            (None, None) => true,
        }
    }
}
