use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::exam_attempt::{AttemptStatus, ExamAttempt};
use crate::repositories::AttemptStore;
use crate::services::host_lms::HostLms;
use crate::utils::time::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    UnknownLearner,
    PendingResults {
        attempt_id: String,
    },
    AttemptRunning {
        attempt_id: String,
        valid_until: DateTime<Utc>,
    },
    MissingPrerequisites {
        exam_ids: Vec<i64>,
    },
    RetakeLimitReached {
        max_repeats: u32,
        attempts: usize,
    },
    NotAccessible,
}

impl DenyReason {
    /// Learner-facing explanation.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::UnknownLearner => "Your account could not be found.",
            DenyReason::PendingResults { .. } => {
                "Your previous attempt is still being evaluated."
            }
            DenyReason::AttemptRunning { .. } => "You already have an exam in progress.",
            DenyReason::MissingPrerequisites { .. } => {
                "Please complete the required exams first."
            }
            DenyReason::RetakeLimitReached { .. } => {
                "You have used all permitted attempts for this exam."
            }
            DenyReason::NotAccessible => "This exam is not available to you.",
        }
    }
}

// Attempts canceled before the remote ever booked them were never sat.
fn counts_as_take(attempt: &ExamAttempt) -> bool {
    !(attempt.status() == AttemptStatus::Canceled && attempt.booking_ref.is_none())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed,
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }
}

/// Decides whether a learner may start or import an exam attempt.
pub struct AccessGuard {
    attempts: Arc<dyn AttemptStore>,
    host: Arc<dyn HostLms>,
    clock: Arc<dyn Clock>,
}

impl AccessGuard {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        host: Arc<dyn HostLms>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            attempts,
            host,
            clock,
        }
    }

    /// Checks run in a fixed order and the first denial wins, so host calls
    /// after a local denial never happen.
    pub async fn can_start(
        &self,
        exam_id: i64,
        learner_id: i64,
        check_running: bool,
    ) -> Result<AccessDecision> {
        if !self.host.learner_exists(learner_id).await? {
            return Ok(AccessDecision::Denied(DenyReason::UnknownLearner));
        }

        let attempts = self.attempts.list_for(learner_id, exam_id).await?;

        if let Some(pending) = attempts
            .iter()
            .find(|a| a.status() == AttemptStatus::PendingResults)
        {
            return Ok(AccessDecision::Denied(DenyReason::PendingResults {
                attempt_id: pending.id.clone(),
            }));
        }

        if check_running {
            if let Some(running) = self.running_among(&attempts) {
                return Ok(AccessDecision::Denied(DenyReason::AttemptRunning {
                    attempt_id: running.id.clone(),
                    valid_until: running.valid_until.unwrap_or_else(|| self.clock.now()),
                }));
            }
        }

        let missing = self.host.missing_prerequisites(exam_id, learner_id).await?;
        if !missing.is_empty() {
            return Ok(AccessDecision::Denied(DenyReason::MissingPrerequisites {
                exam_ids: missing,
            }));
        }

        if let Some(max_repeats) = self.host.retake_limit(exam_id).await? {
            // The first sitting is not a retake: allowed while taken - 1 < max_repeats.
            let taken = attempts.iter().filter(|a| counts_as_take(a)).count();
            if taken > max_repeats as usize {
                return Ok(AccessDecision::Denied(DenyReason::RetakeLimitReached {
                    max_repeats,
                    attempts: taken,
                }));
            }
        }

        if !self.host.is_accessible(exam_id, learner_id).await? {
            return Ok(AccessDecision::Denied(DenyReason::NotAccessible));
        }

        Ok(AccessDecision::Allowed)
    }

    /// The latest Started attempt, if its booking window is still open.
    pub async fn running_attempt(
        &self,
        exam_id: i64,
        learner_id: i64,
    ) -> Result<Option<ExamAttempt>> {
        let attempts = self
            .attempts
            .list_by_status(learner_id, exam_id, AttemptStatus::Started)
            .await?;
        Ok(self.running_among(&attempts).cloned())
    }

    pub async fn can_import(&self, learner_id: i64) -> Result<bool> {
        self.host.learner_exists(learner_id).await
    }

    // Only the most recent Started attempt counts; older abandoned ones never
    // block a new start.
    fn running_among<'a>(&self, attempts: &'a [ExamAttempt]) -> Option<&'a ExamAttempt> {
        attempts
            .iter()
            .filter(|a| a.status() == AttemptStatus::Started)
            .max_by_key(|a| (a.started_at, a.created_at))
            .filter(|a| a.is_running_at(self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam_attempt::NewAttempt;
    use crate::repositories::memory::InMemoryAttemptStore;
    use crate::services::host_lms::MockHostLms;
    use crate::utils::time::ManualClock;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()
    }

    fn attempt_at(at: DateTime<Utc>) -> ExamAttempt {
        ExamAttempt::new(
            NewAttempt {
                exam_id: 5,
                learner_id: 9,
                content_revision_ref: "rev".into(),
                credential_set: "main".into(),
                participant_ref: Some("p".into()),
            },
            at,
        )
    }

    fn open_host() -> MockHostLms {
        let mut host = MockHostLms::new();
        host.expect_learner_exists().returning(|_| Ok(true));
        host.expect_missing_prerequisites()
            .returning(|_, _| Ok(vec![]));
        host.expect_retake_limit().returning(|_| Ok(None));
        host.expect_is_accessible().returning(|_, _| Ok(true));
        host
    }

    fn guard(store: &InMemoryAttemptStore, host: MockHostLms) -> AccessGuard {
        AccessGuard::new(
            Arc::new(store.clone()),
            Arc::new(host),
            Arc::new(ManualClock::new(now())),
        )
    }

    #[tokio::test]
    async fn fresh_learner_is_allowed() {
        let store = InMemoryAttemptStore::new();
        let decision = guard(&store, open_host()).can_start(5, 9, true).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn unknown_learner_short_circuits() {
        let store = InMemoryAttemptStore::new();
        let mut host = MockHostLms::new();
        host.expect_learner_exists().times(1).returning(|_| Ok(false));

        let decision = guard(&store, host).can_start(5, 9, true).await.unwrap();
        assert_eq!(decision, AccessDecision::Denied(DenyReason::UnknownLearner));
    }

    #[tokio::test]
    async fn pending_results_wins_over_later_checks() {
        let store = InMemoryAttemptStore::new();
        let mut pending = attempt_at(now() - Duration::days(1));
        pending.submit(now() - Duration::hours(20));
        store.insert(&pending).await.unwrap();

        // Prerequisite, retake and accessibility lookups must not be reached.
        let mut host = MockHostLms::new();
        host.expect_learner_exists().returning(|_| Ok(true));

        let decision = guard(&store, host).can_start(5, 9, true).await.unwrap();
        assert_eq!(
            decision,
            AccessDecision::Denied(DenyReason::PendingResults {
                attempt_id: pending.id.clone()
            })
        );
    }

    #[tokio::test]
    async fn running_attempt_blocks_only_when_checked() {
        let store = InMemoryAttemptStore::new();
        let mut running = attempt_at(now() - Duration::hours(1));
        running.record_booking("b".into(), "https://exam".into(), now() + Duration::hours(23));
        store.insert(&running).await.unwrap();

        let decision = guard(&store, open_host()).can_start(5, 9, true).await.unwrap();
        assert!(matches!(
            decision,
            AccessDecision::Denied(DenyReason::AttemptRunning { .. })
        ));

        let decision = guard(&store, open_host()).can_start(5, 9, false).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn only_latest_started_attempt_counts_as_running() {
        let store = InMemoryAttemptStore::new();
        let mut old = attempt_at(now() - Duration::hours(5));
        old.record_booking("b-old".into(), "https://exam".into(), now() + Duration::hours(19));
        let mut latest = attempt_at(now() - Duration::hours(2));
        latest.record_booking("b-new".into(), "https://exam".into(), now() - Duration::minutes(1));
        store.insert(&old).await.unwrap();
        store.insert(&latest).await.unwrap();

        let g = guard(&store, open_host());
        assert!(g.can_start(5, 9, true).await.unwrap().is_allowed());
        assert!(g.running_attempt(5, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_prerequisites_are_reported() {
        let store = InMemoryAttemptStore::new();
        let mut host = MockHostLms::new();
        host.expect_learner_exists().returning(|_| Ok(true));
        host.expect_missing_prerequisites()
            .returning(|_, _| Ok(vec![3, 4]));

        let decision = guard(&store, host).can_start(5, 9, true).await.unwrap();
        assert_eq!(
            decision,
            AccessDecision::Denied(DenyReason::MissingPrerequisites { exam_ids: vec![3, 4] })
        );
    }

    fn host_with_retakes(max_repeats: u32) -> MockHostLms {
        let mut host = MockHostLms::new();
        host.expect_learner_exists().returning(|_| Ok(true));
        host.expect_missing_prerequisites()
            .returning(|_, _| Ok(vec![]));
        host.expect_retake_limit()
            .returning(move |_| Ok(Some(max_repeats)));
        host.expect_is_accessible().returning(|_, _| Ok(true));
        host
    }

    fn sat_attempt(days_ago: i64) -> ExamAttempt {
        let started = now() - Duration::days(days_ago);
        let mut attempt = attempt_at(started);
        attempt.record_booking(
            format!("b-{}", days_ago),
            "https://exam".into(),
            started + Duration::hours(24),
        );
        attempt.cancel();
        attempt
    }

    #[tokio::test]
    async fn retake_limit_counts_all_sat_attempts() {
        let store = InMemoryAttemptStore::new();
        store.insert(&sat_attempt(3)).await.unwrap();

        let g = guard(&store, host_with_retakes(1));
        assert!(g.can_start(5, 9, true).await.unwrap().is_allowed());

        store.insert(&sat_attempt(2)).await.unwrap();
        assert_eq!(
            g.can_start(5, 9, true).await.unwrap(),
            AccessDecision::Denied(DenyReason::RetakeLimitReached {
                max_repeats: 1,
                attempts: 2
            })
        );

        let g = guard(&store, host_with_retakes(2));
        assert!(g.can_start(5, 9, true).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn zero_retakes_still_allows_the_first_take() {
        let store = InMemoryAttemptStore::new();
        let g = guard(&store, host_with_retakes(0));
        assert!(g.can_start(5, 9, true).await.unwrap().is_allowed());

        store.insert(&sat_attempt(1)).await.unwrap();
        assert_eq!(
            g.can_start(5, 9, true).await.unwrap(),
            AccessDecision::Denied(DenyReason::RetakeLimitReached {
                max_repeats: 0,
                attempts: 1
            })
        );
    }

    #[tokio::test]
    async fn unbooked_cancellations_are_not_takes() {
        let store = InMemoryAttemptStore::new();
        for days_ago in [3, 2] {
            let mut failed = attempt_at(now() - Duration::days(days_ago));
            failed.cancel();
            store.insert(&failed).await.unwrap();
        }

        let g = guard(&store, host_with_retakes(0));
        assert!(g.can_start(5, 9, true).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn inaccessible_exam_is_denied_last() {
        let store = InMemoryAttemptStore::new();
        let mut host = MockHostLms::new();
        host.expect_learner_exists().returning(|_| Ok(true));
        host.expect_missing_prerequisites()
            .returning(|_, _| Ok(vec![]));
        host.expect_retake_limit().returning(|_| Ok(None));
        host.expect_is_accessible().returning(|_, _| Ok(false));

        let decision = guard(&store, host).can_start(5, 9, true).await.unwrap();
        assert_eq!(decision, AccessDecision::Denied(DenyReason::NotAccessible));
    }
}
