use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FETCH_RESULTS_HOOK: &str = "exam_booking.fetch_results";

/// Identity of a recurring results poll. Two jobs with the same identity are
/// the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollJob {
    pub hook: String,
    pub exam_id: i64,
    pub learner_id: i64,
    pub attempt_id: String,
}

impl PollJob {
    pub fn fetch_results(exam_id: i64, learner_id: i64, attempt_id: &str) -> Self {
        Self {
            hook: FETCH_RESULTS_HOOK.to_string(),
            exam_id,
            learner_id,
            attempt_id: attempt_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPoll {
    pub job: PollJob,
    pub interval_seconds: i64,
    pub next_run_at: DateTime<Utc>,
}
