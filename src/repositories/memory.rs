//! Process-local storage, selected with `STORAGE_BACKEND=memory` and used by
//! the test suites.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::exam_attempt::{AttemptStatus, ExamAttempt};
use crate::models::exam_settings::ExamSettings;
use crate::models::poll_job::{PollJob, ScheduledPoll};

use super::attempt_repository::{AttemptFilter, AttemptStore};
use super::cache_repository::KeyValueCache;
use super::job_repository::JobScheduler;
use super::settings_repository::ExamSettingsStore;

type AttemptKey = (i64, String);

#[derive(Clone, Default)]
pub struct InMemoryAttemptStore {
    attempts: Arc<RwLock<HashMap<AttemptKey, ExamAttempt>>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_oldest_first(items: &mut [ExamAttempt]) {
    items.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn insert(&self, attempt: &ExamAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().await;
        let key = (attempt.learner_id, attempt.id.clone());
        if attempts.contains_key(&key) {
            return Err(Error::Conflict(format!("attempt {} already exists", attempt.id)));
        }
        attempts.insert(key, attempt.clone());
        Ok(())
    }

    async fn update(&self, attempt: &ExamAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().await;
        match attempts.get_mut(&(attempt.learner_id, attempt.id.clone())) {
            Some(stored) => {
                *stored = attempt.clone();
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => Err(Error::NotFound(format!("attempt {}", attempt.id))),
        }
    }

    async fn update_if_status(
        &self,
        attempt: &ExamAttempt,
        expected: AttemptStatus,
    ) -> Result<bool> {
        let mut attempts = self.attempts.write().await;
        match attempts.get_mut(&(attempt.learner_id, attempt.id.clone())) {
            Some(stored) if stored.status() == expected => {
                *stored = attempt.clone();
                stored.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, learner_id: i64, attempt_id: &str) -> Result<Option<ExamAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts.get(&(learner_id, attempt_id.to_string())).cloned())
    }

    async fn list_for(&self, learner_id: i64, exam_id: i64) -> Result<Vec<ExamAttempt>> {
        let attempts = self.attempts.read().await;
        let mut items: Vec<_> = attempts
            .values()
            .filter(|a| a.learner_id == learner_id && a.exam_id == exam_id)
            .cloned()
            .collect();
        sort_oldest_first(&mut items);
        Ok(items)
    }

    async fn list_by_status(
        &self,
        learner_id: i64,
        exam_id: i64,
        status: AttemptStatus,
    ) -> Result<Vec<ExamAttempt>> {
        let mut items = self.list_for(learner_id, exam_id).await?;
        items.retain(|a| a.status() == status);
        Ok(items)
    }

    async fn search(
        &self,
        filter: &AttemptFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<ExamAttempt>, i64)> {
        let attempts = self.attempts.read().await;
        let mut items: Vec<_> = attempts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let total = items.len() as i64;
        let start = offset.max(0) as usize;
        let end = (start + limit.max(0) as usize).min(items.len());
        let page = if start >= items.len() {
            vec![]
        } else {
            items[start..end].to_vec()
        };
        Ok((page, total))
    }

    async fn delete_matching(&self, filter: &AttemptFilter) -> Result<u64> {
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|_, a| !filter.matches(a));
        Ok((before - attempts.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExamSettingsStore {
    settings: Arc<RwLock<HashMap<i64, ExamSettings>>>,
}

impl InMemoryExamSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExamSettingsStore for InMemoryExamSettingsStore {
    async fn get(&self, exam_id: i64) -> Result<Option<ExamSettings>> {
        Ok(self.settings.read().await.get(&exam_id).cloned())
    }

    async fn upsert(&self, settings: &ExamSettings) -> Result<ExamSettings> {
        self.settings
            .write()
            .await
            .insert(settings.exam_id, settings.clone());
        Ok(settings.clone())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryKeyValueCache {
    entries: Arc<RwLock<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl InMemoryKeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCache for InMemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), Utc::now() + ttl));
        Ok(())
    }

    async fn insert_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryJobScheduler {
    jobs: Arc<RwLock<HashMap<PollJob, ScheduledPoll>>>,
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn is_scheduled(&self, job: &PollJob) -> Result<bool> {
        Ok(self.jobs.read().await.contains_key(job))
    }

    async fn schedule(
        &self,
        job: &PollJob,
        interval: Duration,
        first_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.is_scheduled(job).await? {
            return Ok(false);
        }
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job) {
            return Ok(false);
        }
        jobs.insert(
            job.clone(),
            ScheduledPoll {
                job: job.clone(),
                interval_seconds: interval.num_seconds(),
                next_run_at: first_run_at,
            },
        );
        Ok(true)
    }

    async fn cancel(&self, job: &PollJob) -> Result<bool> {
        Ok(self.jobs.write().await.remove(job).is_some())
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledPoll>> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<_> = jobs
            .values()
            .filter(|s| s.next_run_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn reschedule(&self, job: &PollJob, next_run_at: DateTime<Utc>) -> Result<()> {
        if let Some(scheduled) = self.jobs.write().await.get_mut(job) {
            scheduled.next_run_at = next_run_at;
        }
        Ok(())
    }
}
