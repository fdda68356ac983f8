use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{Error, Result};
use crate::models::exam_attempt::{AttemptResults, AttemptStatus, ExamAttempt};

/// Field-match filter for administrative listing and bulk cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttemptFilter {
    pub exam_id: Option<i64>,
    pub learner_id: Option<i64>,
    pub status: Option<AttemptStatus>,
    pub booking_ref: Option<String>,
    pub attendance_ref: Option<String>,
}

impl AttemptFilter {
    pub fn is_empty(&self) -> bool {
        self.exam_id.is_none()
            && self.learner_id.is_none()
            && self.status.is_none()
            && self.booking_ref.is_none()
            && self.attendance_ref.is_none()
    }

    pub fn matches(&self, attempt: &ExamAttempt) -> bool {
        self.exam_id.map_or(true, |v| attempt.exam_id == v)
            && self.learner_id.map_or(true, |v| attempt.learner_id == v)
            && self.status.map_or(true, |v| attempt.status() == v)
            && self
                .booking_ref
                .as_deref()
                .map_or(true, |v| attempt.booking_ref.as_deref() == Some(v))
            && self
                .attendance_ref
                .as_deref()
                .map_or(true, |v| attempt.attendance_ref.as_deref() == Some(v))
    }
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn insert(&self, attempt: &ExamAttempt) -> Result<()>;
    async fn update(&self, attempt: &ExamAttempt) -> Result<()>;
    /// Writes the attempt only if the stored status still equals `expected`.
    /// Returns whether the write happened.
    async fn update_if_status(&self, attempt: &ExamAttempt, expected: AttemptStatus)
        -> Result<bool>;
    async fn find(&self, learner_id: i64, attempt_id: &str) -> Result<Option<ExamAttempt>>;
    /// All attempts of a learner on an exam, oldest first.
    async fn list_for(&self, learner_id: i64, exam_id: i64) -> Result<Vec<ExamAttempt>>;
    async fn list_by_status(
        &self,
        learner_id: i64,
        exam_id: i64,
        status: AttemptStatus,
    ) -> Result<Vec<ExamAttempt>>;
    async fn search(
        &self,
        filter: &AttemptFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<ExamAttempt>, i64)>;
    async fn delete_matching(&self, filter: &AttemptFilter) -> Result<u64>;
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: String,
    exam_id: i64,
    learner_id: i64,
    secret_key: String,
    status: String,
    credential_set: String,
    content_revision_ref: String,
    participant_ref: Option<String>,
    booking_ref: Option<String>,
    attendance_ref: Option<String>,
    exam_url: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    time_spent_seconds: Option<i64>,
    results: Option<serde_json::Value>,
    has_results: bool,
    imported: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AttemptRow {
    fn into_attempt(self) -> Result<ExamAttempt> {
        let status = self.status.parse::<AttemptStatus>().map_err(Error::Internal)?;
        let results = match self.results {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value::<AttemptResults>(value)?),
        };
        Ok(ExamAttempt {
            id: self.id,
            exam_id: self.exam_id,
            learner_id: self.learner_id,
            secret_key: self.secret_key,
            status,
            credential_set: self.credential_set,
            content_revision_ref: self.content_revision_ref,
            participant_ref: self.participant_ref,
            booking_ref: self.booking_ref,
            attendance_ref: self.attendance_ref,
            exam_url: self.exam_url,
            valid_until: self.valid_until,
            started_at: self.started_at,
            completed_at: self.completed_at,
            time_spent_seconds: self.time_spent_seconds,
            results,
            has_results: self.has_results,
            imported: self.imported,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_attempts(rows: Vec<AttemptRow>) -> Result<Vec<ExamAttempt>> {
    rows.into_iter().map(AttemptRow::into_attempt).collect()
}

fn results_json(attempt: &ExamAttempt) -> Result<Option<serde_json::Value>> {
    attempt
        .results
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(Error::from)
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AttemptFilter) {
    qb.push(" WHERE TRUE");
    if let Some(exam_id) = filter.exam_id {
        qb.push(" AND exam_id = ").push_bind(exam_id);
    }
    if let Some(learner_id) = filter.learner_id {
        qb.push(" AND learner_id = ").push_bind(learner_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(booking_ref) = &filter.booking_ref {
        qb.push(" AND booking_ref = ").push_bind(booking_ref.clone());
    }
    if let Some(attendance_ref) = &filter.attendance_ref {
        qb.push(" AND attendance_ref = ").push_bind(attendance_ref.clone());
    }
}

const SELECT_ATTEMPT: &str = "SELECT id, exam_id, learner_id, secret_key, status, credential_set, \
     content_revision_ref, participant_ref, booking_ref, attendance_ref, exam_url, valid_until, \
     started_at, completed_at, time_spent_seconds, results, has_results, imported, created_at, \
     updated_at FROM exam_attempts";

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write(&self, attempt: &ExamAttempt, expected: Option<AttemptStatus>) -> Result<u64> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE exam_attempts SET status = ");
        qb.push_bind(attempt.status().as_str())
            .push(", participant_ref = ")
            .push_bind(attempt.participant_ref.clone())
            .push(", booking_ref = ")
            .push_bind(attempt.booking_ref.clone())
            .push(", attendance_ref = ")
            .push_bind(attempt.attendance_ref.clone())
            .push(", exam_url = ")
            .push_bind(attempt.exam_url.clone())
            .push(", valid_until = ")
            .push_bind(attempt.valid_until)
            .push(", started_at = ")
            .push_bind(attempt.started_at)
            .push(", completed_at = ")
            .push_bind(attempt.completed_at)
            .push(", time_spent_seconds = ")
            .push_bind(attempt.time_spent_seconds)
            .push(", results = ")
            .push_bind(results_json(attempt)?)
            .push(", has_results = ")
            .push_bind(attempt.has_results())
            .push(", updated_at = NOW() WHERE learner_id = ")
            .push_bind(attempt.learner_id)
            .push(" AND id = ")
            .push_bind(attempt.id.clone());
        if let Some(expected) = expected {
            qb.push(" AND status = ").push_bind(expected.as_str());
        }
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn insert(&self, attempt: &ExamAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exam_attempts (
                id, exam_id, learner_id, secret_key, status, credential_set,
                content_revision_ref, participant_ref, booking_ref, attendance_ref,
                exam_url, valid_until, started_at, completed_at, time_spent_seconds,
                results, has_results, imported, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $19)
            "#,
        )
        .bind(&attempt.id)
        .bind(attempt.exam_id)
        .bind(attempt.learner_id)
        .bind(attempt.secret_key())
        .bind(attempt.status().as_str())
        .bind(&attempt.credential_set)
        .bind(&attempt.content_revision_ref)
        .bind(&attempt.participant_ref)
        .bind(&attempt.booking_ref)
        .bind(&attempt.attendance_ref)
        .bind(&attempt.exam_url)
        .bind(attempt.valid_until)
        .bind(attempt.started_at)
        .bind(attempt.completed_at)
        .bind(attempt.time_spent_seconds)
        .bind(results_json(attempt)?)
        .bind(attempt.has_results())
        .bind(attempt.imported)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, attempt: &ExamAttempt) -> Result<()> {
        match self.write(attempt, None).await? {
            0 => Err(Error::NotFound(format!("attempt {}", attempt.id))),
            _ => Ok(()),
        }
    }

    async fn update_if_status(
        &self,
        attempt: &ExamAttempt,
        expected: AttemptStatus,
    ) -> Result<bool> {
        Ok(self.write(attempt, Some(expected)).await? == 1)
    }

    async fn find(&self, learner_id: i64, attempt_id: &str) -> Result<Option<ExamAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "{} WHERE learner_id = $1 AND id = $2",
            SELECT_ATTEMPT
        ))
        .bind(learner_id)
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttemptRow::into_attempt).transpose()
    }

    async fn list_for(&self, learner_id: i64, exam_id: i64) -> Result<Vec<ExamAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "{} WHERE learner_id = $1 AND exam_id = $2 ORDER BY started_at ASC, created_at ASC",
            SELECT_ATTEMPT
        ))
        .bind(learner_id)
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }

    async fn list_by_status(
        &self,
        learner_id: i64,
        exam_id: i64,
        status: AttemptStatus,
    ) -> Result<Vec<ExamAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "{} WHERE learner_id = $1 AND exam_id = $2 AND status = $3 \
             ORDER BY started_at ASC, created_at ASC",
            SELECT_ATTEMPT
        ))
        .bind(learner_id)
        .bind(exam_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }

    async fn search(
        &self,
        filter: &AttemptFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<ExamAttempt>, i64)> {
        let mut count: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM exam_attempts");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(SELECT_ATTEMPT);
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY started_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build_query_as::<AttemptRow>().fetch_all(&self.pool).await?;
        Ok((into_attempts(rows)?, total))
    }

    async fn delete_matching(&self, filter: &AttemptFilter) -> Result<u64> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("DELETE FROM exam_attempts");
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam_attempt::NewAttempt;

    fn attempt() -> ExamAttempt {
        let mut attempt = ExamAttempt::new(
            NewAttempt {
                exam_id: 3,
                learner_id: 5,
                content_revision_ref: "r".into(),
                credential_set: "main".into(),
                participant_ref: None,
            },
            Utc::now(),
        );
        attempt.booking_ref = Some("b-1".into());
        attempt
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = AttemptFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&attempt()));
    }

    #[test]
    fn filter_fields_are_conjunctive() {
        let filter = AttemptFilter {
            exam_id: Some(3),
            booking_ref: Some("b-1".into()),
            ..Default::default()
        };
        assert!(!filter.is_empty());
        assert!(filter.matches(&attempt()));

        let filter = AttemptFilter {
            exam_id: Some(3),
            status: Some(AttemptStatus::Completed),
            ..Default::default()
        };
        assert!(!filter.matches(&attempt()));
    }
}
