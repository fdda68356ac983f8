use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::error::Result;

/// What this service needs to know from the host LMS about learners and exams.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostLms: Send + Sync {
    async fn learner_exists(&self, learner_id: i64) -> Result<bool>;
    /// Ids of prerequisite exams the learner has not completed.
    async fn missing_prerequisites(&self, exam_id: i64, learner_id: i64) -> Result<Vec<i64>>;
    /// Maximum number of repeats; `None` means unrestricted.
    async fn retake_limit(&self, exam_id: i64) -> Result<Option<u32>>;
    async fn is_accessible(&self, exam_id: i64, learner_id: i64) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct PrerequisitesResponse {
    #[serde(default)]
    missing: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct RetakeLimitResponse {
    max_repeats: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    accessible: bool,
}

#[derive(Clone)]
pub struct HttpHostLms {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpHostLms {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl HostLms for HttpHostLms {
    async fn learner_exists(&self, learner_id: i64) -> Result<bool> {
        let response = self
            .get(&format!("/learners/{}", learner_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn missing_prerequisites(&self, exam_id: i64, learner_id: i64) -> Result<Vec<i64>> {
        let body: PrerequisitesResponse = self
            .get(&format!("/exams/{}/prerequisites", exam_id))
            .query(&[("learner_id", learner_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.missing)
    }

    async fn retake_limit(&self, exam_id: i64) -> Result<Option<u32>> {
        let body: RetakeLimitResponse = self
            .get(&format!("/exams/{}/retake-limit", exam_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.max_repeats)
    }

    async fn is_accessible(&self, exam_id: i64, learner_id: i64) -> Result<bool> {
        let body: AccessResponse = self
            .get(&format!("/exams/{}/access", exam_id))
            .query(&[("learner_id", learner_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.accessible)
    }
}
