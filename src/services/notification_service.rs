use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::Result;
use crate::services::events::{AttemptEvent, AttemptObserver};

/// Forwards lifecycle events to the host LMS so it can update course progress.
/// Delivery is fire-and-forget on a spawned task.
#[derive(Clone)]
pub struct HostProgressNotifier {
    client: Client,
    target_url: String,
    token: Option<String>,
}

impl HostProgressNotifier {
    pub fn new(client: Client, target_url: String, token: Option<String>) -> Self {
        Self {
            client,
            target_url,
            token,
        }
    }

    pub async fn deliver(&self, event: &AttemptEvent) -> Result<()> {
        let payload = json!({
            "event_type": event.kind.as_str(),
            "exam_id": event.exam_id,
            "learner_id": event.learner_id,
            "attempt_id": event.attempt_id,
            "imported": event.imported,
            "occurred_at": event.occurred_at.to_rfc3339(),
        });
        let mut request = self.client.post(&self.target_url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "host LMS rejected progress notification");
        } else {
            debug!(event = event.kind.as_str(), "host LMS notified");
        }
        Ok(())
    }
}

impl AttemptObserver for HostProgressNotifier {
    fn on_event(&self, event: &AttemptEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime available, dropping host notification");
            return;
        };
        let notifier = self.clone();
        let event = event.clone();
        runtime.spawn(async move {
            if let Err(e) = notifier.deliver(&event).await {
                warn!(
                    error = %e,
                    attempt_id = %event.attempt_id,
                    "failed to deliver host progress notification"
                );
            }
        });
    }
}
