use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RemoteCredentials;
use crate::models::remote::{
    AccessUrl, BookExamRequest, Booking, CheckParticipantRequest, CreateParticipantRequest,
    ExaminationAccessRequest, Participant, ParticipantOverview, ParticipantOverviewRequest,
    RemoteEnvelope,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote rejected credentials ({code}): {message}")]
    NotAuthorized { code: String, message: String },

    #[error("remote resource not found ({code}): {message}")]
    NotFound { code: String, message: String },

    #[error("remote rejected request ({code}): {message}")]
    BadRequest { code: String, message: String },

    #[error("remote server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("could not decode remote response: {0}")]
    Decode(String),

    #[error("remote transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn from_status(status: u16, code: Option<String>, message: Option<String>) -> Self {
        let code = code.unwrap_or_else(|| status.to_string());
        let message = message.unwrap_or_default();
        match status {
            401 => RemoteError::NotAuthorized { code, message },
            404 => RemoteError::NotFound { code, message },
            400 => RemoteError::BadRequest { code, message },
            _ => RemoteError::ServerError { status, message },
        }
    }

    fn from_error_code(code: Option<String>, message: Option<String>) -> Self {
        let code = code.unwrap_or_else(|| "unknown".to_string());
        let message = message.unwrap_or_default();
        match code.as_str() {
            "not_authorized" | "unauthorized" => RemoteError::NotAuthorized { code, message },
            "not_found" => RemoteError::NotFound { code, message },
            _ => RemoteError::BadRequest { code, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Decodes one remote reply. Non-200 statuses win over the body; a 200 with
/// `success=false` is mapped from its error code.
pub fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> RemoteResult<T> {
    if status != 200 {
        let envelope = serde_json::from_str::<RemoteEnvelope<serde_json::Value>>(body).ok();
        let (code, message) = envelope
            .map(|e| (e.error_code, e.error_message))
            .unwrap_or((None, None));
        return Err(RemoteError::from_status(status, code, message));
    }

    let envelope: RemoteEnvelope<T> =
        serde_json::from_str(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
    if !envelope.success {
        return Err(RemoteError::from_error_code(
            envelope.error_code,
            envelope.error_message,
        ));
    }
    envelope
        .data
        .ok_or_else(|| RemoteError::Decode("successful response without data".to_string()))
}

/// The remote exam service's RPC surface.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn book_exam(
        &self,
        credentials: &RemoteCredentials,
        request: &BookExamRequest,
    ) -> RemoteResult<Booking>;

    async fn get_participant_overview(
        &self,
        credentials: &RemoteCredentials,
        request: &ParticipantOverviewRequest,
    ) -> RemoteResult<ParticipantOverview>;

    async fn create_participant(
        &self,
        credentials: &RemoteCredentials,
        request: &CreateParticipantRequest,
    ) -> RemoteResult<Participant>;

    async fn check_participant(
        &self,
        credentials: &RemoteCredentials,
        participant_id: &str,
    ) -> RemoteResult<Participant>;

    async fn get_examination_access_url(
        &self,
        credentials: &RemoteCredentials,
        request: &ExaminationAccessRequest,
    ) -> RemoteResult<AccessUrl>;
}

#[derive(Clone)]
pub struct HttpRemoteGateway {
    client: Client,
}

impl HttpRemoteGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn call<Req, Resp>(
        &self,
        credentials: &RemoteCredentials,
        function: &str,
        body: &Req,
    ) -> RemoteResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", credentials.api_url.trim_end_matches('/'), function);
        debug!(function, "calling remote exam service");

        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(function, error = %e, "remote exam service unreachable");
                RemoteError::Transport(e.to_string())
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        decode_envelope(status, &text)
    }
}

#[async_trait]
impl RemoteGateway for HttpRemoteGateway {
    async fn book_exam(
        &self,
        credentials: &RemoteCredentials,
        request: &BookExamRequest,
    ) -> RemoteResult<Booking> {
        self.call(credentials, "bookExam", request).await
    }

    async fn get_participant_overview(
        &self,
        credentials: &RemoteCredentials,
        request: &ParticipantOverviewRequest,
    ) -> RemoteResult<ParticipantOverview> {
        self.call(credentials, "getParticipantOverview", request)
            .await
    }

    async fn create_participant(
        &self,
        credentials: &RemoteCredentials,
        request: &CreateParticipantRequest,
    ) -> RemoteResult<Participant> {
        self.call(credentials, "createParticipant", request).await
    }

    async fn check_participant(
        &self,
        credentials: &RemoteCredentials,
        participant_id: &str,
    ) -> RemoteResult<Participant> {
        let request = CheckParticipantRequest {
            participant_id: participant_id.to_string(),
        };
        self.call(credentials, "checkParticipant", &request).await
    }

    async fn get_examination_access_url(
        &self,
        credentials: &RemoteCredentials,
        request: &ExaminationAccessRequest,
    ) -> RemoteResult<AccessUrl> {
        self.call(credentials, "getExaminationAccessUrl", request)
            .await
    }
}
