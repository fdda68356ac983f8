use crate::error::{Error, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use url::Url;

/// Upper bound for hour-valued settings, matching the per-exam validity range.
const MAX_HOURS: i64 = 720;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// One named set of API credentials for the remote exam service.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteCredentials {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl RemoteCredentials {
    /// A usable set has every field filled in and an http(s) API base URL.
    pub fn is_valid(&self) -> bool {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return false;
        }
        match Url::parse(&self.api_url) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub public_base_url: Url,
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub remote_credentials: HashMap<String, RemoteCredentials>,
    pub host_lms_url: String,
    pub host_lms_token: Option<String>,
    pub host_notify_url: Option<String>,
    pub results_view_url: Url,
    pub booking_validity_hours: i64,
    pub results_poll_interval_hours: i64,
    pub poller_cron: String,
    pub launch_token_ttl_seconds: i64,
    pub callback_rps: u32,
    pub integration_rps: u32,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let storage_backend = match vars.get_or("STORAGE_BACKEND", "postgres").as_str() {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(Error::Config(format!(
                    "Invalid value for STORAGE_BACKEND: {}",
                    other
                )))
            }
        };
        let database_url = vars.optional("DATABASE_URL");
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(Error::Config(
                "Missing environment variable: DATABASE_URL".to_string(),
            ));
        }

        let remote_credentials = match vars.optional("REMOTE_CREDENTIALS") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("Invalid value for REMOTE_CREDENTIALS: {}", e))
            })?,
            None => HashMap::new(),
        };

        let log_format = match vars.get_or("LOG_FORMAT", "text").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            server_address: vars.get("SERVER_ADDRESS")?,
            public_base_url: vars.parse("PUBLIC_BASE_URL")?,
            storage_backend,
            database_url,
            jwt_secret: vars.get("JWT_SECRET")?,
            remote_credentials,
            host_lms_url: vars.get("HOST_LMS_URL")?,
            host_lms_token: vars.optional("HOST_LMS_TOKEN"),
            host_notify_url: vars.optional("HOST_NOTIFY_URL"),
            results_view_url: vars.parse("RESULTS_VIEW_URL")?,
            booking_validity_hours: vars.hours_or("BOOKING_VALIDITY_HOURS", 24)?,
            results_poll_interval_hours: vars.hours_or("RESULTS_POLL_INTERVAL_HOURS", 12)?,
            poller_cron: vars.get_or("POLLER_CRON", "0 */10 * * * *"),
            launch_token_ttl_seconds: vars.parse_or("LAUNCH_TOKEN_TTL_SECONDS", 900)?,
            callback_rps: vars.parse_or("CALLBACK_RPS", 50)?,
            integration_rps: vars.parse_or("INTEGRATION_RPS", 100)?,
            log_format,
        })
    }

    pub fn credentials(&self, name: &str) -> Option<&RemoteCredentials> {
        self.remote_credentials.get(name)
    }

    /// Absolute URL for a path served by this service.
    pub fn public_url(&self, path: &str) -> Url {
        let mut url = self.public_base_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", base, path.trim_start_matches('/')));
        url
    }

    pub fn results_url(&self, exam_id: i64, attempt_id: &str) -> String {
        let mut url = self.results_view_url.clone();
        url.query_pairs_mut()
            .append_pair("exam_id", &exam_id.to_string())
            .append_pair("attempt_id", attempt_id);
        url.to_string()
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> Vars<'a, F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn get(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| Error::Config(format!("Missing environment variable: {}", name)))
    }

    fn get_or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &str) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(name)?;
        raw.parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(_) => self.parse(name),
            None => Ok(default),
        }
    }

    fn hours_or(&self, name: &str, default: i64) -> Result<i64> {
        let hours: i64 = self.parse_or(name, default)?;
        if !(1..=MAX_HOURS).contains(&hours) {
            return Err(Error::Config(format!(
                "Invalid value for {}: must be between 1 and {} hours",
                name, MAX_HOURS
            )));
        }
        Ok(hours)
    }
}
