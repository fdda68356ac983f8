pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};
use crate::repositories::memory::{
    InMemoryAttemptStore, InMemoryExamSettingsStore, InMemoryJobScheduler, InMemoryKeyValueCache,
};
use crate::repositories::{
    AttemptStore, ExamSettingsStore, JobScheduler, KeyValueCache, PgAttemptStore,
    PgExamSettingsStore, PgJobScheduler, PgKeyValueCache,
};
use crate::services::{
    access_guard::AccessGuard,
    callback_gateway::CallbackGateway,
    events::{EventBus, LoggingObserver},
    host_lms::{HostLms, HttpHostLms},
    lifecycle_service::LifecycleService,
    notification_service::HostProgressNotifier,
    remote_gateway::{HttpRemoteGateway, RemoteGateway},
    results_poller::ResultsPoller,
};
use crate::utils::time::{Clock, SystemClock};

/// Storage and collaborator handles shared by every component.
#[derive(Clone)]
pub struct Backends {
    pub attempts: Arc<dyn AttemptStore>,
    pub settings: Arc<dyn ExamSettingsStore>,
    pub cache: Arc<dyn KeyValueCache>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub remote: Arc<dyn RemoteGateway>,
    pub host: Arc<dyn HostLms>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Builds the production backends selected by `STORAGE_BACKEND`. The
    /// Postgres schema is migrated before the stores are handed out.
    pub async fn connect(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let remote: Arc<dyn RemoteGateway> = Arc::new(HttpRemoteGateway::new(http_client.clone()));
        let host: Arc<dyn HostLms> = Arc::new(HttpHostLms::new(
            http_client.clone(),
            &config.host_lms_url,
            config.host_lms_token.clone(),
        ));

        let mut events = EventBus::new().with_observer(Arc::new(LoggingObserver));
        if let Some(target) = &config.host_notify_url {
            events = events.with_observer(Arc::new(HostProgressNotifier::new(
                http_client,
                target.clone(),
                config.host_lms_token.clone(),
            )));
        }

        let backends = match config.storage_backend {
            StorageBackend::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    Error::Config("Missing environment variable: DATABASE_URL".to_string())
                })?;
                let pool = database::pool::create_pool(url).await?;
                database::run_migrations(&pool).await?;
                info!("using postgres storage");
                Self {
                    attempts: Arc::new(PgAttemptStore::new(pool.clone())),
                    settings: Arc::new(PgExamSettingsStore::new(pool.clone())),
                    cache: Arc::new(PgKeyValueCache::new(pool.clone())),
                    scheduler: Arc::new(PgJobScheduler::new(pool)),
                    remote,
                    host,
                    events,
                    clock: Arc::new(SystemClock),
                }
            }
            StorageBackend::Memory => {
                info!("using in-memory storage, state is lost on restart");
                Self::in_memory(remote, host, Arc::new(SystemClock)).with_events(events)
            }
        };
        Ok(backends)
    }

    /// Process-local storage around the given collaborators.
    pub fn in_memory(
        remote: Arc<dyn RemoteGateway>,
        host: Arc<dyn HostLms>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            attempts: Arc::new(InMemoryAttemptStore::new()),
            settings: Arc::new(InMemoryExamSettingsStore::new()),
            cache: Arc::new(InMemoryKeyValueCache::new()),
            scheduler: Arc::new(InMemoryJobScheduler::new()),
            remote,
            host,
            events: EventBus::new(),
            clock,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub access: Arc<AccessGuard>,
    pub lifecycle: Arc<LifecycleService>,
    pub callback_gateway: Arc<CallbackGateway>,
    pub poller: Arc<ResultsPoller>,
}

impl AppState {
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        let access = Arc::new(AccessGuard::new(
            backends.attempts.clone(),
            backends.host.clone(),
            backends.clock.clone(),
        ));
        let lifecycle = Arc::new(LifecycleService::new(
            config.clone(),
            &backends,
            access.clone(),
        ));
        let callback_gateway = Arc::new(CallbackGateway::new(
            config.clone(),
            backends.attempts.clone(),
            lifecycle.clone(),
        ));
        let poller = Arc::new(ResultsPoller::new(
            backends.scheduler.clone(),
            backends.cache.clone(),
            lifecycle.clone(),
            backends.clock.clone(),
        ));

        Self {
            config,
            backends,
            access,
            lifecycle,
            callback_gateway,
            poller,
        }
    }
}
