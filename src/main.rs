use std::net::SocketAddr;
use std::sync::Arc;

use exam_booking_backend::{
    config::{Config, LogFormat},
    routes, AppState, Backends,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);
    init_tracing(config.log_format);

    if config.remote_credentials.is_empty() {
        tracing::warn!("REMOTE_CREDENTIALS is empty, no exam can be booked");
    }

    let backends = Backends::connect(&config).await?;
    let app_state = AppState::new(config.clone(), backends);

    // Dropping the scheduler handle stops polling.
    let _poller = app_state
        .poller
        .clone()
        .start(&config.poller_cron)
        .await?;

    let app = routes::router(app_state);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
