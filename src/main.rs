use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use concierge::config::AppConfig;
use concierge::db;
use concierge::handlers;
use concierge::services::clock::SystemClock;
use concierge::services::messaging::twilio::TwilioSmsProvider;
use concierge::services::templates::BuiltinTemplates;
use concierge::services::worker;
use concierge::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.twilio_account_sid.is_empty() {
        tracing::warn!("TWILIO_ACCOUNT_SID is not set; due messages will fail to send");
    }
    let messaging = TwilioSmsProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    );

    let state = Arc::new(AppState::new(
        Arc::new(Mutex::new(conn)),
        config.clone(),
        Arc::new(SystemClock),
        Arc::new(messaging),
        Arc::new(BuiltinTemplates::new()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps = worker::spawn_sweeps(state.clone(), shutdown_rx);

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for sweep in sweeps {
        let _ = sweep.await;
    }

    Ok(())
}
