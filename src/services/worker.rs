use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::AppState;

/// Start the periodic status and dispatch sweeps. Both stop once `shutdown`
/// flips to true.
pub fn spawn_sweeps(state: Arc<AppState>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let status_every = Duration::from_secs(state.config.scheduler.status_sweep_interval_secs.max(1));
    let dispatch_every = Duration::from_secs(state.config.scheduler.dispatch_interval_secs.max(1));

    tracing::info!(
        status_every_secs = status_every.as_secs(),
        dispatch_every_secs = dispatch_every.as_secs(),
        "background sweeps started"
    );

    vec![
        tokio::spawn(status_loop(state.clone(), status_every, shutdown.clone())),
        tokio::spawn(dispatch_loop(state, dispatch_every, shutdown)),
    ]
}

async fn status_loop(state: Arc<AppState>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        // SQLite work is blocking; keep it off the async workers.
        let engine = state.status_engine.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || engine.run_full_sweep()).await {
            tracing::error!(error = %e, "status sweep task panicked");
        }
    }
    tracing::info!("status sweep stopped");
}

async fn dispatch_loop(state: Arc<AppState>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = state.dispatcher.process_due_messages().await {
            tracing::error!(error = %e, "dispatch sweep failed");
        }
    }
    tracing::info!("dispatch sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::config::{AppConfig, SchedulerConfig};
    use crate::db;
    use crate::services::clock::ManualClock;
    use crate::services::messaging::MessagingProvider;
    use crate::services::templates::BuiltinTemplates;

    struct NoopSender;

    #[async_trait]
    impl MessagingProvider for NoopSender {
        async fn send_message(&self, _tenant_id: i64, _to: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweeps_stop_on_shutdown() {
        let config = AppConfig {
            port: 0,
            database_url: ":memory:".to_string(),
            admin_token: "t".to_string(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_phone_number: String::new(),
            scheduler: SchedulerConfig {
                dispatch_interval_secs: 1,
                status_sweep_interval_secs: 1,
                ..Default::default()
            },
        };
        let conn = db::init_db(":memory:").unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        let state = Arc::new(AppState::new(
            Arc::new(Mutex::new(conn)),
            config,
            clock,
            Arc::new(NoopSender),
            Arc::new(BuiltinTemplates::new()),
        ));

        let (tx, rx) = watch::channel(false);
        let handles = spawn_sweeps(state.clone(), rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }
        // The first tick fires immediately, so a status sweep ran.
        assert!(state.status_engine.last_result().is_some());
    }
}
