use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Db;
use crate::services::clock::Clock;
use crate::services::dispatcher::Dispatcher;
use crate::services::messaging::MessagingProvider;
use crate::services::scheduler::ProactiveScheduler;
use crate::services::status::BookingStatusEngine;
use crate::services::templates::TemplateRenderer;

pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub scheduler: ProactiveScheduler,
    pub status_engine: BookingStatusEngine,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        db: Db,
        config: AppConfig,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn MessagingProvider>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        let timezones = Arc::new(config.scheduler.timezones());
        let scheduler = ProactiveScheduler::new(
            db.clone(),
            clock.clone(),
            timezones.clone(),
            config.scheduler.grace_window(),
        );
        let status_engine =
            BookingStatusEngine::new(db.clone(), clock.clone(), timezones, scheduler.clone());
        let dispatcher = Dispatcher::new(
            db.clone(),
            clock,
            sender,
            renderer,
            config.scheduler.dispatch_config(),
        );

        Self {
            db,
            config,
            scheduler,
            status_engine,
            dispatcher,
        }
    }
}
