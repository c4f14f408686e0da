pub mod api_client;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod policy;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod token;

use std::sync::Arc;

pub use api_client::ApiClient;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use events::{Event, EventSink, LogSink};
pub use runner::AccountRunner;
pub use scheduler::{ScheduleConfig, Scheduler};
pub use store::{FileStore, MemoryStore, StateStore};
pub use token::TokenManager;

/// Wires the engine together from a validated config, a store, and an event
/// sink. The returned scheduler is the single entry point operator controls
/// call: start / stop / is_running / run_account / complete_task.
pub fn build_scheduler(
    cfg: &AppConfig,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
) -> Result<Scheduler> {
    let api = ApiClient::new(cfg.base_url.clone(), cfg.request_timeout_secs)?;
    let tokens = TokenManager::new(
        api.clone(),
        store.clone(),
        cfg.refresh_max_attempts,
        cfg.refresh_backoff_secs,
    );
    let runner = AccountRunner::new(api, tokens, store, events.clone());
    Ok(Scheduler::new(runner, ScheduleConfig::from(cfg), events))
}
