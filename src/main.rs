use std::sync::Arc;

use log::{error, info, warn};

use questd::{build_scheduler, config, AppConfig, FileStore, LogSink};

#[tokio::main]
async fn main() {
    let _ = env_logger::builder().is_test(false).try_init();

    let defaults = AppConfig::default();
    let config_path = config::config_path(&defaults.resolved_data_dir());
    let cfg = match config::load_config(&config_path).await {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load persisted config, using defaults: {err}");
            AppConfig::default()
        }
    };

    let store = Arc::new(FileStore::new(cfg.resolved_data_dir().join("state")));
    let scheduler = match build_scheduler(&cfg, store, Arc::new(LogSink)) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!("failed to initialize engine: {err}");
            std::process::exit(1);
        }
    };

    scheduler.start().await;
    info!("questd running, press ctrl-c to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }

    scheduler.stop().await;
    info!("questd exited");
}
