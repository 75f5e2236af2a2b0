use anyhow::Result;
use std::sync::Arc;

use cortex::core::automation::Automation;
use cortex::core::config::{load_config, STARTER_CONFIG};
use cortex::core::history::open_db;
use cortex::core::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::var("PRESSLOOP_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

    // Create a starter config on first run
    if !std::path::Path::new(&config_path).exists() {
        std::fs::write(&config_path, STARTER_CONFIG.trim_start())?;
        log::info!("Wrote starter config to {}", config_path);
    }

    let config = load_config(&config_path)?;
    let db = open_db(&config.storage.data_dir)?;
    let pipeline = Arc::new(Pipeline::from_config(&config));
    let automation = Arc::new(Automation::new(pipeline, &db)?);

    log::info!(
        "Starting PressLoop worker ({} post(s) per day)",
        config.automation.posts_per_day
    );
    automation.start(None).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    automation.stop().await;
    db.flush_async().await?;

    Ok(())
}
