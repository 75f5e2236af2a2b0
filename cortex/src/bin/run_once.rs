use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use cortex::core::automation::Automation;
use cortex::core::config::load_config;
use cortex::core::history::open_db;
use cortex::core::pipeline::Pipeline;

/// Runs a single automation cycle and prints the log entry.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    if !Path::new(&config_path).exists() {
        anyhow::bail!("Config file not found at {}", config_path);
    }

    let config = load_config(&config_path)?;
    let db = open_db(&config.storage.data_dir)?;
    let automation = Arc::new(Automation::new(Arc::new(Pipeline::from_config(&config)), &db)?);

    let entry = automation.run_now().await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    db.flush_async().await?;
    Ok(())
}
