use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cortex::core::automation::Automation;
use cortex::core::config::load_config;
use cortex::core::history::open_db;
use cortex::core::pipeline::Pipeline;
use nexus::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "nexus=debug,cortex=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("PRESSLOOP_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path)?;
    let db = open_db(&config.storage.data_dir)?;
    let automation = Arc::new(Automation::new(Arc::new(Pipeline::from_config(&config)), &db)?);

    let admin_key = std::env::var("PRESSLOOP_KEY").ok().filter(|k| !k.is_empty());
    if admin_key.is_none() {
        tracing::warn!("PRESSLOOP_KEY is not set; automation and config routes are unprotected");
    }

    let app = build_router(AppState {
        automation: automation.clone(),
        admin_key,
    });

    let port = std::env::var("PORT").unwrap_or_else(|_| "8899".to_string()).parse::<u16>().unwrap_or(8899);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    automation.stop().await;
    db.flush_async().await?;
    Ok(())
}
