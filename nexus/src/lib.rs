use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use cortex::core::automation::Automation;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod routes;

use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub automation: Arc<Automation>,
    /// When set, mutating automation and config routes require `X-PRESSLOOP-KEY`.
    pub admin_key: Option<String>,
}

impl AppState {
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.admin_key else {
            return Ok(());
        };
        let provided = headers.get("X-PRESSLOOP-KEY").and_then(|v| v.to_str().ok());
        if provided == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/trending-topics", get(routes::topics::trending_topics))
        .route("/api/generate-blog", post(routes::content::generate_blog))
        .route("/api/analyze-seo", post(routes::content::analyze_seo))
        .route("/api/generate-image", post(routes::content::generate_image))
        .route("/api/publish", post(routes::content::publish))
        .route("/api/automation/start", post(routes::automation::start))
        .route("/api/automation/stop", post(routes::automation::stop))
        .route("/api/automation/run-now", post(routes::automation::run_now))
        .route("/api/automation/status", get(routes::automation::status))
        .route(
            "/api/config",
            get(routes::settings::get_config).post(routes::settings::update_config),
        )
        .route("/api/analytics", get(routes::analytics::summary))
        .route("/api/add-affiliate-ads", post(routes::affiliate::add_affiliate_ads))
        .route("/api/affiliate-products", get(routes::affiliate::list_products))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
