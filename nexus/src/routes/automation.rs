use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use cortex::core::automation::AutomationStatus;
use cortex::core::pipeline::AutomationPatch;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

/// Body is optional; when present it patches the automation config before starting.
pub async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    state.authorize(&headers)?;
    let patch: Option<AutomationPatch> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(serde_json::from_slice(&body)?)
    };

    let started = state.automation.start(patch.as_ref()).await?;
    let config = state.automation.pipeline().automation_config().await;
    Ok(Json(json!({
        "status": if started { "started" } else { "already_running" },
        "config": config,
    })))
}

pub async fn stop(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.authorize(&headers)?;
    let stopped = state.automation.stop().await;
    Ok(Json(json!({
        "status": if stopped { "stopped" } else { "not_running" },
    })))
}

pub async fn run_now(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    state.authorize(&headers)?;
    let result = state.automation.run_now().await?;
    Ok(Json(json!({ "result": result })))
}

pub async fn status(State(state): State<AppState>) -> ApiResult<Json<AutomationStatus>> {
    Ok(Json(state.automation.status().await?))
}
