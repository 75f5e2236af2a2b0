use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::Json,
};
use cortex::core::pipeline::{RuntimeSettings, SettingsPatch};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

pub async fn get_config(State(state): State<AppState>) -> Json<RuntimeSettings> {
    Json(state.automation.pipeline().settings().await)
}

pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SettingsPatch>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    state.authorize(&headers)?;
    let Json(patch) = payload?;
    let config = state.automation.pipeline().apply_patch(&patch).await?;
    Ok(Json(json!({ "status": "updated", "config": config })))
}
