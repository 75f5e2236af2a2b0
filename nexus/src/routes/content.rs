use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use cortex::core::blogger::PostDraft;
use cortex::core::error::PipelineError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

#[derive(Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct ContentRequest {
    pub content: String,
}

pub async fn generate_blog(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let content = state.automation.pipeline().generate(&req.prompt).await?;
    Ok(Json(json!({ "content": content })))
}

pub async fn analyze_seo(
    State(state): State<AppState>,
    payload: Result<Json<ContentRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    if req.content.trim().is_empty() {
        return Err(PipelineError::validation("content is required").into());
    }
    let report = state.automation.pipeline().analyze(&req.content).await;
    Ok(Json(json!({ "report": report })))
}

pub async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    if req.prompt.trim().is_empty() {
        return Err(PipelineError::validation("prompt is required").into());
    }
    let image = state.automation.pipeline().image(&req.prompt).await;
    Ok(Json(json!({ "image": image })))
}

pub async fn publish(
    State(state): State<AppState>,
    payload: Result<Json<PostDraft>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(draft) = payload?;
    let result = state.automation.pipeline().publish(&draft).await?;
    tracing::info!("Published '{}' via API", result.title);
    Ok(Json(json!({ "result": result })))
}
