use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Json,
};
use cortex::core::error::PipelineError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

#[derive(Deserialize)]
pub struct AddAdsRequest {
    pub content: String,
    #[serde(default = "default_max_ads")]
    pub max_affiliate_ads: usize,
    pub category: Option<String>,
}

fn default_max_ads() -> usize {
    2
}

#[derive(Deserialize)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub limit: Option<usize>,
}

pub async fn add_affiliate_ads(
    State(state): State<AppState>,
    payload: Result<Json<AddAdsRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    if req.content.trim().is_empty() {
        return Err(PipelineError::validation("content is required").into());
    }
    let (result, total) = state
        .automation
        .pipeline()
        .add_affiliate_ads(&req.content, req.max_affiliate_ads, req.category.as_deref())
        .await?;
    Ok(Json(json!({
        "content": result.content,
        "products_used": result.products_used,
        "total_products_available": total,
    })))
}

pub async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let (products, total) = state
        .automation
        .pipeline()
        .products(query.category.as_deref(), query.limit)
        .await?;
    Ok(Json(json!({ "products": products, "total": total })))
}
