use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Json,
};
use cortex::core::error::PipelineError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

const MAX_COUNT: usize = 50;

#[derive(Deserialize)]
pub struct TrendingQuery {
    /// Comma separated, e.g. `news,rss`.
    pub sources: Option<String>,
    pub count: Option<usize>,
}

pub async fn trending_topics(
    State(state): State<AppState>,
    query: Result<Query<TrendingQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let count = query.count.unwrap_or(5);
    if count == 0 || count > MAX_COUNT {
        return Err(PipelineError::validation(format!("count must be within 1..={}", MAX_COUNT)).into());
    }
    let sources: Option<Vec<String>> = query.sources.map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    });

    let trends = state
        .automation
        .pipeline()
        .trending(sources.as_deref(), count)
        .await?;
    Ok(Json(json!({ "trends": trends })))
}
