use axum::{extract::State, response::Json};
use cortex::core::analytics::{summarize, AnalyticsSummary};

use crate::error::ApiResult;
use crate::AppState;

pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<AnalyticsSummary>> {
    let entries = state.automation.run_log().all()?;
    Ok(Json(summarize(&entries)))
}
