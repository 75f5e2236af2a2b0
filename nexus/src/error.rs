use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use cortex::core::error::PipelineError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Unauthorized,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Pipeline(e) => match e {
                PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
                PipelineError::AlreadyRunning => StatusCode::CONFLICT,
                PipelineError::ExternalApi { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Pipeline(PipelineError::validation(e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::Pipeline(PipelineError::validation(e.body_text()))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Pipeline(PipelineError::validation(e.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Unauthorized => "Invalid API Key".to_string(),
            Self::Pipeline(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!("{} {}", status, message);
        } else {
            tracing::debug!("{} {}", status, message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_pipeline_errors_to_status() {
        let cases = [
            (PipelineError::validation("bad"), StatusCode::BAD_REQUEST),
            (PipelineError::AlreadyRunning, StatusCode::CONFLICT),
            (PipelineError::external("blogger", "down"), StatusCode::BAD_GATEWAY),
            (
                PipelineError::Io(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
