use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use agora_chat::ChatError;

/// A `ChatError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Upload(_) => StatusCode::BAD_GATEWAY,
            ChatError::Store(_) | ChatError::IncompleteCleanup { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {:#}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn statuses() {
        let cases = [
            (ChatError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ChatError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ChatError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ChatError::Upload(anyhow::anyhow!("disk")), StatusCode::BAD_GATEWAY),
            (ChatError::Store(anyhow::anyhow!("locked")), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ChatError::IncompleteCleanup {
                    chat_id: Uuid::nil(),
                    source: anyhow::anyhow!("fk"),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }
}
