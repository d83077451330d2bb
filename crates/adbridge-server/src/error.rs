use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use adbridge_core::{CommandError, MemoryError, RawCommandError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} is required")]
    MissingField(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    ForbiddenCommand(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    CommandFailed(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) | ApiError::BadRequest(_) | ApiError::ForbiddenCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CommandFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::MissingField(_) => "missing_field",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::ForbiddenCommand(_) => "forbidden_command",
            ApiError::NotFound(_) => "not_found",
            ApiError::CommandFailed(_) => "command_failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "message": self.to_string(),
                "type": self.error_type()
            }
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<CommandError> for ApiError {
    fn from(error: CommandError) -> Self {
        ApiError::CommandFailed(error.to_string())
    }
}

impl From<MemoryError> for ApiError {
    fn from(error: MemoryError) -> Self {
        match error {
            MemoryError::MissingField(field) => ApiError::MissingField(field.to_string()),
        }
    }
}

impl From<RawCommandError> for ApiError {
    fn from(error: RawCommandError) -> Self {
        match error {
            RawCommandError::Empty => ApiError::MissingField("command".to_string()),
            RawCommandError::NotAdb => {
                ApiError::ForbiddenCommand(RawCommandError::NotAdb.to_string())
            }
            RawCommandError::Parse(message) => ApiError::BadRequest(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
