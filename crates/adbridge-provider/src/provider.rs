use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse};

#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error (status {status_code}): {message}")]
    ApiErrorWithStatus { message: String, status_code: u16 },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProviderError {
    /// Short hint printed by the shell when the local runtime is unreachable.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ProviderError::NetworkError(_) => {
                Some("Is the model server running and reachable at the configured base URL?")
            }
            ProviderError::AuthError(_) => Some("Check the API key for this provider."),
            ProviderError::ApiErrorWithStatus {
                status_code: 404, ..
            } => Some("The model may not be installed or the base URL may be wrong."),
            _ => None,
        }
    }
}
