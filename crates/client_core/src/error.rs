use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no signed-in user")]
    NotAuthenticated,
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err.code {
            ErrorCode::Unauthorized => Self::NotAuthenticated,
            ErrorCode::Forbidden => Self::Unauthorized(err.message),
            ErrorCode::NotFound => Self::NotFound(err.message),
            ErrorCode::Validation => Self::Validation(err.message),
            ErrorCode::InsufficientCredits | ErrorCode::Internal => Self::Backend(err.into()),
        }
    }
}
