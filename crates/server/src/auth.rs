use axum::{
    http::{header, HeaderMap, StatusCode},
    Json,
};
use server_api::{get_user_by_external_id, session::verify_session_token};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::UserProfile,
};

use crate::{app_state::AppState, reject};

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves the bearer token to a stored user; a valid token for an
/// unsynced identity is still unauthorized.
pub(crate) async fn current_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<UserProfile, (StatusCode, Json<ApiError>)> {
    let token = bearer_token(headers).ok_or_else(|| {
        reject(ApiError::new(
            ErrorCode::Unauthorized,
            "missing bearer token",
        ))
    })?;
    let external_id = verify_session_token(&state.auth, token).map_err(|e| {
        reject(ApiError::new(
            ErrorCode::Unauthorized,
            format!("invalid session token: {e}"),
        ))
    })?;
    get_user_by_external_id(&state.api, &external_id)
        .await
        .map_err(|e| match e.code {
            ErrorCode::NotFound => reject(ApiError::new(
                ErrorCode::Unauthorized,
                "no user for this identity",
            )),
            _ => reject(e),
        })
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
