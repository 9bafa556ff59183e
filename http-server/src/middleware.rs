use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use ledger::types::UserId;

use crate::{AppState, error::AppError, models::AuthenticatedUser};

// Axum extractor for authenticated users
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

impl AuthUser {
    /// Rejects requests that address another user's resources
    pub fn ensure_owner(&self, user_id: UserId) -> Result<(), AppError> {
        if self.0.user_id != user_id {
            tracing::warn!(
                caller = self.0.user_id,
                target = user_id,
                "Rejected access to another user's games"
            );
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Extract the Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| {
                (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response()
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format",
            )
                .into_response()
        })?;

        match state.storage.get_user_by_session_id(token) {
            Some(user) => Ok(AuthUser(AuthenticatedUser::from(user))),
            None => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        }
    }
}
