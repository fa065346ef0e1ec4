use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::services::JwtKeys;
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo_types::User;

/// Validates the bearer JWT and loads the user it names.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::Unauthorized("invalid auth scheme".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(token).map_err(|e| {
            warn!(error = %e, "rejected token");
            AppError::Unauthorized("invalid or expired token".into())
        })?;

        let user = state
            .store
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("user not found".into()))?;
        Ok(CurrentUser(user))
    }
}
