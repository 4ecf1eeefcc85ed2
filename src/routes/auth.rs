//! Bearer-token extractor for upload requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::auth::VerifiedUser;

/// Identity of the caller of `POST /upscale`.
///
/// When no verifier is configured every request is accepted anonymously
/// (`Uploader(None)`). Otherwise a valid `Authorization: Bearer <jwt>` header
/// is required.
#[derive(Debug, Clone)]
pub struct Uploader(pub Option<VerifiedUser>);

impl Uploader {
    pub fn user_id(&self) -> Option<String> {
        self.0.as_ref().map(|user| user.user_id.clone())
    }
}

impl FromRequestParts<AppState> for Uploader {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(verifier) = state.auth.as_ref() else {
            return Ok(Uploader(None));
        };

        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("Invalid Authorization format. Expected: Bearer <token>".into())
        })?;

        let user = verifier.verify(token).map_err(|e| {
            tracing::warn!(error = %e, "Rejected upload token");
            ApiError::Unauthorized("Invalid or expired token".into())
        })?;

        Ok(Uploader(Some(user)))
    }
}
