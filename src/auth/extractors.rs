use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::app::AppState;
use crate::auth::jwt::Claims;
use crate::error::AppError;

/// Authenticated caller of a protected route.
/// Validates `Authorization: Bearer <JWT>` and checks that the session has not
/// been revoked since it was issued.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub sub: uuid::Uuid,
    /// Whether the caller signed in with "remember me"
    pub remember: bool,
}

impl From<Claims> for AuthClaims {
    fn from(c: Claims) -> Self {
        Self {
            sub: c.sub,
            remember: c.rem,
        }
    }
}

impl FromRequestParts<AppState> for AuthClaims {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::InvalidTokenFormat)?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::InvalidTokenFormat)?;

        const BEARER: &str = "Bearer ";
        let token = auth_str
            .strip_prefix(BEARER)
            .ok_or(AppError::InvalidTokenFormat)?;

        state.authenticator.resolve_session(token)
    }
}
