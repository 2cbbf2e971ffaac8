// src/handlers/auth.rs

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, header},
};
use identity_service_api::{LoginRequest, SessionResponse, SignupRequest};

use crate::app::AppState;
use crate::auth::gateway::SignedCallback;
use crate::auth::jwt::IssuedToken;
use crate::db::models::user::User;
use crate::error::AppError;
use crate::response::AppResponse;

fn session_response(user: User, session: IssuedToken) -> SessionResponse {
    SessionResponse {
        access_token: session.access_token,
        expires_in: session.expires_in,
        user: user.into(),
    }
}

/// Token-bearing responses must not be cached
pub(crate) fn no_store() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}

/// POST /auth/signup
/// Registers a local account and signs it in
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<AppResponse<SessionResponse>, AppError> {
    let Json(payload) = payload?;

    let user = state.identity.create_local_user(payload)?;
    let session = state.authenticator.issue_session(&user, false)?;

    Ok(AppResponse::created(session_response(user, session)).with_headers(no_store()))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<AppResponse<SessionResponse>, AppError> {
    let Json(payload) = payload?;

    let (user, session) = state.authenticator.login(&payload)?;

    Ok(AppResponse::ok(session_response(user, session)).with_headers(no_store()))
}

/// POST /auth/oauth/{provider}/callback
/// Signs in through an identity provider, creating the account on first use
/// The body must be relayed and signed by the OAuth gateway
pub async fn oauth_callback(
    State(state): State<AppState>,
    SignedCallback { provider, payload }: SignedCallback,
) -> Result<AppResponse<SessionResponse>, AppError> {
    let user = state
        .identity
        .provision_from_federated_login(&provider, &payload.uid, &payload.info)?;
    let session = state.authenticator.issue_session(&user, false)?;

    Ok(AppResponse::ok(session_response(user, session)).with_headers(no_store()))
}
