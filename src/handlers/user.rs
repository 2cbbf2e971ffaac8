use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use identity_service_api::{
    AvatarQuery, AvatarResponse, SearchQuery, SettingsResponse, UpdateProfileRequest,
    UpdateSettingsRequest, UserListResponse, UserResponse,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::extractors::AuthClaims;
use crate::error::AppError;
use crate::handlers::auth::no_store;
use crate::response::AppResponse;
use crate::services::profile::SEARCH_RESULT_LIMIT;

/// GET /users?query=
pub async fn search_users(
    _claims: AuthClaims,
    State(state): State<AppState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<AppResponse<UserListResponse>, AppError> {
    let Query(query) = query?;

    let users = state.profiles.search(query.query.as_deref())?;

    Ok(AppResponse::ok(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
        limit: usize::try_from(SEARCH_RESULT_LIMIT).unwrap_or_default(),
    }))
}

/// GET /users/me
pub async fn get_current_user(
    claims: AuthClaims,
    State(state): State<AppState>,
) -> Result<AppResponse<UserResponse>, AppError> {
    let user = state.profiles.find(claims.sub)?;
    Ok(AppResponse::ok(user.into()))
}

/// GET /users/{id}
pub async fn get_user_by_id(
    _claims: AuthClaims,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<AppResponse<UserResponse>, AppError> {
    let user = state.profiles.find(user_id)?;
    Ok(AppResponse::ok(user.into()))
}

/// PATCH /users/{id}
pub async fn update_profile(
    claims: AuthClaims,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<AppResponse<UserResponse>, AppError> {
    let Json(payload) = payload?;

    let user = state.profiles.update_profile(claims.sub, user_id, payload)?;
    Ok(AppResponse::ok(user.into()))
}

/// PATCH /users/{id}/settings
/// A changed password comes back with the caller's replacement token
pub async fn update_settings(
    claims: AuthClaims,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> Result<AppResponse<SettingsResponse>, AppError> {
    let Json(payload) = payload?;

    let outcome = state.profiles.update_settings(&claims, user_id, payload)?;
    let (access_token, expires_in) = match outcome.session {
        Some(session) => (Some(session.access_token), Some(session.expires_in)),
        None => (None, None),
    };

    let response = AppResponse::ok(SettingsResponse {
        user: outcome.user.into(),
        access_token,
        expires_in,
    });
    Ok(response.with_headers(no_store()))
}

/// GET /users/{id}/avatar?size=
pub async fn avatar(
    _claims: AuthClaims,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    query: Result<Query<AvatarQuery>, QueryRejection>,
) -> Result<AppResponse<AvatarResponse>, AppError> {
    let Query(query) = query?;

    let url = state
        .profiles
        .avatar_thumbnail(user_id, query.size.as_deref())?;
    Ok(AppResponse::ok(AvatarResponse { url }))
}
