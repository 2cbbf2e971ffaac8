// src/app.rs

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, patch, post},
};
use chrono::Duration;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::authenticator::{Authenticator, LockoutPolicy};
use crate::auth::gateway::GatewayVerifier;
use crate::auth::jwt::JwtManager;
use crate::auth::password::PasswordManager;
use crate::config::Config;
use crate::db::repositories::user_repository::UserRepository;
use crate::handlers::auth::{login, oauth_callback, signup};
use crate::handlers::health::health;
use crate::handlers::user::{
    avatar, get_current_user, get_user_by_id, search_users, update_profile, update_settings,
};
use crate::services::avatar::{AttachmentStore, UrlAttachmentStore};
use crate::services::profile::ProfileService;
use crate::services::provisioning::IdentityService;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub identity: Arc<IdentityService>,
    pub profiles: Arc<ProfileService>,
    /// Unset disables provider callbacks
    pub gateway: Option<Arc<GatewayVerifier>>,
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserRepository>,
        passwords: PasswordManager,
        jwt: JwtManager,
        lockout: LockoutPolicy,
        attachments: Arc<dyn AttachmentStore>,
        gateway: Option<GatewayVerifier>,
    ) -> Self {
        let authenticator = Arc::new(Authenticator::new(users.clone(), passwords, jwt, lockout));
        let identity = Arc::new(IdentityService::new(users.clone(), passwords));
        let profiles = Arc::new(ProfileService::new(
            users,
            authenticator.clone(),
            attachments,
        ));

        Self {
            authenticator,
            identity,
            profiles,
            gateway: gateway.map(Arc::new),
        }
    }

    pub fn from_config(users: Arc<dyn UserRepository>, config: &Config) -> Self {
        Self::new(
            users,
            PasswordManager::new(config.bcrypt_cost),
            JwtManager::new(
                &config.jwt_secret,
                config.jwt_expiration_hours,
                config.remember_for_days,
            ),
            LockoutPolicy {
                max_failed_attempts: config.max_failed_attempts,
                unlock_in: Duration::minutes(config.unlock_in_minutes),
            },
            Arc::new(UrlAttachmentStore::new(config.attachment_base_url.clone())),
            config
                .oauth_gateway_secret
                .as_deref()
                .map(GatewayVerifier::new),
        )
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/oauth/{provider}/callback", post(oauth_callback))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(search_users))
        .route("/users/me", get(get_current_user))
        .route("/users/{id}", get(get_user_by_id).patch(update_profile))
        .route("/users/{id}/settings", patch(update_settings))
        .route("/users/{id}/avatar", get(avatar))
}

/// Only the frontend origin may call the API from a browser
pub fn cors_layer(frontend_url: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(frontend_url)
        .with_context(|| format!("FRONTEND_URL is not a valid origin: {frontend_url}"))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// Builds the complete application
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_routes())
        .merge(user_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
