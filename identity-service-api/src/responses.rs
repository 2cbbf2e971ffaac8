use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Issued after signup through a provider, login, or a password change
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SettingsResponse {
    pub user: UserResponse,
    /// Present only when the password changed: every other session is revoked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub limit: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AvatarResponse {
    pub url: String,
}
