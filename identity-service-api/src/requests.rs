use serde::{Deserialize, Serialize};

// -------- REQUEST DTOs --------
// Each operation accepts an explicit allow-list of fields; anything else is rejected.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub email: String,
    pub password: String, // Plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_confirmation: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String, // Plain text
    #[serde(default)]
    pub remember_me: bool,
}

/// Profile claims returned by the identity provider after the OAuth handshake
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FederatedProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FederatedLoginRequest {
    pub uid: String,
    #[serde(default)]
    pub info: FederatedProfile,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Attachment reference; an empty string detaches the current avatar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettingsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_confirmation: Option<String>,
    pub current_password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AvatarQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_update_rejects_fields_outside_the_allow_list() {
        let result = serde_json::from_str::<UpdateProfileRequest>(
            r#"{"first_name":"Jane","email":"jane@example.com"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn settings_update_requires_current_password() {
        let result = serde_json::from_str::<UpdateSettingsRequest>(r#"{"email":"a@b.c"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn federated_request_defaults_missing_info() {
        let request: FederatedLoginRequest = serde_json::from_str(r#"{"uid":"123"}"#).unwrap();
        assert_eq!(request.uid, "123");
        assert!(request.info.email.is_none());
    }
}
