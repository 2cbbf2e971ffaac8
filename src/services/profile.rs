// src/services/profile.rs

use std::sync::Arc;

use identity_service_api::{UpdateProfileRequest, UpdateSettingsRequest};
use uuid::Uuid;

use crate::auth::authenticator::Authenticator;
use crate::auth::extractors::AuthClaims;
use crate::auth::jwt::IssuedToken;
use crate::db::models::user::{UpdateUser, User};
use crate::db::repositories::user_repository::UserRepository;
use crate::error::AppError;
use crate::services::avatar::{self, AttachmentStore, DEFAULT_THUMBNAIL_SIZE, ThumbnailSize};
use crate::services::validation::{self, UserCandidate, is_blank, normalize_email};

pub const SEARCH_RESULT_LIMIT: i64 = 50;

/// Result of a settings change. `session` is set when the password changed
/// and the caller needs a replacement token.
#[derive(Debug)]
pub struct SettingsOutcome {
    pub user: User,
    pub session: Option<IssuedToken>,
}

/// Self-service edits of an existing account and user lookups
pub struct ProfileService {
    users: Arc<dyn UserRepository>,
    authenticator: Arc<Authenticator>,
    attachments: Arc<dyn AttachmentStore>,
}

impl ProfileService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        authenticator: Arc<Authenticator>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            users,
            authenticator,
            attachments,
        }
    }

    fn owned_target(&self, caller: Uuid, target: Uuid) -> Result<User, AppError> {
        if caller != target {
            return Err(AppError::forbidden("You can only modify your own account"));
        }
        self.authenticator.find_user(target)
    }

    /// Changes names, username and avatar of the caller's own record
    pub fn update_profile(
        &self,
        caller: Uuid,
        target: Uuid,
        request: UpdateProfileRequest,
    ) -> Result<User, AppError> {
        let user = self.owned_target(caller, target)?;

        let mut candidate = UserCandidate::from(&user);
        if let Some(first_name) = request.first_name {
            candidate.first_name = first_name;
        }
        if let Some(last_name) = request.last_name {
            candidate.last_name = last_name;
        }
        if let Some(username) = &request.username {
            candidate.username.clone_from(username);
        }
        if let Some(reference) = &request.avatar {
            candidate.avatar = Some(reference.clone()).filter(|r| !r.is_empty());
        }

        let mut violations = validation::candidate_violations(&candidate);
        if request.username.is_some() {
            violations.extend(validation::uniqueness_violations(
                self.users.as_ref(),
                None,
                Some(&candidate.username),
                Some(user.id),
            )?);
        }
        if !violations.is_empty() {
            return Err(AppError::Validation(violations));
        }

        let changes = UpdateUser {
            username: request.username.map(|_| candidate.username),
            first_name: Some(candidate.first_name),
            last_name: Some(candidate.last_name),
            avatar: request.avatar.map(|_| candidate.avatar),
            ..Default::default()
        };
        let updated = self.users.update(user.id, &changes)?;

        tracing::info!(user_id = %updated.id, "Profile updated");
        Ok(updated)
    }

    /// Changes email and/or password after re-checking the current password.
    /// A new password revokes every other session of the user.
    pub fn update_settings(
        &self,
        caller: &AuthClaims,
        target: Uuid,
        request: UpdateSettingsRequest,
    ) -> Result<SettingsOutcome, AppError> {
        let user = self.owned_target(caller.sub, target)?;

        if let Err(err) = self
            .authenticator
            .verify_current_password(&user, &request.current_password)
        {
            tracing::warn!(user_id = %user.id, "Settings change refused: current password mismatch");
            return Err(err);
        }

        let email = request
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| *e != user.email);
        let password = request.password.filter(|p| !is_blank(p));

        let mut candidate = UserCandidate::from(&user);
        if let Some(email) = &email {
            candidate.email.clone_from(email);
        }

        let mut violations = validation::candidate_violations(&candidate);
        if let Some(password) = &password {
            violations.extend(validation::password_violations(
                password,
                request.password_confirmation.as_deref(),
            ));
        }
        violations.extend(validation::uniqueness_violations(
            self.users.as_ref(),
            email.as_deref(),
            None,
            Some(user.id),
        )?);
        if !violations.is_empty() {
            return Err(AppError::Validation(violations));
        }

        let mut changes = UpdateUser {
            email,
            ..Default::default()
        };
        if let Some(password) = &password {
            changes.password_hash = Some(self.authenticator.passwords().hash(password)?);
        }

        let mut updated = self.users.update(user.id, &changes)?;

        let session = if password.is_some() {
            updated = self.users.increment_session_version(user.id)?;
            tracing::info!(user_id = %updated.id, "Password changed, other sessions revoked");
            Some(self.authenticator.issue_session(&updated, caller.remember)?)
        } else {
            None
        };

        tracing::info!(user_id = %updated.id, "Settings updated");
        Ok(SettingsOutcome {
            user: updated,
            session,
        })
    }

    /// Newest users matching `query` in any name field or email, at most 50
    pub fn search(&self, query: Option<&str>) -> Result<Vec<User>, AppError> {
        let users = self.users.search(query, SEARCH_RESULT_LIMIT)?;
        tracing::debug!(count = users.len(), "User search");
        Ok(users)
    }

    pub fn find(&self, id: Uuid) -> Result<User, AppError> {
        self.authenticator.find_user(id)
    }

    /// URL of the user's avatar at `size`, `100x100` when omitted
    pub fn avatar_thumbnail(&self, id: Uuid, size: Option<&str>) -> Result<String, AppError> {
        let size = match size.filter(|s| !is_blank(s)) {
            Some(raw) => raw.parse::<ThumbnailSize>()?,
            None => DEFAULT_THUMBNAIL_SIZE,
        };
        let user = self.authenticator.find_user(id)?;

        Ok(avatar::thumbnail_url(self.attachments.as_ref(), &user, size))
    }
}
