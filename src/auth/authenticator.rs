use std::sync::Arc;

use chrono::{Duration, Utc};
use identity_service_api::LoginRequest;
use uuid::Uuid;

use crate::auth::extractors::AuthClaims;
use crate::auth::jwt::{IssuedToken, JwtManager};
use crate::auth::password::PasswordManager;
use crate::db::models::user::{UpdateUser, User};
use crate::db::repositories::user_repository::UserRepository;
use crate::error::AppError;
use crate::services::validation::normalize_email;

pub const DEFAULT_MAX_FAILED_ATTEMPTS: i32 = 5;
pub const DEFAULT_UNLOCK_IN_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: i32,
    pub unlock_in: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            unlock_in: Duration::minutes(DEFAULT_UNLOCK_IN_MINUTES),
        }
    }
}

/// Credential checks, lockout bookkeeping and session issuance
pub struct Authenticator {
    users: Arc<dyn UserRepository>,
    passwords: PasswordManager,
    jwt: JwtManager,
    lockout: LockoutPolicy,
}

impl Authenticator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        passwords: PasswordManager,
        jwt: JwtManager,
        lockout: LockoutPolicy,
    ) -> Self {
        Self {
            users,
            passwords,
            jwt,
            lockout,
        }
    }

    pub fn passwords(&self) -> PasswordManager {
        self.passwords
    }

    /// Email + password sign-in with failed-attempt lockout
    pub fn login(&self, request: &LoginRequest) -> Result<(User, IssuedToken), AppError> {
        let email = normalize_email(&request.email);
        let Some(mut user) = self.users.find_by_email(&email)? else {
            tracing::debug!("Sign-in attempt for unknown email");
            return Err(AppError::AuthenticationFailed);
        };

        let now = Utc::now();
        if user.is_locked(now, self.lockout.unlock_in) {
            tracing::warn!(user_id = %user.id, "Sign-in attempt on locked account");
            return Err(AppError::AccountLocked);
        }
        if user.locked_at.is_some() {
            user = self.users.update(
                user.id,
                &UpdateUser {
                    failed_attempts: Some(0),
                    locked_at: Some(None),
                    ..Default::default()
                },
            )?;
            tracing::info!(user_id = %user.id, "Lock expired, account unlocked");
        }

        if !self.passwords.verify(&request.password, &user.password_hash)? {
            let attempts = self.users.increment_failed_attempts(user.id)?;
            if attempts >= self.lockout.max_failed_attempts {
                self.users.update(
                    user.id,
                    &UpdateUser {
                        locked_at: Some(Some(now)),
                        ..Default::default()
                    },
                )?;
                tracing::warn!(user_id = %user.id, attempts, "Account locked after failed attempts");
                return Err(AppError::AccountLocked);
            }
            return Err(AppError::AuthenticationFailed);
        }

        let user = self.users.record_sign_in(user.id, now)?;
        let session = self.issue_session(&user, request.remember_me)?;
        tracing::info!(user_id = %user.id, "User signed in");
        Ok((user, session))
    }

    /// Re-authentication step; never reveals what was wrong
    pub fn verify_current_password(&self, user: &User, password: &str) -> Result<(), AppError> {
        if password.is_empty() || !self.passwords.verify(password, &user.password_hash)? {
            return Err(AppError::AuthenticationFailed);
        }
        Ok(())
    }

    pub fn issue_session(&self, user: &User, remember: bool) -> Result<IssuedToken, AppError> {
        self.jwt
            .issue(user.id, user.session_version, remember)
            .map_err(AppError::from)
    }

    /// Resolves a bearer token to its caller; stale `session_version` means the
    /// session was revoked by a password change
    pub fn resolve_session(&self, token: &str) -> Result<AuthClaims, AppError> {
        let claims = self.jwt.verify_token(token)?;

        let user = self
            .users
            .find_by_id(claims.sub)?
            .ok_or_else(|| AppError::unauthorized("Invalid token"))?;
        if user.session_version != claims.ver {
            return Err(AppError::unauthorized("Session expired"));
        }

        Ok(AuthClaims::from(claims))
    }

    pub fn find_user(&self, id: Uuid) -> Result<User, AppError> {
        self.users
            .find_by_id(id)?
            .ok_or_else(|| AppError::not_found("User not found"))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::models::user::NewUser;
    use crate::db::repositories::memory::InMemoryUserRepository;

    pub const PASSWORD: &str = "Secret123!";

    pub fn authenticator(users: Arc<dyn UserRepository>) -> Authenticator {
        Authenticator::new(
            users,
            PasswordManager::new(4),
            JwtManager::new("test_secret_for_authenticator", 1, 14),
            LockoutPolicy::default(),
        )
    }

    pub fn seeded() -> (Arc<InMemoryUserRepository>, User) {
        let repo = Arc::new(InMemoryUserRepository::new());
        let user = repo
            .create(&NewUser {
                id: Uuid::new_v4(),
                email: "jane@example.com".to_string(),
                username: "jane".to_string(),
                first_name: "Jane".to_string(),
                last_name: "Doe".to_string(),
                avatar_url: None,
                password_hash: PasswordManager::new(4).hash(PASSWORD).unwrap(),
                provider: None,
                uid: None,
            })
            .unwrap();
        (repo, user)
    }
}
