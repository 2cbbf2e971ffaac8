use crate::db::schema::users;
use chrono::{DateTime, Duration, Utc};
use diesel::{AsChangeset, Insertable, Queryable, Selectable};
use identity_service_api::UserResponse;
use uuid::Uuid;

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub password_hash: String,
    pub provider: Option<String>,
    pub uid: Option<String>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub avatar_url: Option<String>,
    pub password_hash: String,
    pub failed_attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub session_version: i32,
    pub sign_in_count: i32,
    pub current_sign_in_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub provider: Option<String>,
    pub uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// A lock older than `unlock_in` has expired and no longer blocks sign-in
    pub fn is_locked(&self, now: DateTime<Utc>, unlock_in: Duration) -> bool {
        self.locked_at
            .is_some_and(|locked_at| locked_at + unlock_in > now)
    }

    /// Successful sign-in at `at`: the previous sign-in moves to `last_sign_in_at`
    /// and the failed-attempt counter starts over
    pub fn record_sign_in(&mut self, at: DateTime<Utc>) {
        self.last_sign_in_at = self.current_sign_in_at.or(Some(at));
        self.current_sign_in_at = Some(at);
        self.sign_in_count += 1;
        self.failed_attempts = 0;
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let full_name = user.full_name();
        UserResponse {
            id: user.id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            full_name,
            avatar: user.avatar,
            avatar_url: user.avatar_url,
            provider: user.provider,
            created_at: user.created_at,
        }
    }
}

/// Column changes for an existing user. `None` leaves the column untouched.
#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = users)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<Option<String>>,
    pub password_hash: Option<String>,
    pub failed_attempts: Option<i32>,
    pub locked_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UpdateUser {
    /// Applies the changes to an in-memory copy of the record
    pub fn apply_to(&self, user: &mut User) {
        if let Some(email) = &self.email {
            user.email.clone_from(email);
        }
        if let Some(username) = &self.username {
            user.username.clone_from(username);
        }
        if let Some(first_name) = &self.first_name {
            user.first_name.clone_from(first_name);
        }
        if let Some(last_name) = &self.last_name {
            user.last_name.clone_from(last_name);
        }
        if let Some(avatar) = &self.avatar {
            user.avatar.clone_from(avatar);
        }
        if let Some(password_hash) = &self.password_hash {
            user.password_hash.clone_from(password_hash);
        }
        if let Some(failed_attempts) = self.failed_attempts {
            user.failed_attempts = failed_attempts;
        }
        if let Some(locked_at) = self.locked_at {
            user.locked_at = locked_at;
        }
        if let Some(updated_at) = self.updated_at {
            user.updated_at = updated_at;
        }
    }
}
