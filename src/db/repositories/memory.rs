use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::error::{RepositoryError, UniqueConstraint};
use crate::db::models::user::{NewUser, UpdateUser, User};
use crate::db::repositories::user_repository::UserRepository;

/// Process-local user table.
///
/// Every write holds the table lock across the uniqueness check and the
/// mutation, which gives the same guarantees as the PostgreSQL unique indexes.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, Vec<User>>, RepositoryError> {
        self.users
            .lock()
            .map_err(|_| RepositoryError::PoolError("user table lock poisoned".to_string()))
    }

    fn row(table: &mut [User], id: Uuid) -> Result<&mut User, RepositoryError> {
        table
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| RepositoryError::NotFound("Record not found".to_string()))
    }

    fn conflict(table: &[User], candidate: &User) -> Option<UniqueConstraint> {
        let others = || table.iter().filter(|u| u.id != candidate.id);

        if others().any(|u| u.email.eq_ignore_ascii_case(&candidate.email)) {
            return Some(UniqueConstraint::Email);
        }
        if others().any(|u| u.username.eq_ignore_ascii_case(&candidate.username)) {
            return Some(UniqueConstraint::Username);
        }
        if candidate.provider.is_some()
            && candidate.uid.is_some()
            && others().any(|u| u.provider == candidate.provider && u.uid == candidate.uid)
        {
            return Some(UniqueConstraint::ProviderUid);
        }
        None
    }
}

fn matches_query(user: &User, needle: &str) -> bool {
    [&user.first_name, &user.last_name, &user.username, &user.email]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

impl UserRepository for InMemoryUserRepository {
    fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.table()?.iter().find(|u| u.id == id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .table()?
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn find_by_provider_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .table()?
            .iter()
            .find(|u| u.provider.as_deref() == Some(provider) && u.uid.as_deref() == Some(uid))
            .cloned())
    }

    fn username_exists(
        &self,
        username: &str,
        except: Option<Uuid>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .table()?
            .iter()
            .any(|u| Some(u.id) != except && u.username.eq_ignore_ascii_case(username)))
    }

    fn email_exists(&self, email: &str, except: Option<Uuid>) -> Result<bool, RepositoryError> {
        Ok(self
            .table()?
            .iter()
            .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email)))
    }

    fn create(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
        let mut table = self.table()?;

        let now = Utc::now();
        let user = User {
            id: new_user.id,
            email: new_user.email.clone(),
            username: new_user.username.clone(),
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            avatar: None,
            avatar_url: new_user.avatar_url.clone(),
            password_hash: new_user.password_hash.clone(),
            failed_attempts: 0,
            locked_at: None,
            session_version: 0,
            sign_in_count: 0,
            current_sign_in_at: None,
            last_sign_in_at: None,
            provider: new_user.provider.clone(),
            uid: new_user.uid.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Some(constraint) = Self::conflict(&table, &user) {
            return Err(RepositoryError::UniqueViolation(constraint));
        }

        table.push(user.clone());
        Ok(user)
    }

    fn update(&self, id: Uuid, changes: &UpdateUser) -> Result<User, RepositoryError> {
        let mut table = self.table()?;

        let index = table
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| RepositoryError::NotFound("Record not found".to_string()))?;

        let mut updated = table[index].clone();
        changes.apply_to(&mut updated);
        if changes.updated_at.is_none() {
            updated.updated_at = Utc::now();
        }

        if let Some(constraint) = Self::conflict(&table, &updated) {
            return Err(RepositoryError::UniqueViolation(constraint));
        }

        table[index] = updated.clone();
        Ok(updated)
    }

    fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, RepositoryError> {
        let mut table = self.table()?;

        let user = Self::row(&mut table, id)?;
        user.failed_attempts += 1;
        Ok(user.failed_attempts)
    }

    fn increment_session_version(&self, id: Uuid) -> Result<User, RepositoryError> {
        let mut table = self.table()?;

        let user = Self::row(&mut table, id)?;
        user.session_version += 1;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, RepositoryError> {
        let mut table = self.table()?;

        let user = Self::row(&mut table, id)?;
        user.record_sign_in(at);
        Ok(user.clone())
    }

    fn search(&self, query: Option<&str>, limit: i64) -> Result<Vec<User>, RepositoryError> {
        let table = self.table()?;

        let needle = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);

        // Later inserts first so equal timestamps still come out newest-first.
        let mut found: Vec<User> = table
            .iter()
            .rev()
            .filter(|u| needle.as_deref().is_none_or(|n| matches_query(u, n)))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(found)
    }
}
