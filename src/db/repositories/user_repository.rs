use crate::db::DbPool;
use crate::db::connection::get_connection;
use crate::db::error::RepositoryError;
use crate::db::models::user::{NewUser, UpdateUser, User};
use crate::db::schema::users;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text, Timestamptz};
use uuid::Uuid;

diesel::define_sql_function!(fn lower(x: Text) -> Text);
diesel::define_sql_function! {
    #[sql_name = "coalesce"]
    fn coalesce_timestamp(x: Nullable<Timestamptz>, y: Timestamptz) -> Nullable<Timestamptz>;
}

/// Storage contract for the `users` table.
///
/// Implementations must enforce case-insensitive uniqueness of `email` and
/// `username` and uniqueness of `(provider, uid)` atomically with the write,
/// reporting a violation as [`RepositoryError::UniqueViolation`].
pub trait UserRepository: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Case-insensitive lookup
    fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    fn find_by_provider_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, RepositoryError>;

    /// Case-insensitive; `except` excludes the user being edited
    fn username_exists(&self, username: &str, except: Option<Uuid>)
    -> Result<bool, RepositoryError>;

    /// Case-insensitive; `except` excludes the user being edited
    fn email_exists(&self, email: &str, except: Option<Uuid>) -> Result<bool, RepositoryError>;

    fn create(&self, new_user: &NewUser) -> Result<User, RepositoryError>;

    fn update(&self, id: Uuid, changes: &UpdateUser) -> Result<User, RepositoryError>;

    /// Atomically bumps the failed sign-in counter and returns the new value
    fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, RepositoryError>;

    /// Atomically bumps `session_version`, revoking every token issued before
    fn increment_session_version(&self, id: Uuid) -> Result<User, RepositoryError>;

    /// Sign-in tracking in one write: count, current/last timestamps, failed
    /// attempts reset
    fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, RepositoryError>;

    /// Newest first, at most `limit` rows
    fn search(&self, query: Option<&str>, limit: i64) -> Result<Vec<User>, RepositoryError>;
}

/// Escapes `LIKE` metacharacters so the query matches as a plain substring
pub fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl UserRepository for PgUserRepository {
    fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        users::table
            .find(id)
            .select(User::as_select())
            .first(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        users::table
            .filter(lower(users::email).eq(email.to_lowercase()))
            .select(User::as_select())
            .first(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    fn find_by_provider_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        users::table
            .filter(users::provider.eq(provider))
            .filter(users::uid.eq(uid))
            .select(User::as_select())
            .first(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    fn username_exists(
        &self,
        username: &str,
        except: Option<Uuid>,
    ) -> Result<bool, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = users::table
            .select(users::id)
            .filter(lower(users::username).eq(username.to_lowercase()))
            .into_boxed();
        if let Some(id) = except {
            query = query.filter(users::id.ne(id));
        }

        Ok(query.first::<Uuid>(&mut conn).optional()?.is_some())
    }

    fn email_exists(&self, email: &str, except: Option<Uuid>) -> Result<bool, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = users::table
            .select(users::id)
            .filter(lower(users::email).eq(email.to_lowercase()))
            .into_boxed();
        if let Some(id) = except {
            query = query.filter(users::id.ne(id));
        }

        Ok(query.first::<Uuid>(&mut conn).optional()?.is_some())
    }

    fn create(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        diesel::insert_into(users::table)
            .values(new_user)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .map_err(Into::into)
    }

    fn update(&self, id: Uuid, changes: &UpdateUser) -> Result<User, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        let mut changes = changes.clone();
        changes.updated_at.get_or_insert_with(Utc::now);

        diesel::update(users::table.find(id))
            .set(&changes)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .map_err(Into::into)
    }

    fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        diesel::update(users::table.find(id))
            .set(users::failed_attempts.eq(users::failed_attempts + 1))
            .returning(users::failed_attempts)
            .get_result(&mut conn)
            .map_err(Into::into)
    }

    fn increment_session_version(&self, id: Uuid) -> Result<User, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        diesel::update(users::table.find(id))
            .set((
                users::session_version.eq(users::session_version + 1),
                users::updated_at.eq(Utc::now()),
            ))
            .returning(User::as_returning())
            .get_result(&mut conn)
            .map_err(Into::into)
    }

    fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        // Right-hand sides read the row as it was before the update.
        diesel::update(users::table.find(id))
            .set((
                users::sign_in_count.eq(users::sign_in_count + 1),
                users::last_sign_in_at.eq(coalesce_timestamp(users::current_sign_in_at, at)),
                users::current_sign_in_at.eq(Some(at)),
                users::failed_attempts.eq(0),
            ))
            .returning(User::as_returning())
            .get_result(&mut conn)
            .map_err(Into::into)
    }

    fn search(&self, query: Option<&str>, limit: i64) -> Result<Vec<User>, RepositoryError> {
        let mut conn = get_connection(&self.pool)?;

        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(q)));

        let mut statement = users::table.select(User::as_select()).into_boxed();
        if let Some(pattern) = &pattern {
            statement = statement.filter(
                users::first_name
                    .ilike(pattern)
                    .or(users::last_name.ilike(pattern))
                    .or(users::username.ilike(pattern))
                    .or(users::email.ilike(pattern)),
            );
        }

        statement
            .order((users::created_at.desc(), users::id.desc()))
            .limit(limit)
            .load(&mut conn)
            .map_err(Into::into)
    }
}
