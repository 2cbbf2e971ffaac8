use std::fmt;

pub const EMAIL_UNIQUE_INDEX: &str = "index_users_on_lower_email";
pub const USERNAME_UNIQUE_INDEX: &str = "index_users_on_lower_username";
pub const PROVIDER_UID_UNIQUE_INDEX: &str = "index_users_on_provider_and_uid";

/// Which uniqueness rule an insert or update ran into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueConstraint {
    Email,
    Username,
    ProviderUid,
    Other(String),
}

impl UniqueConstraint {
    pub fn from_constraint_name(name: Option<&str>) -> Self {
        match name {
            Some(EMAIL_UNIQUE_INDEX) => Self::Email,
            Some(USERNAME_UNIQUE_INDEX) => Self::Username,
            Some(PROVIDER_UID_UNIQUE_INDEX) => Self::ProviderUid,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other("unknown".to_string()),
        }
    }
}

impl fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("email"),
            Self::Username => f.write_str("username"),
            Self::ProviderUid => f.write_str("provider/uid"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Repository layer errors
#[derive(Debug)]
pub enum RepositoryError {
    PoolError(String),
    NotFound(String),
    UniqueViolation(UniqueConstraint),
    ForeignKeyViolation(String),
    DatabaseError(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::PoolError(msg) => write!(f, "Connection pool error: {msg}"),
            RepositoryError::NotFound(msg) => write!(f, "Not found: {msg}"),
            RepositoryError::UniqueViolation(constraint) => {
                write!(f, "Unique constraint violation: {constraint}")
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                write!(f, "Foreign key constraint violation: {msg}")
            }
            RepositoryError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<diesel::result::Error> for RepositoryError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::NotFound => RepositoryError::NotFound("Record not found".to_string()),
            Error::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => RepositoryError::UniqueViolation(
                    UniqueConstraint::from_constraint_name(info.constraint_name()),
                ),
                DatabaseErrorKind::ForeignKeyViolation => {
                    RepositoryError::ForeignKeyViolation(info.message().to_string())
                }
                _ => RepositoryError::DatabaseError(info.message().to_string()),
            },
            _ => RepositoryError::DatabaseError(err.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for RepositoryError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        RepositoryError::PoolError(err.to_string())
    }
}
