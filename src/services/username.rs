//! Username derivation: a sanitized base from the email local part, then
//! `base`, `base1`, `base2`, ... until a free one is found.

use crate::db::error::RepositoryError;
use crate::db::repositories::user_repository::UserRepository;

pub const BASE_MAX_CHARS: usize = 20;

/// Base used when a local signup has no email to derive from
pub const FALLBACK_BASE: &str = "user";

/// Inserts that lose the race for a generated username before giving up
pub const MAX_USERNAME_ATTEMPTS: u32 = 32;

/// Replaces every character outside `[A-Za-z0-9_]` with `_` and keeps the first 20
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(BASE_MAX_CHARS)
        .collect()
}

/// Sanitized text before the first `@`
pub fn base_from_email(email: &str) -> String {
    sanitize(email.split('@').next().unwrap_or_default())
}

/// `base` for counter 0, `base{counter}` afterwards
pub fn candidate(base: &str, counter: u32) -> String {
    if counter == 0 {
        base.to_string()
    } else {
        format!("{base}{counter}")
    }
}

/// A username picked for a new account together with its position in the suffix sequence
/// it was found at, so a lost insert race can resume right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub base: String,
    pub counter: u32,
}

impl Reservation {
    pub fn username(&self) -> String {
        candidate(&self.base, self.counter)
    }
}

/// First candidate at or after `from` that no user holds (case-insensitive)
pub fn next_available(
    users: &dyn UserRepository,
    base: &str,
    from: u32,
) -> Result<Reservation, RepositoryError> {
    let mut counter = from;
    while users.username_exists(&candidate(base, counter), None)? {
        counter += 1;
    }

    Ok(Reservation {
        base: base.to_string(),
        counter,
    })
}
