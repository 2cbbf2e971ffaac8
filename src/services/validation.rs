//! Field rules shared by signup, provisioning and profile/settings edits.
//!
//! Every check here is a pure function over a candidate record; store-backed
//! uniqueness checks live in [`uniqueness_violations`].

use std::borrow::Cow;

use identity_service_api::FieldViolation;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::db::error::RepositoryError;
use crate::db::models::user::User;
use crate::db::repositories::user_repository::UserRepository;

pub const BLANK: &str = "can't be blank";
pub const TAKEN: &str = "has already been taken";
pub const INVALID: &str = "is invalid";

// Lengths are counted in characters; `u64` is what the validator derive expects.
pub const USERNAME_MIN_LENGTH: u64 = 3;
pub const USERNAME_MAX_LENGTH: u64 = 30;
pub const NAME_MAX_LENGTH: u64 = 50;
pub const PASSWORD_MIN_LENGTH: u64 = 8;
pub const PASSWORD_MAX_LENGTH: u64 = 128;
pub const AVATAR_REFERENCE_MAX_LENGTH: usize = 255;

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid username pattern"));

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("valid email pattern"));

/// Strips surrounding whitespace and lowercases
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn error(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn validate_present(value: &str) -> Result<(), ValidationError> {
    if is_blank(value) {
        return Err(error("blank", BLANK));
    }
    Ok(())
}

fn validate_email_format(email: &str) -> Result<(), ValidationError> {
    validate_present(email)?;
    if !EMAIL_PATTERN.is_match(email) {
        return Err(error("invalid", INVALID));
    }
    Ok(())
}

fn validate_avatar_reference(reference: &str) -> Result<(), ValidationError> {
    if reference.chars().count() > AVATAR_REFERENCE_MAX_LENGTH {
        return Err(error(
            "too_long",
            "is too long (maximum is 255 characters)",
        ));
    }
    Ok(())
}

/// The user record as it would be persisted
#[derive(Debug, Clone, Validate)]
pub struct UserCandidate {
    #[validate(custom(function = "validate_email_format"))]
    pub email: String,
    #[validate(
        custom(function = "validate_present"),
        length(
            min = USERNAME_MIN_LENGTH,
            max = USERNAME_MAX_LENGTH,
            message = "is the wrong length (should be 3 to 30 characters)"
        ),
        regex(
            path = *USERNAME_PATTERN,
            message = "only allows letters, numbers, and underscores"
        )
    )]
    pub username: String,
    #[validate(
        custom(function = "validate_present"),
        length(max = NAME_MAX_LENGTH, message = "is too long (maximum is 50 characters)")
    )]
    pub first_name: String,
    #[validate(
        custom(function = "validate_present"),
        length(max = NAME_MAX_LENGTH, message = "is too long (maximum is 50 characters)")
    )]
    pub last_name: String,
    #[validate(custom(function = "validate_avatar_reference"))]
    pub avatar: Option<String>,
}

impl From<&User> for UserCandidate {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Validate)]
struct PasswordCandidate {
    #[validate(length(
        min = PASSWORD_MIN_LENGTH,
        max = PASSWORD_MAX_LENGTH,
        message = "is the wrong length (should be 8 to 128 characters)"
    ))]
    password: String,
}

/// Flattens validator output into `{field, reason}` pairs, ordered by field
pub fn violations(errors: &ValidationErrors) -> Vec<FieldViolation> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|(a, _), (b, _)| a.cmp(b));

    fields
        .into_iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| {
                let reason = issue
                    .message
                    .as_ref()
                    .map_or_else(|| issue.code.to_string(), ToString::to_string);
                FieldViolation::new(field.to_string(), reason)
            })
        })
        .collect()
}

/// Format and length rules of the candidate record
pub fn candidate_violations(candidate: &UserCandidate) -> Vec<FieldViolation> {
    match candidate.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => violations(&errors),
    }
}

/// Length rule plus the optional confirmation check
pub fn password_violations(password: &str, confirmation: Option<&str>) -> Vec<FieldViolation> {
    let mut found = match (PasswordCandidate {
        password: password.to_string(),
    })
    .validate() {
        Ok(()) => Vec::new(),
        Err(errors) => violations(&errors),
    };

    if confirmation.is_some_and(|c| c != password) {
        found.push(FieldViolation::new(
            "password_confirmation",
            "doesn't match Password",
        ));
    }

    found
}

/// Case-insensitive uniqueness of email and (optionally) username.
/// `except` is the id of the record being edited.
pub fn uniqueness_violations(
    users: &dyn UserRepository,
    email: Option<&str>,
    username: Option<&str>,
    except: Option<Uuid>,
) -> Result<Vec<FieldViolation>, RepositoryError> {
    let mut found = Vec::new();

    if let Some(email) = email.filter(|e| !is_blank(e))
        && users.email_exists(email, except)?
    {
        found.push(FieldViolation::new("email", TAKEN));
    }
    if let Some(username) = username.filter(|u| !is_blank(u))
        && users.username_exists(username, except)?
    {
        found.push(FieldViolation::new("username", TAKEN));
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> UserCandidate {
        UserCandidate {
            email: "jane@example.com".to_string(),
            username: "jane_doe".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            avatar: None,
        }
    }

    fn fields(found: &[FieldViolation]) -> Vec<&str> {
        found.iter().map(|v| v.field.as_str()).collect()
    }

    #[test]
    fn valid_candidate_has_no_violations() {
        assert!(candidate_violations(&candidate()).is_empty());
    }

    #[test]
    fn username_with_space_is_rejected() {
        let mut c = candidate();
        c.username = "jane doe".to_string();

        let found = candidate_violations(&c);
        assert_eq!(fields(&found), ["username"]);
        assert_eq!(
            found[0].reason,
            "only allows letters, numbers, and underscores"
        );
    }

    #[test]
    fn username_length_bounds() {
        let mut c = candidate();
        c.username = "ab".to_string();
        assert_eq!(fields(&candidate_violations(&c)), ["username"]);

        c.username = "a".repeat(31);
        assert_eq!(fields(&candidate_violations(&c)), ["username"]);

        c.username = "a".repeat(30);
        assert!(candidate_violations(&c).is_empty());
    }

    #[test]
    fn blank_names_are_reported_per_field() {
        let mut c = candidate();
        c.first_name = "   ".to_string();
        c.last_name = String::new();

        let found = candidate_violations(&c);
        assert_eq!(fields(&found), ["first_name", "last_name"]);
        assert!(found.iter().all(|v| v.reason == BLANK));
    }

    #[test]
    fn names_longer_than_fifty_characters_are_rejected() {
        let mut c = candidate();
        c.last_name = "x".repeat(51);
        assert_eq!(fields(&candidate_violations(&c)), ["last_name"]);
    }

    #[test]
    fn email_format_follows_at_sign_rule() {
        let mut c = candidate();
        c.email = "no-at-sign".to_string();
        assert_eq!(candidate_violations(&c)[0].reason, INVALID);

        c.email = "two@@example.com".to_string();
        assert_eq!(fields(&candidate_violations(&c)), ["email"]);

        c.email = String::new();
        assert_eq!(candidate_violations(&c)[0].reason, BLANK);

        c.email = "a@b".to_string();
        assert!(candidate_violations(&c).is_empty());
    }

    #[test]
    fn password_rules() {
        assert!(password_violations("long enough", None).is_empty());
        assert_eq!(fields(&password_violations("short", None)), ["password"]);
        assert_eq!(
            fields(&password_violations("long enough", Some("different"))),
            ["password_confirmation"]
        );
        assert_eq!(
            fields(&password_violations(&"p".repeat(129), Some(&"p".repeat(129)))),
            ["password"]
        );
    }

    #[test]
    fn normalize_email_strips_and_lowercases() {
        assert_eq!(
            normalize_email("  John.Doe+x@EXAMPLE.com\n"),
            "john.doe+x@example.com"
        );
    }
}
