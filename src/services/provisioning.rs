// src/services/provisioning.rs

use std::sync::Arc;

use identity_service_api::{FederatedProfile, FieldViolation, SignupRequest};
use uuid::Uuid;

use crate::auth::password::PasswordManager;
use crate::db::error::{RepositoryError, UniqueConstraint};
use crate::db::models::user::{NewUser, User};
use crate::db::repositories::user_repository::UserRepository;
use crate::error::AppError;
use crate::services::username::{self, MAX_USERNAME_ATTEMPTS, Reservation};
use crate::services::validation::{self, UserCandidate, is_blank, normalize_email};

pub const PLACEHOLDER_FIRST_NAME: &str = "User";
pub const PLACEHOLDER_LAST_NAME: &str = "Name";

/// Column widths of `users.provider` and `users.uid`
pub const PROVIDER_MAX_LENGTH: usize = 50;
pub const UID_MAX_LENGTH: usize = 255;

/// Creates or resolves user records for local signups and provider logins
pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    passwords: PasswordManager,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// First and last name from the provider claims, falling back to the two ends
/// of the full name and finally to placeholders
pub fn names_from_profile(profile: &FederatedProfile) -> (String, String) {
    let tokens: Vec<&str> = profile
        .name
        .as_deref()
        .map(|n| n.split_whitespace().collect())
        .unwrap_or_default();

    let first_name = present(profile.first_name.as_deref())
        .or_else(|| tokens.first().copied())
        .unwrap_or(PLACEHOLDER_FIRST_NAME);
    let last_name = present(profile.last_name.as_deref())
        .or_else(|| tokens.last().copied())
        .unwrap_or(PLACEHOLDER_LAST_NAME);

    (first_name.to_string(), last_name.to_string())
}

impl IdentityService {
    pub fn new(users: Arc<dyn UserRepository>, passwords: PasswordManager) -> Self {
        Self { users, passwords }
    }

    /// Resolves `(provider, uid)` to its user, creating the account on first login.
    /// Repeated calls for the same identity return the same record unchanged.
    pub fn provision_from_federated_login(
        &self,
        provider: &str,
        uid: &str,
        profile: &FederatedProfile,
    ) -> Result<User, AppError> {
        if is_blank(provider) || is_blank(uid) {
            return Err(AppError::invalid_input("Provider and uid are required"));
        }
        if provider.chars().count() > PROVIDER_MAX_LENGTH || uid.chars().count() > UID_MAX_LENGTH {
            return Err(AppError::invalid_input(format!(
                "Provider is limited to {PROVIDER_MAX_LENGTH} characters and uid to {UID_MAX_LENGTH}"
            )));
        }

        if let Some(existing) = self.users.find_by_provider_uid(provider, uid)? {
            tracing::debug!(user_id = %existing.id, provider, "Resolved federated identity");
            return Ok(existing);
        }

        let Some(raw_email) = present(profile.email.as_deref()) else {
            return Err(AppError::invalid_field("email", validation::BLANK));
        };

        let reservation = username::next_available(
            self.users.as_ref(),
            &username::base_from_email(raw_email),
            0,
        )?;
        let (first_name, last_name) = names_from_profile(profile);
        let candidate = UserCandidate {
            email: normalize_email(raw_email),
            username: reservation.username(),
            first_name,
            last_name,
            avatar: None,
        };

        let mut violations = validation::candidate_violations(&candidate);
        violations.extend(validation::uniqueness_violations(
            self.users.as_ref(),
            Some(&candidate.email),
            None,
            None,
        )?);
        if !violations.is_empty() {
            return self.winner_of_race(provider, uid, AppError::Validation(violations));
        }

        let new_user = NewUser {
            id: Uuid::new_v4(),
            email: candidate.email,
            username: candidate.username,
            first_name: candidate.first_name,
            last_name: candidate.last_name,
            avatar_url: present(profile.image.as_deref()).map(str::to_string),
            password_hash: self.passwords.hash(&PasswordManager::random_password())?,
            provider: Some(provider.to_string()),
            uid: Some(uid.to_string()),
        };

        match self.insert(new_user, Some(reservation)) {
            Ok(user) => {
                tracing::info!(user_id = %user.id, provider, username = %user.username, "Provisioned federated user");
                Ok(user)
            }
            // Any unique index may fire first when the same identity lands concurrently.
            Err(err @ (AppError::Conflict(_) | AppError::Validation(_))) => {
                self.winner_of_race(provider, uid, err)
            }
            Err(err) => Err(err),
        }
    }

    /// The row a concurrent login for `(provider, uid)` created, else `err`
    fn winner_of_race(&self, provider: &str, uid: &str, err: AppError) -> Result<User, AppError> {
        match self.users.find_by_provider_uid(provider, uid)? {
            Some(winner) => {
                tracing::info!(user_id = %winner.id, provider, "Federated identity provisioned concurrently");
                Ok(winner)
            }
            None => Err(err),
        }
    }

    /// First-party signup: normalize email, generate a username if none was
    /// given, validate, hash, persist
    pub fn create_local_user(&self, request: SignupRequest) -> Result<User, AppError> {
        let email = normalize_email(&request.email);

        let (username, reservation) = match request.username.as_deref() {
            Some(explicit) if !is_blank(explicit) => (explicit.to_string(), None),
            _ => {
                let base = if email.is_empty() {
                    username::FALLBACK_BASE.to_string()
                } else {
                    username::base_from_email(&email)
                };
                let reservation = username::next_available(self.users.as_ref(), &base, 0)?;
                (reservation.username(), Some(reservation))
            }
        };

        let candidate = UserCandidate {
            email,
            username,
            first_name: request.first_name,
            last_name: request.last_name,
            avatar: None,
        };

        let mut violations: Vec<FieldViolation> = validation::candidate_violations(&candidate);
        violations.extend(validation::password_violations(
            &request.password,
            request.password_confirmation.as_deref(),
        ));
        violations.extend(validation::uniqueness_violations(
            self.users.as_ref(),
            Some(&candidate.email),
            reservation.is_none().then_some(candidate.username.as_str()),
            None,
        )?);
        if !violations.is_empty() {
            return Err(AppError::Validation(violations));
        }

        let new_user = NewUser {
            id: Uuid::new_v4(),
            email: candidate.email,
            username: candidate.username,
            first_name: candidate.first_name,
            last_name: candidate.last_name,
            avatar_url: None,
            password_hash: self.passwords.hash(&request.password)?,
            provider: None,
            uid: None,
        };

        let user = self.insert(new_user, reservation)?;
        tracing::info!(user_id = %user.id, username = %user.username, "Registered local user");
        Ok(user)
    }

    /// Inserts the row. With a reservation, losing the username to a
    /// concurrent insert resumes the search after the lost candidate.
    fn insert(
        &self,
        mut new_user: NewUser,
        reservation: Option<Reservation>,
    ) -> Result<User, AppError> {
        let Some(mut reservation) = reservation else {
            return self.users.create(&new_user).map_err(AppError::from);
        };

        for attempt in 1..=MAX_USERNAME_ATTEMPTS {
            new_user.username = reservation.username();
            match self.users.create(&new_user) {
                Ok(user) => return Ok(user),
                Err(RepositoryError::UniqueViolation(UniqueConstraint::Username)) => {
                    tracing::warn!(
                        attempt,
                        username = %new_user.username,
                        "Generated username taken concurrently, trying the next suffix"
                    );
                    reservation = username::next_available(
                        self.users.as_ref(),
                        &reservation.base,
                        reservation.counter + 1,
                    )?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::error!(base = %reservation.base, "Username generation exhausted its retries");
        Err(AppError::internal(format!(
            "no username could be reserved for base {:?} after {MAX_USERNAME_ATTEMPTS} attempts",
            reservation.base
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::user::UpdateUser;
    use crate::db::repositories::memory::InMemoryUserRepository;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service(repo: Arc<dyn UserRepository>) -> IdentityService {
        IdentityService::new(repo, PasswordManager::new(4))
    }

    fn signup(email: &str, username: Option<&str>) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "password123".to_string(),
            password_confirmation: None,
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            username: username.map(str::to_string),
        }
    }

    fn profile(email: &str) -> FederatedProfile {
        FederatedProfile {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    /// Reports every username as free, like a check that ran before a
    /// concurrent insert committed.
    struct StaleReads {
        inner: InMemoryUserRepository,
        creates: AtomicU32,
    }

    impl UserRepository for StaleReads {
        fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
            self.inner.find_by_id(id)
        }
        fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
            self.inner.find_by_email(email)
        }
        fn find_by_provider_uid(
            &self,
            provider: &str,
            uid: &str,
        ) -> Result<Option<User>, RepositoryError> {
            self.inner.find_by_provider_uid(provider, uid)
        }
        fn username_exists(&self, _: &str, _: Option<Uuid>) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        fn email_exists(&self, email: &str, except: Option<Uuid>) -> Result<bool, RepositoryError> {
            self.inner.email_exists(email, except)
        }
        fn create(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create(new_user)
        }
        fn update(&self, id: Uuid, changes: &UpdateUser) -> Result<User, RepositoryError> {
            self.inner.update(id, changes)
        }
        fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, RepositoryError> {
            self.inner.increment_failed_attempts(id)
        }
        fn increment_session_version(&self, id: Uuid) -> Result<User, RepositoryError> {
            self.inner.increment_session_version(id)
        }
        fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, RepositoryError> {
            self.inner.record_sign_in(id, at)
        }
        fn search(&self, query: Option<&str>, limit: i64) -> Result<Vec<User>, RepositoryError> {
            self.inner.search(query, limit)
        }
    }

    /// Commits `winner` right before the next insert, like a concurrent
    /// callback for the same identity finishing first
    struct LateWinner {
        inner: InMemoryUserRepository,
        winner: Mutex<Option<NewUser>>,
    }

    impl UserRepository for LateWinner {
        fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
            self.inner.find_by_id(id)
        }
        fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
            self.inner.find_by_email(email)
        }
        fn find_by_provider_uid(
            &self,
            provider: &str,
            uid: &str,
        ) -> Result<Option<User>, RepositoryError> {
            self.inner.find_by_provider_uid(provider, uid)
        }
        fn username_exists(
            &self,
            username: &str,
            except: Option<Uuid>,
        ) -> Result<bool, RepositoryError> {
            self.inner.username_exists(username, except)
        }
        fn email_exists(&self, email: &str, except: Option<Uuid>) -> Result<bool, RepositoryError> {
            self.inner.email_exists(email, except)
        }
        fn create(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
            if let Some(winner) = self.winner.lock().unwrap().take() {
                self.inner.create(&winner)?;
            }
            self.inner.create(new_user)
        }
        fn update(&self, id: Uuid, changes: &UpdateUser) -> Result<User, RepositoryError> {
            self.inner.update(id, changes)
        }
        fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, RepositoryError> {
            self.inner.increment_failed_attempts(id)
        }
        fn increment_session_version(&self, id: Uuid) -> Result<User, RepositoryError> {
            self.inner.increment_session_version(id)
        }
        fn record_sign_in(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, RepositoryError> {
            self.inner.record_sign_in(id, at)
        }
        fn search(&self, query: Option<&str>, limit: i64) -> Result<Vec<User>, RepositoryError> {
            self.inner.search(query, limit)
        }
    }

    fn winner_row(provider: &str, uid: &str, email: &str, username: &str) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: username.to_string(),
            first_name: "User".to_string(),
            last_name: "Name".to_string(),
            avatar_url: None,
            password_hash: "hash".to_string(),
            provider: Some(provider.to_string()),
            uid: Some(uid.to_string()),
        }
    }

    #[test]
    fn federated_signup_without_names_uses_placeholders() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let user = service(repo)
            .provision_from_federated_login("google_oauth2", "uid-1", &profile("john.doe+x@EXAMPLE.com"))
            .expect("provision");

        assert_eq!(user.email, "john.doe+x@example.com");
        assert_eq!(user.username, "john_doe_x");
        assert_eq!(user.first_name, "User");
        assert_eq!(user.last_name, "Name");
        assert_eq!(user.provider.as_deref(), Some("google_oauth2"));
        assert_eq!(user.uid.as_deref(), Some("uid-1"));
    }

    #[test]
    fn federated_username_follows_the_suffix_sequence() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo);
        svc.create_local_user(signup("john_doe_x@other.com", None)).unwrap();

        let user = svc
            .provision_from_federated_login("google_oauth2", "uid-1", &profile("john.doe+x@EXAMPLE.com"))
            .unwrap();

        assert_eq!(user.username, "john_doe_x1");
    }

    #[test]
    fn federated_login_is_idempotent() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo.clone());
        let payload = profile("jane@example.com");

        let first = svc.provision_from_federated_login("github", "7", &payload).unwrap();
        let second = svc.provision_from_federated_login("github", "7", &payload).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.search(None, 50).unwrap().len(), 1);
    }

    #[test]
    fn existing_identity_is_returned_unchanged() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo);
        let first = svc
            .provision_from_federated_login("github", "7", &profile("jane@example.com"))
            .unwrap();

        let changed = FederatedProfile {
            email: Some("new-address@example.com".to_string()),
            name: Some("Someone Else".to_string()),
            ..Default::default()
        };
        let second = svc.provision_from_federated_login("github", "7", &changed).unwrap();

        assert_eq!(second, first);
    }

    #[test]
    fn concurrent_first_login_returns_the_row_that_won() {
        // The winner holds the same email, so the insert trips the email index
        // before the (provider, uid) one.
        let winner = winner_row("github", "7", "jane@example.com", "jane");
        let winner_id = winner.id;
        let repo = Arc::new(LateWinner {
            inner: InMemoryUserRepository::new(),
            winner: Mutex::new(Some(winner)),
        });

        let user = service(repo.clone())
            .provision_from_federated_login("github", "7", &profile("jane@example.com"))
            .expect("the concurrent row is returned");

        assert_eq!(user.id, winner_id);
        assert_eq!(repo.search(None, 50).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_insert_of_another_identity_keeps_the_error() {
        let repo = Arc::new(LateWinner {
            inner: InMemoryUserRepository::new(),
            winner: Mutex::new(Some(winner_row("google_oauth2", "x", "jane@example.com", "jane"))),
        });

        let err = service(repo)
            .provision_from_federated_login("github", "7", &profile("jane@example.com"))
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(v) if v[0].field == "email"));
    }

    #[test]
    fn short_email_local_part_fails_username_validation() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let err = service(repo.clone())
            .provision_from_federated_login("github", "1", &profile("jo@x.com"))
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(v) if v.iter().any(|f| f.field == "username")));
        assert!(repo.search(None, 50).unwrap().is_empty());
    }

    #[test]
    fn oversized_provider_or_uid_is_invalid_input() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo.clone());
        let payload = profile("jane@example.com");

        let long_provider = "p".repeat(PROVIDER_MAX_LENGTH + 1);
        assert!(matches!(
            svc.provision_from_federated_login(&long_provider, "7", &payload),
            Err(AppError::InvalidInput(_))
        ));
        let long_uid = "9".repeat(UID_MAX_LENGTH + 1);
        assert!(matches!(
            svc.provision_from_federated_login("github", &long_uid, &payload),
            Err(AppError::InvalidInput(_))
        ));
        assert!(repo.search(None, 50).unwrap().is_empty());

        let widest = "p".repeat(PROVIDER_MAX_LENGTH);
        assert!(svc.provision_from_federated_login(&widest, "7", &payload).is_ok());
    }

    #[test]
    fn names_fall_back_to_the_ends_of_the_full_name() {
        let named = FederatedProfile {
            name: Some("  Mary Ann   Smith ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            names_from_profile(&named),
            ("Mary".to_string(), "Smith".to_string())
        );

        let explicit = FederatedProfile {
            first_name: Some("Jo".to_string()),
            last_name: Some(String::new()),
            name: Some("Joanna March".to_string()),
            ..Default::default()
        };
        assert_eq!(
            names_from_profile(&explicit),
            ("Jo".to_string(), "March".to_string())
        );

        let single = FederatedProfile {
            name: Some("Cher".to_string()),
            ..Default::default()
        };
        assert_eq!(
            names_from_profile(&single),
            ("Cher".to_string(), "Cher".to_string())
        );
    }

    #[test]
    fn federated_signup_keeps_the_provider_image() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let payload = FederatedProfile {
            email: Some("pic@example.com".to_string()),
            image: Some("https://lh3.example.com/photo.jpg".to_string()),
            ..Default::default()
        };

        let user = service(repo)
            .provision_from_federated_login("google_oauth2", "9", &payload)
            .unwrap();

        assert_eq!(user.avatar_url.as_deref(), Some("https://lh3.example.com/photo.jpg"));
    }

    #[test]
    fn federated_signup_requires_an_email() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let err = service(repo)
            .provision_from_federated_login("github", "1", &FederatedProfile::default())
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(v) if v[0].field == "email"));
    }

    #[test]
    fn federated_signup_with_taken_email_is_a_validation_error() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo);
        svc.create_local_user(signup("jane@example.com", Some("jane"))).unwrap();

        let err = svc
            .provision_from_federated_login("github", "1", &profile("JANE@example.com"))
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(v) if v == vec![FieldViolation::new("email", validation::TAKEN)]));
    }

    #[test]
    fn local_signup_generates_username_from_email() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo);

        let first = svc.create_local_user(signup("Mary.Sue@Example.com", None)).unwrap();
        let second = svc.create_local_user(signup("mary.sue@elsewhere.org", Some("  "))).unwrap();

        assert_eq!(first.email, "mary.sue@example.com");
        assert_eq!(first.username, "mary_sue");
        assert_eq!(second.username, "mary_sue1");
    }

    #[test]
    fn local_signup_reports_all_violations_at_once() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let request = SignupRequest {
            email: "not-an-email".to_string(),
            password: "short".to_string(),
            password_confirmation: Some("other".to_string()),
            first_name: String::new(),
            last_name: "Doe".to_string(),
            username: Some("bad name".to_string()),
        };

        let err = service(repo.clone()).create_local_user(request).unwrap_err();
        let AppError::Validation(violations) = err else {
            panic!("expected a validation error");
        };
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();

        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"first_name"));
        assert!(fields.contains(&"username"));
        assert!(fields.contains(&"password"));
        assert!(fields.contains(&"password_confirmation"));
        assert!(repo.search(None, 50).unwrap().is_empty());
    }

    #[test]
    fn local_signup_rejects_taken_explicit_username() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = service(repo);
        svc.create_local_user(signup("a@example.com", Some("taken_name"))).unwrap();

        let err = svc
            .create_local_user(signup("b@example.com", Some("TAKEN_NAME")))
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(v) if v == vec![FieldViolation::new("username", validation::TAKEN)]));
    }

    #[test]
    fn lost_username_race_retries_with_next_counter() {
        let repo = Arc::new(StaleReads {
            inner: InMemoryUserRepository::new(),
            creates: AtomicU32::new(0),
        });
        let svc = service(repo.clone());
        svc.create_local_user(signup("sam@one.com", None)).unwrap();
        svc.create_local_user(signup("sam@two.com", None)).unwrap();

        let third = svc.create_local_user(signup("sam@three.com", None)).unwrap();

        assert_eq!(third.username, "sam2");
        // 1 + 2 + 3 inserts: each lost race costs one rejected insert
        assert_eq!(repo.creates.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn concurrent_signups_with_same_base_get_distinct_usernames() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let svc = Arc::new(service(repo.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || {
                    svc.create_local_user(signup(&format!("twin@host{i}.com"), None))
                })
            })
            .collect();

        let mut usernames: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().expect("thread").expect("signup").username)
            .collect();
        usernames.sort();

        let mut expected: Vec<String> =
            (0..8).map(|i| username::candidate("twin", i)).collect();
        expected.sort();
        assert_eq!(usernames, expected);
    }
}
