use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    GenerationFailed(jsonwebtoken::errors::Error),
    #[error("Token verification failed: {0}")]
    VerificationFailed(jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    /// `session_version` of the user when the token was issued
    pub ver: i32,
    #[serde(default)]
    pub rem: bool,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_hours: i64,
    remember_for_days: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiration_hours: i64, remember_for_days: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            expiration_hours,
            remember_for_days,
        }
    }

    /// Issues a session token; `remember` stretches its lifetime to the remember period
    pub fn issue(
        &self,
        user_id: Uuid,
        session_version: i32,
        remember: bool,
    ) -> Result<IssuedToken, JwtError> {
        let ttl = if remember {
            Duration::days(self.remember_for_days)
        } else {
            Duration::hours(self.expiration_hours)
        };

        let access_token = self.generate_token(user_id, session_version, remember, ttl)?;
        Ok(IssuedToken {
            access_token,
            expires_in: ttl.num_seconds(),
        })
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        session_version: i32,
        remember: bool,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = Utc::now();

        let claims = Claims {
            sub: user_id,
            ver: session_version,
            rem: remember,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::GenerationFailed)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(JwtError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::{Duration, JwtError, JwtManager, Uuid};

    fn make_jwt_manager() -> JwtManager {
        JwtManager::new("my_secret_key_for_tests", 1, 14)
    }

    #[test]
    fn issue_and_verify_round_trips_session_version() {
        let jwt = make_jwt_manager();
        let user_id = Uuid::new_v4();

        let issued = jwt.issue(user_id, 3, false).expect("Token generation failed");
        let claims = jwt
            .verify_token(&issued.access_token)
            .expect("Token verification failed");

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.ver, 3);
        assert!(!claims.rem);
        assert_eq!(issued.expires_in, 3600);
    }

    #[test]
    fn remembered_sessions_last_the_remember_period() {
        let jwt = make_jwt_manager();

        let issued = jwt.issue(Uuid::new_v4(), 0, true).unwrap();
        let claims = jwt.verify_token(&issued.access_token).unwrap();

        assert!(claims.rem);
        assert_eq!(issued.expires_in, 14 * 24 * 3600);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = make_jwt_manager();
        let token = jwt
            .generate_token(Uuid::new_v4(), 0, false, Duration::hours(-2))
            .unwrap();

        assert!(matches!(
            jwt.verify_token(&token),
            Err(JwtError::VerificationFailed(_))
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issued = JwtManager::new("another_secret", 1, 14)
            .issue(Uuid::new_v4(), 0, false)
            .unwrap();

        assert!(make_jwt_manager().verify_token(&issued.access_token).is_err());
    }

    #[test]
    fn verify_token_fails_with_invalid_input() {
        let result = make_jwt_manager().verify_token("invalid.token.here");

        assert!(matches!(result.unwrap_err(), JwtError::VerificationFailed(_)));
    }
}
