//! Token issuance/verification and password hashing.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::RuntimeConfig, models::User};

const BCRYPT_COST: u32 = 10;

/// Short-lived token; carries enough profile data that clients need not fetch
/// the user on every page load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub username: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    /// Unique per issuance, so two tokens minted within the same second differ.
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    access_secret: String,
    access_ttl: Duration,
    refresh_secret: String,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        access_secret: impl Into<String>,
        access_ttl: Duration,
        refresh_secret: impl Into<String>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            access_ttl,
            refresh_secret: refresh_secret.into(),
            refresh_ttl,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.access_token_secret.clone(),
            config.access_token_ttl,
            config.refresh_token_secret.clone(),
            config.refresh_token_ttl,
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .context("signing access token")
    }

    pub fn issue_refresh(&self, user_id: &str) -> Result<String> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: (now + self.refresh_ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
        .context("signing refresh token")
    }

    /// Mints both tokens. The caller persists `refresh_token` on the user,
    /// replacing whatever was there.
    pub fn issue_pair(&self, user: &User) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access(user)?,
            refresh_token: self.issue_refresh(&user.id)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &strict_validation(),
        )?;
        Ok(data.claims)
    }

    /// Checks signature and expiry only; matching against the persisted
    /// token is the caller's job.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, jsonwebtoken::errors::Error> {
        let data = decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &strict_validation(),
        )?;
        Ok(data.claims)
    }
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, BCRYPT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(password, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaAsset;

    fn service() -> TokenService {
        TokenService::new("access-secret", Duration::minutes(5), "refresh-secret", Duration::days(1))
    }

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: "6a0f4d0e-0000-4000-8000-000000000001".into(),
            username: "alice".into(),
            email: "alice@example.test".into(),
            full_name: "Alice".into(),
            avatar: MediaAsset::default(),
            cover_image: MediaAsset::default(),
            password_hash: String::new(),
            refresh_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn access_token_round_trip() {
        let tokens = service();
        let user = sample_user();
        let token = tokens.issue_access(&user).unwrap();
        let claims = tokens.verify_access(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "alice");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn refresh_tokens_are_unique_per_issue() {
        let tokens = service();
        let first = tokens.issue_refresh("u1").unwrap();
        let second = tokens.issue_refresh("u1").unwrap();
        assert_ne!(first, second);
        assert_eq!(tokens.verify_refresh(&second).unwrap().sub, "u1");
    }

    #[test]
    fn tokens_do_not_cross_secrets() {
        let tokens = service();
        let pair = tokens.issue_pair(&sample_user()).unwrap();
        assert!(tokens.verify_refresh(&pair.access_token).is_err());
        assert!(tokens.verify_access(&pair.refresh_token).is_err());

        let other = TokenService::new("x", Duration::minutes(5), "y", Duration::days(1));
        assert!(other.verify_access(&pair.access_token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let tokens = TokenService::new(
            "access-secret",
            Duration::seconds(-30),
            "refresh-secret",
            Duration::seconds(-30),
        );
        let pair = tokens.issue_pair(&sample_user()).unwrap();
        assert!(tokens.verify_access(&pair.access_token).is_err());
        assert!(tokens.verify_refresh(&pair.refresh_token).is_err());
    }

    #[test]
    fn password_hashing() {
        let hash = hash_password("correct horse").unwrap();
        assert_ne!(hash, "correct horse");
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }
}
