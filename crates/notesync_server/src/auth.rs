//! Authentication support for the sync server.
//!
//! This module provides token-based authentication using HMAC-SHA256.
//! Tokens include a timestamp for expiration checking.
//!
//! ## Token Format
//!
//! `{replica_id}.{issued_at}.{signature}` where `issued_at` is Unix millis
//! and `signature` is the lowercase hex HMAC-SHA256 of
//! `{replica_id}.{issued_at}`. Replica ids may themselves contain dots; the
//! last two fields are split off from the right.

use crate::error::{ServerError, ServerResult};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Token validator for incoming requests.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Mints a token for a replica, valid from now.
    pub fn create_token(&self, replica_id: &str) -> ServerResult<String> {
        self.create_token_at(replica_id, Utc::now().timestamp_millis())
    }

    fn create_token_at(&self, replica_id: &str, issued_at: i64) -> ServerResult<String> {
        let payload = format!("{replica_id}.{issued_at}");
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Validates a token and returns the replica id it was minted for.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the token is malformed, the
    /// signature does not match or the token has expired.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(issued_at), Some(replica_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        };
        if replica_id.is_empty() {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        }

        let signature = hex::decode(signature)
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        let payload = &token[..replica_id.len() + 1 + issued_at.len()];
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let issued_at: i64 = issued_at
            .parse()
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        let expiry = i64::try_from(self.config.token_expiry.as_millis()).unwrap_or(i64::MAX);
        if Utc::now().timestamp_millis() > issued_at.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(replica_id.to_string())
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid auth secret: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("token_expiry", &self.config.token_expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token("replica-a").unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), "replica-a");

        let signature = token.rsplit('.').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn replica_id_may_contain_dots() {
        let validator = validator();
        let token = validator.create_token("host.local").unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), "host.local");
    }

    #[test]
    fn reject_other_secret() {
        let token = validator().create_token("replica-a").unwrap();
        let other = TokenValidator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token("replica-a").unwrap();

        let forged = token.replacen("replica-a", "replica-b", 1);
        assert!(validator.validate_token(&forged).is_err());

        let mut flipped = token.clone();
        let last = flipped.pop().unwrap();
        flipped.push(if last == '0' { '1' } else { '0' });
        assert!(validator.validate_token(&flipped).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(60)),
        );
        let issued_at = Utc::now().timestamp_millis() - 61_000;
        let token = validator.create_token_at("replica-a", issued_at).unwrap();
        let err = validator.validate_token(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn reject_malformed_tokens() {
        let validator = validator();
        for token in ["", "abc", "a.b", ".123.00", "a.123.xyz", "a.notanumber.00"] {
            assert!(validator.validate_token(token).is_err(), "{token:?}");
        }
    }
}
