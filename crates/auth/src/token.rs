//! HMAC access tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::Claims;

/// Minimum accepted HMAC secret length, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("hmac secret must be at least 32 bytes, got {0}")]
    SecretTooShort(usize),

    #[error("unsupported hmac algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("token ttl must be positive")]
    InvalidTtl,

    #[error("token subject must not be empty")]
    EmptySubject,

    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("token validation failed: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Issues access tokens for an authenticated subject.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, subject: &str) -> Result<String, TokenError>;
}

/// Verifies access tokens and yields their claims.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

#[derive(Debug, Clone)]
pub struct TokenOptions {
    pub secret: Vec<u8>,
    /// `HS256` (default when empty), `HS384` or `HS512`.
    pub algorithm: String,
    pub issuer: Option<String>,
    pub ttl: Duration,
}

/// Shared-secret token manager (HS256/HS384/HS512).
#[derive(Clone)]
pub struct HmacTokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    issuer: Option<String>,
    ttl: Duration,
}

impl core::fmt::Debug for HmacTokenManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HmacTokenManager")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HmacTokenManager {
    pub fn new(opts: TokenOptions) -> Result<Self, TokenError> {
        if opts.secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::SecretTooShort(opts.secret.len()));
        }
        if opts.ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }
        let algorithm = resolve_algorithm(&opts.algorithm)?;

        Ok(Self {
            encoding: EncodingKey::from_secret(&opts.secret),
            decoding: DecodingKey::from_secret(&opts.secret),
            algorithm,
            issuer: opts.issuer.filter(|i| !i.trim().is_empty()),
            ttl: opts.ttl,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

fn resolve_algorithm(name: &str) -> Result<Algorithm, TokenError> {
    match name.trim() {
        "" | "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(TokenError::UnsupportedAlgorithm(other.to_string())),
    }
}

impl TokenSigner for HmacTokenManager {
    fn sign(&self, subject: &str) -> Result<String, TokenError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(TokenError::EmptySubject);
        }

        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            jti: None,
        };

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(TokenError::Sign)
    }
}

impl TokenVerifier for HmacTokenManager {
    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        // Only the configured algorithm is accepted; a token signed with a
        // sibling HMAC variant fails here.
        let mut validation = Validation::new(self.algorithm);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(TokenError::Invalid)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn manager(algorithm: &str) -> HmacTokenManager {
        HmacTokenManager::new(TokenOptions {
            secret: SECRET.to_vec(),
            algorithm: algorithm.to_string(),
            issuer: Some("walletd".to_string()),
            ttl: Duration::minutes(15),
        })
        .unwrap()
    }

    #[test]
    fn signed_token_verifies_with_subject_and_issuer() {
        let m = manager("");
        let token = m.sign("user-1").unwrap();
        let claims = m.verify(&token).unwrap();

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.iss.as_deref(), Some("walletd"));
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = HmacTokenManager::new(TokenOptions {
            secret: b"short".to_vec(),
            algorithm: "HS256".into(),
            issuer: None,
            ttl: Duration::minutes(1),
        })
        .unwrap_err();
        assert!(matches!(err, TokenError::SecretTooShort(5)));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = HmacTokenManager::new(TokenOptions {
            secret: SECRET.to_vec(),
            algorithm: "RS256".into(),
            issuer: None,
            ttl: Duration::minutes(1),
        })
        .unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedAlgorithm(a) if a == "RS256"));
    }

    #[test]
    fn token_from_other_algorithm_is_rejected() {
        let hs512 = manager("HS512");
        let hs256 = manager("HS256");
        let token = hs512.sign("user-1").unwrap();
        assert!(matches!(hs256.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn tampered_and_expired_tokens_are_rejected() {
        let m = manager("HS256");
        let mut token = m.sign("user-1").unwrap();
        token.push('x');
        assert!(m.verify(&token).is_err());

        let now = Utc::now();
        let expired = Claims {
            sub: "user-1".into(),
            iss: Some("walletd".into()),
            iat: (now - Duration::hours(2)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
            jti: None,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &expired,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(m.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn empty_subject_cannot_be_signed() {
        assert!(matches!(manager("").sign("  "), Err(TokenError::EmptySubject)));
    }
}
