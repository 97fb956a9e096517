//! Short-lived service credentials.
//!
//! Every HTTP attempt carries a freshly minted HS256 token. Tokens are never
//! cached or reused across attempts, so a leaked token stops working within
//! its (30 second by default) lifetime.

use crate::error::RpcError;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity carried by every service token.
pub const SERVICE_SUBJECT: &str = "service";

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30);

/// Claims of a service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClaims {
    /// Fixed non-human identity
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
}

/// Token signing settings.
#[derive(Clone)]
pub struct ServiceTokenConfig {
    /// HMAC secret. `None` makes every mint fail.
    pub signing_secret: Option<String>,
    /// Token lifetime
    pub ttl: Duration,
}

impl ServiceTokenConfig {
    /// Sign with `secret`.
    #[must_use]
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            signing_secret: Some(secret.into()),
            ..Self::default()
        }
    }
}

impl Default for ServiceTokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

impl fmt::Debug for ServiceTokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTokenConfig")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("ttl", &self.ttl)
            .finish()
    }
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Mints and verifies service tokens.
pub struct ServiceTokenIssuer {
    keys: Option<Keys>,
    ttl: Duration,
}

impl ServiceTokenIssuer {
    /// Build an issuer from `config`.
    ///
    /// A missing secret is not an error here; it surfaces on [`Self::mint`].
    #[must_use]
    pub fn new(config: &ServiceTokenConfig) -> Self {
        let keys = config.signing_secret.as_deref().map(|secret| Keys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        });
        Self {
            keys,
            ttl: config.ttl,
        }
    }

    /// Whether a signing secret is configured.
    #[must_use]
    pub const fn can_sign(&self) -> bool {
        self.keys.is_some()
    }

    /// Mint a new token valid for the configured TTL.
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingSigningSecret`] when no secret is configured
    /// - [`RpcError::TokenSigning`] if encoding fails
    pub fn mint(&self) -> Result<String, RpcError> {
        let keys = self.keys.as_ref().ok_or(RpcError::MissingSigningSecret)?;

        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = ServiceClaims {
            sub: SERVICE_SUBJECT.to_string(),
            iat,
            exp: iat.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| RpcError::TokenSigning(e.to_string()))
    }

    /// Check a token's signature, expiry and subject.
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingSigningSecret`] when no secret is configured
    /// - [`RpcError::TokenSigning`] if the token is invalid or expired
    pub fn verify(&self, token: &str) -> Result<ServiceClaims, RpcError> {
        let keys = self.keys.as_ref().ok_or(RpcError::MissingSigningSecret)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.sub = Some(SERVICE_SUBJECT.to_string());

        decode::<ServiceClaims>(token, &keys.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| RpcError::TokenSigning(e.to_string()))
    }
}

impl fmt::Debug for ServiceTokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTokenIssuer")
            .field("can_sign", &self.can_sign())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_verifies_with_service_claims() {
        let issuer = ServiceTokenIssuer::new(&ServiceTokenConfig::with_secret("s3cret"));

        let claims = issuer.verify(&issuer.mint().unwrap()).unwrap();

        assert_eq!(claims.sub, SERVICE_SUBJECT);
        assert_eq!(claims.exp - claims.iat, 30);
    }

    #[test]
    fn every_mint_is_a_new_token() {
        let issuer = ServiceTokenIssuer::new(&ServiceTokenConfig::with_secret("s3cret"));

        let a = issuer.verify(&issuer.mint().unwrap()).unwrap();
        let b = issuer.verify(&issuer.mint().unwrap()).unwrap();

        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let issuer = ServiceTokenIssuer::new(&ServiceTokenConfig::with_secret("s3cret"));
        let other = ServiceTokenIssuer::new(&ServiceTokenConfig::with_secret("different"));

        let token = issuer.mint().unwrap();

        assert!(matches!(other.verify(&token), Err(RpcError::TokenSigning(_))));
    }

    #[test]
    fn missing_secret_fails_at_mint() {
        let issuer = ServiceTokenIssuer::new(&ServiceTokenConfig::default());

        assert!(!issuer.can_sign());
        assert!(matches!(issuer.mint(), Err(RpcError::MissingSigningSecret)));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = ServiceTokenConfig::with_secret("s3cret");
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
