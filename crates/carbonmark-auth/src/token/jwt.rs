//! HS256 bearer token verification.
//!
//! The identity provider signs access tokens with a shared secret and puts
//! the subject id in `sub`. This verifier checks signature, expiry, and the
//! optional issuer/audience, then hands back the subject.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::TokenConfig;
use crate::error::AuthError;

use super::TokenVerifier;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while verifying a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token could not be decoded.
    #[error("Failed to decode token: {message}")]
    Malformed {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims {
                message: err.to_string(),
            },
            _ => Self::Malformed {
                message: err.to_string(),
            },
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// The claims this verifier reads; everything else in the token is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectClaims {
    /// Subject id.
    pub sub: String,

    /// Expiry (seconds since epoch).
    pub exp: i64,

    /// Email, when the provider includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies HS256 tokens issued by the external identity provider.
pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    /// Creates a verifier from the token configuration section.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if no secret is configured.
    pub fn from_config(config: &TokenConfig) -> Result<Self, AuthError> {
        if config.secret.is_empty() {
            return Err(AuthError::configuration("token.secret is not set"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = config.leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &config.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        })
    }

    /// Decodes and validates a token, returning its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or `sub` is empty.
    pub fn decode(&self, token: &str) -> Result<SubjectClaims, VerifyError> {
        let claims = decode::<SubjectClaims>(token, &self.decoding_key, &self.validation)?.claims;
        if claims.sub.trim().is_empty() {
            return Err(VerifyError::InvalidClaims {
                message: "empty sub claim".to_string(),
            });
        }
        Ok(claims)
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, VerifyError> {
        self.decode(token).map(|claims| claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;
    use time::OffsetDateTime;

    const SECRET: &str = "test-secret";

    fn config() -> TokenConfig {
        TokenConfig {
            secret: SECRET.to_string(),
            ..TokenConfig::default()
        }
    }

    fn sign(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn exp_in(secs: i64) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp() + secs
    }

    #[tokio::test]
    async fn test_valid_token_yields_subject() {
        let verifier = JwtTokenVerifier::from_config(&config()).unwrap();
        let token = sign(json!({ "sub": "u1", "exp": exp_in(600) }), SECRET);

        assert_eq!(verifier.verify(&token).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let verifier = JwtTokenVerifier::from_config(&config()).unwrap();
        let token = sign(json!({ "sub": "u1", "exp": exp_in(600) }), "other");

        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerifyError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = JwtTokenVerifier::from_config(&config()).unwrap();
        let token = sign(json!({ "sub": "u1", "exp": exp_in(-3600) }), SECRET);

        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerifyError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let verifier = JwtTokenVerifier::from_config(&config()).unwrap();
        let token = sign(json!({ "sub": "", "exp": exp_in(600) }), SECRET);

        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerifyError::InvalidClaims { .. })
        ));
    }

    #[tokio::test]
    async fn test_audience_enforced_when_configured() {
        let verifier = JwtTokenVerifier::from_config(&TokenConfig {
            audience: Some("authenticated".to_string()),
            ..config()
        })
        .unwrap();

        let good = sign(
            json!({ "sub": "u1", "exp": exp_in(600), "aud": "authenticated" }),
            SECRET,
        );
        let bad = sign(
            json!({ "sub": "u1", "exp": exp_in(600), "aud": "anon" }),
            SECRET,
        );

        assert!(verifier.verify(&good).await.is_ok());
        assert!(verifier.verify(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let verifier = JwtTokenVerifier::from_config(&config()).unwrap();

        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(VerifyError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        assert!(matches!(
            JwtTokenVerifier::from_config(&TokenConfig::default()),
            Err(AuthError::Configuration { .. })
        ));
    }
}
