//! Token verification gateway.
//!
//! The resolver never inspects tokens itself. A [`TokenVerifier`] turns the
//! bearer token into a subject id or rejects it; it keeps no cache of its own.

pub mod jwt;

use async_trait::async_trait;

pub use jwt::{JwtTokenVerifier, SubjectClaims, VerifyError};

/// Resolves a bearer token to the subject id it was issued for.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verifies the token and returns its subject id.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, expired, or not signed by
    /// the identity provider.
    async fn verify(&self, token: &str) -> Result<String, VerifyError>;
}
