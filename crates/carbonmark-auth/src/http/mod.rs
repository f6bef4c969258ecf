//! Axum integration.
//!
//! - [`CurrentUser`] resolves the caller's profile from the
//!   `Authorization: Bearer` header.
//! - [`health_router`] serves the resolver's health report.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use axum::{Router, Json, routing::get};
//! use carbonmark_auth::{CurrentUser, IdentityResolver, Profile, health_router};
//!
//! async fn me(CurrentUser(profile): CurrentUser) -> Json<Profile> {
//!     Json(profile.as_ref().clone())
//! }
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .with_state(resolver.clone())
//!     .merge(health_router(resolver));
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::error::AuthError;
use crate::resolver::IdentityResolver;
use crate::types::Profile;

// =============================================================================
// Current User Extractor
// =============================================================================

/// The resolved profile of the authenticated caller.
///
/// Rejects with [`AuthError`], which renders as `401` with a uniform
/// "could not validate credentials" body.
pub struct CurrentUser(pub Arc<Profile>);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    Arc<IdentityResolver>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<IdentityResolver>::from_ref(state);

        let token = bearer_token(parts).ok_or(AuthError::MissingCredentials)?;
        let profile = resolver.resolve_current_user(token).await?;

        tracing::debug!(subject_id = %profile.id, "Request authenticated");
        Ok(CurrentUser(profile))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty())
}

// =============================================================================
// Health Endpoints
// =============================================================================

/// Routes `GET /health/auth` and `GET /health/auth/quick`.
pub fn health_router(resolver: Arc<IdentityResolver>) -> Router {
    Router::new()
        .route("/health/auth", get(auth_health_handler))
        .route("/health/auth/quick", get(quick_health_handler))
        .with_state(resolver)
}

/// Full health report.
pub async fn auth_health_handler(State(resolver): State<Arc<IdentityResolver>>) -> Response {
    Json(resolver.health_report().await).into_response()
}

/// Liveness answer for load balancers; `503` when the primary store is unreachable.
pub async fn quick_health_handler(State(resolver): State<Arc<IdentityResolver>>) -> Response {
    let health = resolver.quick_health().await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Request};

    use super::*;

    fn parts(authorization: Option<&'static str>) -> Parts {
        let mut builder = Request::builder().uri("/me");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, HeaderValue::from_static(value));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Bearer   "))), None);
        assert_eq!(bearer_token(&parts(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("BEARER abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(Some("Bearerabc"))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
