//! Authentication middleware
//!
//! Bearer token verification and caller extraction.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::auth::{verify_token, AuthConfig, JwtError};
use crate::error::ApiError;

/// Caller identity taken from a verified bearer token
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: String,
    pub jti: String,
}

/// Extractor for authenticated callers
///
/// ```rust,ignore
/// async fn protected_handler(caller: Caller) -> impl IntoResponse {
///     format!("Hello, {}", caller.identity)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    AuthConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Unauthenticated(
                        "Authorization header with Bearer token required".to_string(),
                    )
                })?;

        let auth = AuthConfig::from_ref(state);

        let claims = verify_token(bearer.token(), auth.jwt_secret()).map_err(|e| match e {
            JwtError::TokenExpired => ApiError::Unauthenticated("Token has expired".to_string()),
            _ => ApiError::Unauthenticated("Invalid token".to_string()),
        })?;

        Ok(Caller {
            identity: claims.sub,
            jti: claims.jti,
        })
    }
}
