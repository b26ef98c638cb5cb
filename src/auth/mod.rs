//! Caller authentication for BeanVault
//!
//! Tokens only establish who the caller is. What the caller may do is decided
//! by the registry's capability checks.

mod jwt;

pub use jwt::{generate_token, verify_token, Claims, JwtError};

/// Secret used to verify caller tokens
#[derive(Clone)]
pub struct AuthConfig {
    jwt_secret: String,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}
