//! Authentication for nodelink sessions
//!
//! Provides the `AuthProvider` trait consulted by the accepting side when the
//! first message of a fresh connection arrives, and `SharedSecretAuth`, which
//! accepts exactly one configured password.

use async_trait::async_trait;

use crate::messages::INCORRECT_PASSWORD;

/// Result of an authentication attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResult {
    Success,

    /// Authentication failed with the reason sent back to the peer
    Failure { error_message: String },
}

impl AuthResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthResult::Success)
    }
}

/// Authentication provider trait
///
/// Implement this trait to plug in a different credential check. The
/// provider receives the `password` field of the handshake, or `None` when
/// the first message carried no password at all.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, password: Option<&str>) -> AuthResult;
}

/// Accepts handshakes whose password equals the configured shared secret
#[derive(Clone)]
pub struct SharedSecretAuth {
    secret: String,
}

impl SharedSecretAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedSecretAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretAuth").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for SharedSecretAuth {
    async fn authenticate(&self, password: Option<&str>) -> AuthResult {
        match password {
            Some(candidate) if constant_time_eq(candidate.as_bytes(), self.secret.as_bytes()) => {
                AuthResult::Success
            }
            _ => AuthResult::Failure {
                error_message: INCORRECT_PASSWORD.to_string(),
            },
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
