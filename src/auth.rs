//! Credentials and session token storage.
//!
//! The token store is shared by every clone of an [`ApiClient`] and by the
//! streaming task, so replacement is atomic with respect to readers: callers
//! take an [`Arc`] snapshot per request and never hold the lock across I/O.
//!
//! [`ApiClient`]: crate::client::ApiClient

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

/// Path of the token-issuing endpoint.
pub const AUTH_PATH: &str = "/Authentication/v1/Tokens";
/// Scheme used in the `Authorization` header.
pub const AUTH_SCHEME: &str = "FCF";

/// Credentials presented to the authentication endpoint.
#[derive(Clone)]
pub struct Credentials {
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: SecretString,
    /// Agent to act as. Empty when authenticating as a super user.
    pub agent_id: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: SecretString,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password,
            agent_id: agent_id.into(),
        }
    }

    pub(crate) fn request_body(&self) -> AuthRequest<'_> {
        AuthRequest {
            username: &self.username,
            password: self.password.expose_secret(),
            agent_id: &self.agent_id,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
    #[serde(rename = "AgentId")]
    agent_id: &'a str,
}

/// Holds at most one session token.
#[derive(Default)]
pub struct TokenStore {
    current: RwLock<Option<Arc<SecretString>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token held right now, if any.
    pub fn snapshot(&self) -> Option<Arc<SecretString>> {
        self.current.read().clone()
    }

    pub fn is_present(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replaces the held token with a freshly issued one.
    pub fn replace(&self, token: SecretString) {
        *self.current.write() = Some(Arc::new(token));
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    /// Formats the `Authorization` header value for the held token.
    pub(crate) fn authorization_header(&self) -> Option<String> {
        self.snapshot()
            .map(|token| format!("{AUTH_SCHEME} {}", token.expose_secret()))
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("present", &self.is_present())
            .finish()
    }
}
