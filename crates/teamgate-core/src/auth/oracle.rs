use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;

use super::{AuthSubscription, Session};
use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session lookup failed: {0}")]
    SessionLookup(String),

    #[error("Sign-out failed: {0}")]
    SignOut(String),

    #[error("Unsupported OAuth provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Auth request failed: {0}")]
    Api(#[from] ApiError),
}

/// Third-party identity providers offered on the login surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            other => Err(AuthError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// The identity provider as the session gate sees it.
///
/// Treated as an eventually-consistent oracle: the gate asks, listens, and
/// never constructs or expires a session itself.
#[async_trait]
pub trait IdentityOracle: Send + Sync {
    /// Current session, `None` when signed out or expired
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Subscribe to auth changes. The first delivery is `INITIAL_SESSION`.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// End the session; listeners receive `SIGNED_OUT`
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// URL the visitor must open to sign in with `provider`. After consent
    /// the provider sends them to `redirect_to`.
    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, AuthError>;
}
