//! In-process identity oracle.
//!
//! Holds one session in memory and behaves like the hosted provider from the
//! gate's point of view: new subscribers get `INITIAL_SESSION`, sign-in and
//! sign-out are broadcast, expired sessions read as "no session". Failures
//! can be scripted for the next probe or sign-out.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use super::{AuthError, AuthEvent, AuthHub, AuthSubscription, IdentityOracle, OAuthProvider, Session};

/// Base for the authorization URLs handed out by [`MemoryOracle`]
const MEMORY_AUTHORIZE_URL: &str = "https://auth.invalid/authorize";

#[derive(Default)]
struct OracleState {
    session: Option<Session>,
    fail_next_probe: Option<String>,
    fail_next_sign_out: Option<String>,
    probe_count: usize,
    sign_out_count: usize,
}

#[derive(Default)]
pub struct MemoryOracle {
    hub: AuthHub,
    state: Mutex<OracleState>,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// An oracle that already holds `session`
    pub fn with_session(session: Session) -> Self {
        let oracle = Self::new();
        oracle.state().session = Some(session);
        oracle
    }

    fn state(&self) -> MutexGuard<'_, OracleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a session and broadcast `SIGNED_IN`
    pub fn sign_in(&self, session: Session) {
        self.state().session = Some(session.clone());
        self.hub.emit(AuthEvent::SignedIn(session));
    }

    /// Broadcast an arbitrary event without touching the stored session
    pub fn emit(&self, event: AuthEvent) -> usize {
        self.hub.emit(event)
    }

    /// Make the next `get_session` call fail with `message`
    pub fn fail_next_probe(&self, message: &str) {
        self.state().fail_next_probe = Some(message.to_string());
    }

    /// Make the next `sign_out` call fail with `message` (the local session
    /// is still cleared, as the hosted provider does)
    pub fn fail_next_sign_out(&self, message: &str) {
        self.state().fail_next_sign_out = Some(message.to_string());
    }

    pub fn has_session(&self) -> bool {
        self.state().session.is_some()
    }

    pub fn probe_count(&self) -> usize {
        self.state().probe_count
    }

    pub fn sign_out_count(&self) -> usize {
        self.state().sign_out_count
    }

    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }
}

#[async_trait]
impl IdentityOracle for MemoryOracle {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let mut state = self.state();
        state.probe_count += 1;
        if let Some(message) = state.fail_next_probe.take() {
            return Err(AuthError::SessionLookup(message));
        }
        Ok(state.session.clone().filter(|s| !s.is_expired()))
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let current = self.state().session.clone().filter(|s| !s.is_expired());
        self.hub
            .subscribe_with(Some(AuthEvent::InitialSession(current)))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let failure = {
            let mut state = self.state();
            state.sign_out_count += 1;
            state.session = None;
            state.fail_next_sign_out.take()
        };
        debug!(listeners = self.hub.listener_count(), "Memory oracle signing out");
        self.hub.emit(AuthEvent::SignedOut);
        match failure {
            Some(message) => Err(AuthError::SignOut(message)),
            None => Ok(()),
        }
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, AuthError> {
        Url::parse_with_params(
            MEMORY_AUTHORIZE_URL,
            &[("provider", provider.as_str()), ("redirect_to", redirect_to.as_str())],
        )
        .map_err(|e| AuthError::InvalidUrl(e.to_string()))
    }
}
