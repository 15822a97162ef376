//! API client for the hosted auth and table services.
//!
//! `SupabaseClient` is both the identity oracle (it holds the current session
//! in memory and broadcasts auth events) and the team data store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, AuthEvent, AuthHub, AuthSubscription, Identity, IdentityOracle, OAuthProvider, Session};
use crate::models::{MemberTeam, NewMembership, NewTeam, Team, TeamMembership};
use crate::store::{StoreError, TeamStore};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Session lifetime assumed when the token response omits both expiry fields.
const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

/// Header carrying the project's public API key
const APIKEY_HEADER: &str = "apikey";

/// Columns read for the dashboard: the role plus the embedded team row
const MEMBERSHIP_SELECT: &str = "role,teams(id,name,created_at,updated_at)";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Identity,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(|| {
                now + chrono::Duration::seconds(self.expires_in.unwrap_or(DEFAULT_SESSION_TTL_SECS))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

/// Result of a sign-up request.
#[derive(Debug)]
pub enum SignUpOutcome {
    /// The account must be confirmed from the emailed link before signing in
    ConfirmationSent,
    /// The project auto-confirms accounts; the visitor is signed in
    SignedIn(Session),
}

/// API client for the hosted backend.
/// Clone is cheap - clones share the connection pool, session and listeners.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: Url,
    anon_key: Arc<str>,
    session: Arc<Mutex<Option<Session>>>,
    hub: AuthHub,
}

impl SupabaseClient {
    /// Create a new client for the project at `base_url`
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, ApiError> {
        if anon_key.trim().is_empty() {
            return Err(ApiError::InvalidConfig("anon key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: Self::normalize_base_url(base_url)?,
            anon_key: Arc::from(anon_key.trim()),
            session: Arc::new(Mutex::new(None)),
            hub: AuthHub::new(),
        })
    }

    /// Parse the project URL and make sure relative joins keep its path
    fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
        let mut url = Url::parse(raw.trim())
            .map_err(|e| ApiError::InvalidConfig(format!("project URL {:?}: {}", raw, e)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidConfig(format!("endpoint {}: {}", path, e)))
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_session(&self) -> Option<Session> {
        self.session_slot().clone()
    }

    fn store_session(&self, session: Option<Session>) {
        *self.session_slot() = session;
    }

    /// Bearer token for table requests
    fn access_token(&self) -> Result<String, StoreError> {
        self.current_session()
            .map(|s| s.access_token)
            .ok_or(StoreError::NotAuthenticated)
    }

    fn membership_query_url(&self, user_id: &str) -> Result<Url, ApiError> {
        let mut url = self.endpoint("rest/v1/team_members")?;
        url.query_pairs_mut()
            .append_pair("select", MEMBERSHIP_SELECT)
            .append_pair("user_id", &format!("eq.{}", user_id));
        Ok(url)
    }

    fn authorize_url(&self, provider: OAuthProvider, redirect_to: &Url) -> Result<Url, ApiError> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    // =========================================================================
    // Auth endpoints
    // =========================================================================

    /// Sign in with email and password; listeners receive `SIGNED_IN`
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let url = self.endpoint("auth/v1/token?grant_type=password")?;
        let body = PasswordCredentials { email, password };

        let response = self
            .execute(|| self.client.post(url.clone()).header(APIKEY_HEADER, &*self.anon_key).json(&body))
            .await
            .map_err(|e| match e {
                ApiError::BadRequest(_) | ApiError::Unauthorized => AuthError::InvalidCredentials,
                other => AuthError::Api(other),
            })?;

        let token: TokenResponse = Self::parse_json(response).await?;
        let session = token.into_session(Utc::now());
        info!(user_id = %session.user.id, "Signed in with password");

        self.store_session(Some(session.clone()));
        self.hub.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    /// Create an account. The confirmation email links back to `email_redirect_to`.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        email_redirect_to: &Url,
    ) -> Result<SignUpOutcome, AuthError> {
        let mut url = self.endpoint("auth/v1/signup")?;
        url.query_pairs_mut()
            .append_pair("redirect_to", email_redirect_to.as_str());
        let body = PasswordCredentials { email, password };

        let response = self
            .execute(|| self.client.post(url.clone()).header(APIKEY_HEADER, &*self.anon_key).json(&body))
            .await?;

        let value: serde_json::Value = Self::parse_json(response).await?;
        if value.get("access_token").is_none() {
            info!("Sign-up accepted, awaiting email confirmation");
            return Ok(SignUpOutcome::ConfirmationSent);
        }

        let token: TokenResponse = serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("sign-up session: {}", e)))?;
        let session = token.into_session(Utc::now());
        self.store_session(Some(session.clone()));
        self.hub.emit(AuthEvent::SignedIn(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }

    /// Exchange the refresh token for a new session; listeners receive
    /// `TOKEN_REFRESHED`
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .current_session()
            .and_then(|s| s.refresh_token)
            .ok_or_else(|| AuthError::SessionLookup("no refresh token available".to_string()))?;

        let url = self.endpoint("auth/v1/token?grant_type=refresh_token")?;
        let body = RefreshGrant {
            refresh_token: &refresh_token,
        };
        let response = self
            .execute(|| self.client.post(url.clone()).header(APIKEY_HEADER, &*self.anon_key).json(&body))
            .await?;

        let token: TokenResponse = Self::parse_json(response).await?;
        let session = token.into_session(Utc::now());
        debug!(user_id = %session.user.id, minutes = session.minutes_until_expiry(), "Session refreshed");

        self.store_session(Some(session.clone()));
        self.hub.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request, backing off and resending while rate limited.
    /// `build` is called once per attempt.
    async fn execute<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn parse_json<T: DeserializeOwned + Send>(response: Response) -> Result<T, ApiError> {
        let url = response.url().clone();
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{} from {}", e, url.path())))
    }

    /// Insert one row and return the stored representation
    async fn insert_row<B, T>(&self, table: &'static str, row: &B) -> Result<T, StoreError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let token = self.access_token()?;
        let url = self.endpoint(&format!("rest/v1/{}", table))?;

        let response = self
            .execute(|| {
                self.client
                    .post(url.clone())
                    .header(APIKEY_HEADER, &*self.anon_key)
                    .header("Prefer", "return=representation")
                    .bearer_auth(&token)
                    .json(row)
            })
            .await?;

        let mut rows: Vec<T> = Self::parse_json(response).await?;
        if rows.is_empty() {
            return Err(StoreError::EmptyInsert { table });
        }
        Ok(rows.swap_remove(0))
    }
}

#[async_trait]
impl IdentityOracle for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };

        if !session.needs_refresh() {
            return Ok(Some(session));
        }

        if session.refresh_token.is_some() {
            match self.refresh_session().await {
                Ok(fresh) => return Ok(Some(fresh)),
                Err(e) if !session.is_expired() => {
                    warn!(error = %e, "Session refresh failed, using current token");
                    return Ok(Some(session));
                }
                Err(e) => warn!(error = %e, "Session refresh failed"),
            }
        } else if !session.is_expired() {
            return Ok(Some(session));
        }

        debug!(user_id = %session.user.id, "Session expired");
        self.store_session(None);
        Ok(None)
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let current = self.current_session().filter(|s| !s.is_expired());
        self.hub
            .subscribe_with(Some(AuthEvent::InitialSession(current)))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let result = match self.current_session() {
            Some(session) => {
                let url = self.endpoint("auth/v1/logout")?;
                self.execute(|| {
                    self.client
                        .post(url.clone())
                        .header(APIKEY_HEADER, &*self.anon_key)
                        .bearer_auth(&session.access_token)
                })
                .await
                .map(|_| ())
                .map_err(|e| AuthError::SignOut(e.to_string()))
            }
            None => Ok(()),
        };

        // The local session ends even when revocation fails.
        self.store_session(None);
        self.hub.emit(AuthEvent::SignedOut);
        info!("Signed out");
        result
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, AuthError> {
        Ok(self.authorize_url(provider, redirect_to)?)
    }
}

#[async_trait]
impl TeamStore for SupabaseClient {
    async fn memberships_for_user(&self, user_id: &str) -> Result<Vec<MemberTeam>, StoreError> {
        let token = self.access_token()?;
        let url = self.membership_query_url(user_id)?;

        let response = self
            .execute(|| {
                self.client
                    .get(url.clone())
                    .header(APIKEY_HEADER, &*self.anon_key)
                    .bearer_auth(&token)
            })
            .await?;

        let rows: Vec<MemberTeam> = Self::parse_json(response).await?;
        debug!(user_id = user_id, count = rows.len(), "Fetched memberships");
        Ok(rows)
    }

    async fn insert_team(&self, team: &NewTeam) -> Result<Team, StoreError> {
        self.insert_row("teams", team).await
    }

    async fn insert_membership(
        &self,
        membership: &NewMembership,
    ) -> Result<TeamMembership, StoreError> {
        self.insert_row("team_members", membership).await
    }
}
