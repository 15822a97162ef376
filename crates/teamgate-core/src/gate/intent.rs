use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthEvent, Session};

/// A one-shot decision to move the visitor to another page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationIntent {
    None,
    GoToLogin,
    GoToDashboard,
}

impl NavigationIntent {
    /// What an auth event asks for, before surface filtering.
    ///
    /// `SIGNED_OUT` goes to login; `SIGNED_IN` and `INITIAL_SESSION` with a
    /// session go to the dashboard; everything else only updates identity.
    pub fn for_event(event: &AuthEvent) -> Self {
        match event {
            AuthEvent::SignedOut => NavigationIntent::GoToLogin,
            AuthEvent::SignedIn(_) | AuthEvent::InitialSession(Some(_)) => {
                NavigationIntent::GoToDashboard
            }
            AuthEvent::InitialSession(None)
            | AuthEvent::TokenRefreshed(_)
            | AuthEvent::UserUpdated(_)
            | AuthEvent::PasswordRecovery(_) => NavigationIntent::None,
        }
    }

    /// What a session probe asks for. A failed probe counts as no session.
    pub fn for_probe(result: &Result<Option<Session>, AuthError>) -> Self {
        match result {
            Ok(Some(_)) => NavigationIntent::GoToDashboard,
            Ok(None) | Err(_) => NavigationIntent::GoToLogin,
        }
    }

    /// Drop intents that point at the page already showing.
    pub fn resolve_on(self, surface: Surface) -> Self {
        match (self, surface) {
            (NavigationIntent::GoToLogin, Surface::Login)
            | (NavigationIntent::GoToDashboard, Surface::Dashboard) => NavigationIntent::None,
            (intent, _) => intent,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, NavigationIntent::None)
    }
}

/// The pages that run a session gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Entry page: sends everyone somewhere else
    Landing,
    /// Sign-in page: leaves once a session appears
    Login,
    /// Protected page: leaves once the session ends
    Dashboard,
}

/// Paths of the gated pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Routes {
    pub landing: String,
    pub login: String,
    pub dashboard: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            landing: "/".to_string(),
            login: "/login".to_string(),
            dashboard: "/dashboard".to_string(),
        }
    }
}

impl Routes {
    pub fn path_for(&self, intent: NavigationIntent) -> Option<&str> {
        match intent {
            NavigationIntent::None => None,
            NavigationIntent::GoToLogin => Some(&self.login),
            NavigationIntent::GoToDashboard => Some(&self.dashboard),
        }
    }

    pub fn path_of(&self, surface: Surface) -> &str {
        match surface {
            Surface::Landing => &self.landing,
            Surface::Login => &self.login,
            Surface::Dashboard => &self.dashboard,
        }
    }

    /// Which surface a navigated-to path lands on. Query strings and a
    /// trailing slash are ignored.
    pub fn surface_for(&self, path: &str) -> Option<Surface> {
        let path = path.split(|c| c == '?' || c == '#').next().unwrap_or_default();
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        [Surface::Landing, Surface::Login, Surface::Dashboard]
            .into_iter()
            .find(|s| {
                let own = self.path_of(*s).trim_end_matches('/');
                let own = if own.is_empty() { "/" } else { own };
                own == trimmed
            })
    }

    /// Where the identity provider should send the visitor after OAuth
    /// consent: `redirected_from` when it is a site-relative path, otherwise
    /// the dashboard.
    pub fn oauth_redirect(&self, origin: &Url, redirected_from: Option<&str>) -> Result<Url, AuthError> {
        let target = redirected_from
            .filter(|p| p.starts_with('/') && !p.starts_with("//") && !p.contains('\\'))
            .unwrap_or(self.dashboard.as_str());
        origin
            .join(target)
            .map_err(|e| AuthError::InvalidUrl(format!("{}{}: {}", origin, target, e)))
    }
}
