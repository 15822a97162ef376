//! The protected dashboard page: a session gate plus team bootstrap.
//!
//! Both network calls (session probe, store access) are raced against the
//! auth-event stream, so a `SIGNED_OUT` that lands mid-call is acted on
//! when it arrives rather than after the call returns.

use std::sync::Arc;

use serde::Serialize;
use tokio::pin;
use tracing::debug;

use crate::auth::{AuthError, AuthEvent, Identity, IdentityOracle, Session};
use crate::bootstrap::{ProvisionError, TeamBootstrap};
use crate::gate::{GateDisplay, NavigationIntent, Navigator, ProbeOutcome, Routes, SessionGate, Surface};
use crate::models::{MemberTeam, Role, Team};
use crate::store::{StoreError, TeamStore};

/// Everything the dashboard renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ViewState {
    Loading,
    Redirecting { path: String },
    Ready {
        identity: Option<Identity>,
        teams: Vec<MemberTeam>,
        primary_team: Option<Team>,
        primary_role: Option<Role>,
        fetch_error: Option<String>,
        create_pending: bool,
        create_error: Option<String>,
        orphaned_team: Option<String>,
    },
}

enum Signal<T> {
    Done(T),
    Event(AuthEvent),
}

pub struct DashboardView {
    gate: SessionGate,
    bootstrap: TeamBootstrap,
}

impl DashboardView {
    /// Mount the page. Subscribes to auth events immediately.
    pub fn mount(
        oracle: Arc<dyn IdentityOracle>,
        store: Arc<dyn TeamStore>,
        navigator: Arc<dyn Navigator>,
        routes: Routes,
    ) -> Self {
        Self {
            gate: SessionGate::activate(oracle, navigator, routes, Surface::Dashboard),
            bootstrap: TeamBootstrap::new(store),
        }
    }

    /// Probe the session and, if the visitor stays, load their teams.
    ///
    /// A failed team fetch leaves the page ready with empty data; only the
    /// probe can send the visitor away. The session is looked up once per
    /// page, so calling this again returns the first outcome.
    pub async fn start(&mut self) -> ProbeOutcome {
        if let Some(outcome) = self.gate.probe_outcome() {
            debug!("Dashboard already started");
            return outcome.clone();
        }

        let oracle = self.gate.oracle();
        let probe = async move { oracle.get_session().await };
        pin!(probe);

        let result: Result<Option<Session>, AuthError> = loop {
            let signal = tokio::select! {
                result = &mut probe => Signal::Done(result),
                Some(event) = self.gate.next_event(), if self.gate.is_listening() => Signal::Event(event),
            };
            match signal {
                Signal::Done(result) => break result,
                Signal::Event(event) => {
                    self.gate.on_auth_event(event);
                }
            }
        };

        let outcome = self.gate.apply_probe(result);
        if let ProbeOutcome::Authenticated(identity) = &outcome {
            if !self.gate.is_latched() {
                let _ = self.load_teams(&identity.id).await;
            }
        }
        outcome
    }

    /// Re-read the team list for the current identity.
    pub async fn refresh_teams(&mut self) -> Result<usize, StoreError> {
        let user_id = self
            .gate
            .identity()
            .map(|i| i.id.clone())
            .ok_or(StoreError::NotAuthenticated)?;
        self.load_teams(&user_id).await
    }

    async fn load_teams(&mut self, user_id: &str) -> Result<usize, StoreError> {
        let fetch = self.bootstrap.fetch_teams(user_id);
        pin!(fetch);
        loop {
            let signal = tokio::select! {
                result = &mut fetch => Signal::Done(result),
                Some(event) = self.gate.next_event(), if self.gate.is_listening() => Signal::Event(event),
            };
            match signal {
                Signal::Done(result) => return result,
                Signal::Event(event) => {
                    self.gate.on_auth_event(event);
                    if self.gate.is_latched() {
                        debug!(user_id, "Left the dashboard during team fetch");
                        return Ok(0);
                    }
                }
            }
        }
    }

    /// Provision a team owned by the signed-in visitor.
    ///
    /// Refused once the page is navigating away, whatever identity the gate
    /// still holds.
    pub async fn create_team(&mut self, name: &str) -> Result<Team, ProvisionError> {
        if self.gate.is_latched() {
            debug!("Dashboard is leaving, team not created");
            return Err(ProvisionError::TeamInsert(StoreError::NotAuthenticated));
        }
        let user_id = self
            .gate
            .identity()
            .map(|i| i.id.clone())
            .ok_or(ProvisionError::TeamInsert(StoreError::NotAuthenticated))?;

        let create = self.bootstrap.create_team(name, &user_id);
        pin!(create);
        loop {
            let signal = tokio::select! {
                result = &mut create => Signal::Done(result),
                Some(event) = self.gate.next_event(), if self.gate.is_listening() => Signal::Event(event),
            };
            match signal {
                Signal::Done(result) => return result,
                // Provisioning runs to completion; only navigation is decided here
                Signal::Event(event) => {
                    self.gate.on_auth_event(event);
                }
            }
        }
    }

    /// Wait for one auth event and act on it. `None` once the stream ends.
    pub async fn process_next_event(&mut self) -> Option<NavigationIntent> {
        let event = self.gate.next_event().await?;
        Some(self.gate.on_auth_event(event))
    }

    /// Act on every event already queued. Returns how many were handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.gate.try_next_event() {
            self.gate.on_auth_event(event);
            handled += 1;
        }
        handled
    }

    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        self.gate.sign_out().await
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn view_state(&self) -> ViewState {
        let state = self.bootstrap.state();
        match self.gate.display() {
            GateDisplay::Redirecting(path) => ViewState::Redirecting { path: path.clone() },
            GateDisplay::Loading => ViewState::Loading,
            GateDisplay::Ready if state.loading => ViewState::Loading,
            GateDisplay::Ready => ViewState::Ready {
                identity: self.gate.identity().cloned(),
                teams: state.memberships.clone(),
                primary_team: state.primary_team().cloned(),
                primary_role: state.primary_role(),
                fetch_error: state.fetch_error.clone(),
                create_pending: state.create_pending,
                create_error: state.create_error.clone(),
                orphaned_team: state.orphaned_team.clone(),
            },
        }
    }

    /// Discard the page and release its auth subscription.
    pub fn teardown(self) {
        self.gate.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSubscription, MemoryOracle, OAuthProvider};
    use crate::gate::RecordingNavigator;
    use crate::store::{InMemoryStore, StoreOp};
    use crate::Url;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    /// Answers session lookups only after a delay, so queued auth events
    /// always win the race.
    struct SlowOracle {
        inner: Arc<MemoryOracle>,
    }

    #[async_trait]
    impl IdentityOracle for SlowOracle {
        async fn get_session(&self) -> Result<Option<Session>, AuthError> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.inner.get_session().await
        }

        fn on_auth_state_change(&self) -> AuthSubscription {
            self.inner.on_auth_state_change()
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            self.inner.sign_out().await
        }

        async fn sign_in_with_oauth(
            &self,
            provider: OAuthProvider,
            redirect_to: &Url,
        ) -> Result<Url, AuthError> {
            self.inner.sign_in_with_oauth(provider, redirect_to).await
        }
    }

    fn session(user: &str) -> Session {
        Session {
            access_token: format!("token-{}", user),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            user: Identity {
                id: user.to_string(),
                email: Some(format!("{}@example.com", user)),
            },
        }
    }

    struct Harness {
        oracle: Arc<MemoryOracle>,
        store: Arc<InMemoryStore>,
        navigator: RecordingNavigator,
        view: DashboardView,
    }

    fn mount(oracle: MemoryOracle) -> Harness {
        let oracle = Arc::new(oracle);
        let store = Arc::new(InMemoryStore::new());
        let navigator = RecordingNavigator::new();
        let view = DashboardView::mount(
            oracle.clone(),
            store.clone(),
            Arc::new(navigator.clone()),
            Routes::default(),
        );
        Harness {
            oracle,
            store,
            navigator,
            view,
        }
    }

    fn mount_slow(oracle: MemoryOracle) -> Harness {
        let oracle = Arc::new(oracle);
        let store = Arc::new(InMemoryStore::new());
        let navigator = RecordingNavigator::new();
        let slow = SlowOracle {
            inner: oracle.clone(),
        };
        let view = DashboardView::mount(
            Arc::new(slow),
            store.clone(),
            Arc::new(navigator.clone()),
            Routes::default(),
        );
        Harness {
            oracle,
            store,
            navigator,
            view,
        }
    }

    #[tokio::test]
    async fn test_signed_in_visitor_sees_teams() {
        let mut h = mount(MemoryOracle::with_session(session("u1")));
        h.store.seed_team("Acme", "u1", Role::Admin);
        assert_eq!(h.view.view_state(), ViewState::Loading);

        let outcome = h.view.start().await;
        assert!(matches!(outcome, ProbeOutcome::Authenticated(_)));
        assert_eq!(h.navigator.count(), 0);

        match h.view.view_state() {
            ViewState::Ready {
                teams,
                primary_role,
                fetch_error,
                ..
            } => {
                assert_eq!(teams.len(), 1);
                assert_eq!(primary_role, Some(Role::Admin));
                assert!(fetch_error.is_none());
            }
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_anonymous_visitor_is_redirected() {
        let mut h = mount(MemoryOracle::new());
        assert_eq!(h.view.start().await, ProbeOutcome::Unauthenticated);
        assert_eq!(h.navigator.calls(), vec!["/login"]);
        assert_eq!(
            h.view.view_state(),
            ViewState::Redirecting {
                path: "/login".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_renders_ready_without_navigation() {
        let mut h = mount(MemoryOracle::with_session(session("u1")));
        h.store.fail_next(StoreOp::SelectMemberships);

        h.view.start().await;
        assert_eq!(h.navigator.count(), 0);
        match h.view.view_state() {
            ViewState::Ready {
                teams, fetch_error, ..
            } => {
                assert!(teams.is_empty());
                assert!(fetch_error.is_some());
            }
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signed_out_during_start_navigates_once() {
        let mut h = mount(MemoryOracle::with_session(session("u1")));
        h.oracle.emit(AuthEvent::SignedOut);

        h.view.start().await;
        h.view.process_pending_events();
        assert_eq!(h.navigator.calls(), vec!["/login"]);
        assert!(matches!(h.view.view_state(), ViewState::Redirecting { .. }));
    }

    #[tokio::test]
    async fn test_signed_out_before_slow_lookup_blocks_writes() {
        let mut h = mount_slow(MemoryOracle::with_session(session("u1")));
        h.oracle.emit(AuthEvent::SignedOut);

        // The lookup still finds the session; the queued event got there first
        let outcome = h.view.start().await;
        assert!(matches!(outcome, ProbeOutcome::Authenticated(_)));
        assert_eq!(h.navigator.calls(), vec!["/login"]);
        assert!(h.view.gate().identity().is_none());
        assert_eq!(
            h.view.view_state(),
            ViewState::Redirecting {
                path: "/login".to_string()
            }
        );

        let err = h.view.create_team("Acme").await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::TeamInsert(StoreError::NotAuthenticated)
        ));
        assert!(h.store.teams().is_empty());
        assert_eq!(h.oracle.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_looks_up_session_once() {
        let mut h = mount(MemoryOracle::with_session(session("u1")));
        h.store.seed_team("Acme", "u1", Role::Admin);

        let first = h.view.start().await;
        h.store.seed_team("Globex", "u1", Role::Member);
        let second = h.view.start().await;

        assert_eq!(first, second);
        assert_eq!(h.oracle.probe_count(), 1);
        match h.view.view_state() {
            ViewState::Ready { teams, .. } => assert_eq!(teams.len(), 1),
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_team_appends_admin_entry() {
        let mut h = mount(MemoryOracle::with_session(session("u1")));
        h.view.start().await;

        let team = h.view.create_team("  Acme ").await.unwrap();
        assert_eq!(team.name, "Acme");
        match h.view.view_state() {
            ViewState::Ready {
                teams,
                primary_team,
                create_pending,
                ..
            } => {
                assert_eq!(teams.len(), 1);
                assert_eq!(teams[0].role, Role::Admin);
                assert_eq!(primary_team.map(|t| t.id), Some(team.id));
                assert!(!create_pending);
            }
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_team_requires_identity() {
        let mut h = mount(MemoryOracle::new());
        h.view.start().await;
        let err = h.view.create_team("Acme").await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::TeamInsert(StoreError::NotAuthenticated)
        ));
        assert!(h.store.teams().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_with_listener_navigates_once() {
        let mut h = mount(MemoryOracle::with_session(session("u1")));
        h.view.start().await;

        h.view.sign_out().await.unwrap();
        h.view.process_pending_events();
        assert_eq!(h.navigator.calls(), vec!["/login"]);
    }

    #[tokio::test]
    async fn test_teardown_releases_subscription() {
        let h = mount(MemoryOracle::with_session(session("u1")));
        assert_eq!(h.oracle.listener_count(), 1);

        h.view.teardown();
        assert_eq!(h.oracle.listener_count(), 0);
        h.oracle.emit(AuthEvent::SignedOut);
        assert_eq!(h.navigator.count(), 0);
    }

    #[test]
    fn test_view_state_serializes_with_status_tag() {
        let json = serde_json::to_value(ViewState::Redirecting {
            path: "/login".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "redirecting");
        assert_eq!(json["path"], "/login");
    }
}
