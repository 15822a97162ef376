use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};

use super::{NavigationIntent, NavigationLatch, Navigator, Routes, Surface};
use crate::auth::{AuthError, AuthEvent, AuthSubscription, Identity, IdentityOracle, OAuthProvider, Session};

/// What the owning page should render while the gate works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDisplay {
    /// Probe outstanding
    Loading,
    /// Probe answered and the page stays
    Ready,
    /// A navigation was committed; the page is on its way out
    Redirecting(String),
}

/// Result of the one-shot session probe, after the gate has acted on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Authenticated(Identity),
    Unauthenticated,
    /// The oracle failed; treated as no session
    Failed(String),
}

/// Per-page mediator between the session probe and the auth-event stream.
///
/// The auth subscription is owned here and released when the gate is torn
/// down or dropped. Navigation needs `&mut self`, so once the gate is gone
/// nothing can navigate on its behalf.
pub struct SessionGate {
    oracle: Arc<dyn IdentityOracle>,
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    surface: Surface,
    latch: NavigationLatch,
    identity: Option<Identity>,
    display: GateDisplay,
    subscription: Option<AuthSubscription>,
    /// Set by the first probe answer; later answers are ignored
    probed: Option<ProbeOutcome>,
}

impl SessionGate {
    /// Mount a gate on `surface` and subscribe to auth events.
    pub fn activate(
        oracle: Arc<dyn IdentityOracle>,
        navigator: Arc<dyn Navigator>,
        routes: Routes,
        surface: Surface,
    ) -> Self {
        let subscription = oracle.on_auth_state_change();
        debug!(surface = ?surface, "Session gate activated");
        Self {
            oracle,
            navigator,
            routes,
            surface,
            latch: NavigationLatch::new(),
            identity: None,
            display: GateDisplay::Loading,
            subscription: Some(subscription),
            probed: None,
        }
    }

    /// Shared handle to the oracle, for running the probe outside a borrow
    /// of the gate
    pub fn oracle(&self) -> Arc<dyn IdentityOracle> {
        Arc::clone(&self.oracle)
    }

    /// Ask the oracle for the current session and act on the answer.
    ///
    /// Only the first call reaches the oracle; later calls return the first
    /// outcome unchanged.
    pub async fn probe(&mut self) -> ProbeOutcome {
        if let Some(outcome) = &self.probed {
            debug!(surface = ?self.surface, "Session already probed, skipping");
            return outcome.clone();
        }
        let result = self.oracle.get_session().await;
        self.apply_probe(result)
    }

    /// The first probe's outcome, once it has arrived
    pub fn probe_outcome(&self) -> Option<&ProbeOutcome> {
        self.probed.as_ref()
    }

    /// Act on a probe answer obtained elsewhere (see [`SessionGate::oracle`]).
    ///
    /// An answer that lands after a navigation was committed is stale: it
    /// neither navigates nor restores the identity an event already cleared.
    pub fn apply_probe(&mut self, result: Result<Option<Session>, AuthError>) -> ProbeOutcome {
        if let Some(outcome) = &self.probed {
            debug!(surface = ?self.surface, "Ignoring repeated probe answer");
            return outcome.clone();
        }

        let stale = self.latch.is_latched();
        let intent = NavigationIntent::for_probe(&result);
        let outcome = match result {
            Ok(Some(session)) => {
                if stale {
                    debug!(user_id = %session.user.id, "Probe answered after navigation, identity unchanged");
                } else {
                    self.identity = Some(session.user.clone());
                }
                ProbeOutcome::Authenticated(session.user)
            }
            Ok(None) => ProbeOutcome::Unauthenticated,
            Err(e) => {
                warn!(error = %e, "Session probe failed, treating as signed out");
                ProbeOutcome::Failed(e.to_string())
            }
        };

        self.commit(intent, "probe");
        if !self.latch.is_latched() {
            self.display = GateDisplay::Ready;
        }
        self.probed = Some(outcome.clone());
        outcome
    }

    /// Act on one auth event. Returns the intent that was committed, if any.
    pub fn on_auth_event(&mut self, event: AuthEvent) -> NavigationIntent {
        match &event {
            AuthEvent::SignedOut | AuthEvent::InitialSession(None) => self.identity = None,
            other => {
                if let Some(session) = other.session() {
                    self.identity = Some(session.user.clone());
                }
            }
        }
        let intent = NavigationIntent::for_event(&event);
        self.commit(intent, event.kind().as_str())
    }

    /// Wait for the next auth event. `None` once the stream has ended or the
    /// gate stopped listening.
    pub async fn next_event(&mut self) -> Option<AuthEvent> {
        let subscription = self.subscription.as_mut()?;
        let event = subscription.recv().await;
        if event.is_none() {
            debug!("Auth event stream closed");
            self.subscription = None;
        }
        event
    }

    /// Take an already-queued auth event without waiting
    pub fn try_next_event(&mut self) -> Option<AuthEvent> {
        self.subscription.as_mut()?.try_recv()
    }

    pub fn is_listening(&self) -> bool {
        self.subscription.is_some()
    }

    /// Sign out through the oracle, then take the same latched path a
    /// `SIGNED_OUT` event would.
    ///
    /// The oracle clears its local session even when revocation fails, so
    /// the navigation happens either way and the error is handed back for
    /// display.
    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        let result = self.oracle.sign_out().await;
        if let Err(e) = &result {
            warn!(error = %e, "Sign-out reported an error");
        }
        self.identity = None;
        self.commit(NavigationIntent::GoToLogin, "sign_out");
        result
    }

    /// Start an OAuth sign-in. Returns the provider URL the visitor should
    /// be sent to; the provider redirects back to `redirected_from` (if it
    /// is a site path) or the dashboard.
    pub async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        origin: &Url,
        redirected_from: Option<&str>,
    ) -> Result<Url, AuthError> {
        let redirect_to = self.routes.oauth_redirect(origin, redirected_from)?;
        info!(provider = %provider, redirect_to = %redirect_to, "Starting OAuth sign-in");
        self.oracle.sign_in_with_oauth(provider, &redirect_to).await
    }

    /// Navigate for `intent` unless it targets this surface or the latch is
    /// already set.
    fn commit(&mut self, intent: NavigationIntent, source: &str) -> NavigationIntent {
        let intent = intent.resolve_on(self.surface);
        let Some(path) = self.routes.path_for(intent) else {
            return NavigationIntent::None;
        };
        if !self.latch.try_commit() {
            debug!(source, path, "Navigation already committed, ignoring signal");
            return NavigationIntent::None;
        }

        info!(source, path, surface = ?self.surface, "Navigating");
        self.navigator.navigate(path);
        self.display = GateDisplay::Redirecting(path.to_string());
        intent
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn display(&self) -> &GateDisplay {
        &self.display
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    pub fn is_latched(&self) -> bool {
        self.latch.is_latched()
    }

    /// Release the auth subscription and discard the gate.
    pub fn teardown(self) {
        debug!(surface = ?self.surface, latched = self.latch.is_latched(), "Session gate torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryOracle;
    use crate::gate::RecordingNavigator;
    use chrono::{Duration, Utc};

    fn session(user: &str) -> Session {
        Session {
            access_token: format!("token-{}", user),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            user: Identity {
                id: user.to_string(),
                email: Some(format!("{}@example.com", user)),
            },
        }
    }

    fn gate_on(
        surface: Surface,
        oracle: &Arc<MemoryOracle>,
    ) -> (SessionGate, RecordingNavigator) {
        let navigator = RecordingNavigator::new();
        let gate = SessionGate::activate(
            oracle.clone(),
            Arc::new(navigator.clone()),
            Routes::default(),
            surface,
        );
        (gate, navigator)
    }

    #[tokio::test]
    async fn test_probe_with_session_navigates_from_landing() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (mut gate, navigator) = gate_on(Surface::Landing, &oracle);

        let outcome = gate.probe().await;
        assert!(matches!(outcome, ProbeOutcome::Authenticated(ref id) if id.id == "u1"));
        assert_eq!(navigator.calls(), vec!["/dashboard"]);
        assert_eq!(gate.display(), &GateDisplay::Redirecting("/dashboard".to_string()));
    }

    #[tokio::test]
    async fn test_probe_with_session_stays_on_dashboard() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);

        gate.probe().await;
        assert_eq!(navigator.count(), 0);
        assert!(!gate.is_latched());
        assert_eq!(gate.display(), &GateDisplay::Ready);
        assert_eq!(gate.identity().map(|i| i.id.as_str()), Some("u1"));
    }

    #[tokio::test]
    async fn test_probe_failure_routes_to_login() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        oracle.fail_next_probe("timeout");
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);

        let outcome = gate.probe().await;
        assert!(matches!(outcome, ProbeOutcome::Failed(_)));
        assert_eq!(navigator.calls(), vec!["/login"]);
    }

    #[tokio::test]
    async fn test_no_session_on_login_page_stays() {
        let oracle = Arc::new(MemoryOracle::new());
        let (mut gate, navigator) = gate_on(Surface::Login, &oracle);

        assert_eq!(gate.probe().await, ProbeOutcome::Unauthenticated);
        assert_eq!(navigator.count(), 0);
        assert_eq!(gate.display(), &GateDisplay::Ready);

        // Signing in elsewhere moves the login page along
        oracle.sign_in(session("u1"));
        while let Some(event) = gate.next_event().await {
            if !gate.on_auth_event(event).is_none() {
                break;
            }
        }
        assert_eq!(navigator.calls(), vec!["/dashboard"]);
    }

    #[tokio::test]
    async fn test_initial_session_on_dashboard_does_not_latch() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);

        let initial = gate.next_event().await.expect("initial session");
        assert!(gate.on_auth_event(initial).is_none());
        assert!(!gate.is_latched());

        oracle.emit(AuthEvent::SignedOut);
        let event = gate.next_event().await.expect("signed out");
        assert_eq!(gate.on_auth_event(event), NavigationIntent::GoToLogin);
        assert_eq!(navigator.calls(), vec!["/login"]);
        assert!(gate.identity().is_none());
    }

    #[tokio::test]
    async fn test_later_signals_update_identity_only() {
        let oracle = Arc::new(MemoryOracle::new());
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);

        gate.probe().await;
        assert_eq!(navigator.calls(), vec!["/login"]);

        let intent = gate.on_auth_event(AuthEvent::SignedIn(session("u2")));
        assert!(intent.is_none());
        assert_eq!(gate.identity().map(|i| i.id.as_str()), Some("u2"));
        assert_eq!(navigator.count(), 1);
    }

    #[derive(Clone, Copy, Debug)]
    enum Signal {
        ProbeSession,
        ProbeEmpty,
        ProbeError,
        SignedIn,
        SignedOut,
        InitialSession,
        InitialEmpty,
        TokenRefreshed,
    }

    impl Signal {
        fn intent(self) -> NavigationIntent {
            match self {
                Signal::ProbeSession | Signal::SignedIn | Signal::InitialSession => {
                    NavigationIntent::GoToDashboard
                }
                Signal::ProbeEmpty | Signal::ProbeError | Signal::SignedOut => {
                    NavigationIntent::GoToLogin
                }
                Signal::InitialEmpty | Signal::TokenRefreshed => NavigationIntent::None,
            }
        }

        fn deliver(self, gate: &mut SessionGate) {
            match self {
                Signal::ProbeSession => {
                    gate.apply_probe(Ok(Some(session("u1"))));
                }
                Signal::ProbeEmpty => {
                    gate.apply_probe(Ok(None));
                }
                Signal::ProbeError => {
                    gate.apply_probe(Err(AuthError::SessionLookup("down".to_string())));
                }
                Signal::SignedIn => {
                    gate.on_auth_event(AuthEvent::SignedIn(session("u1")));
                }
                Signal::SignedOut => {
                    gate.on_auth_event(AuthEvent::SignedOut);
                }
                Signal::InitialSession => {
                    gate.on_auth_event(AuthEvent::InitialSession(Some(session("u1"))));
                }
                Signal::InitialEmpty => {
                    gate.on_auth_event(AuthEvent::InitialSession(None));
                }
                Signal::TokenRefreshed => {
                    gate.on_auth_event(AuthEvent::TokenRefreshed(session("u1")));
                }
            }
        }
    }

    fn permutations(items: &[Signal]) -> Vec<Vec<Signal>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_first_signal_wins_in_every_interleaving() {
        let routes = Routes::default();
        let sets: [&[Signal]; 4] = [
            &[Signal::ProbeError, Signal::SignedOut, Signal::SignedIn],
            &[Signal::ProbeSession, Signal::InitialEmpty, Signal::SignedOut, Signal::TokenRefreshed],
            &[Signal::ProbeEmpty, Signal::InitialSession, Signal::SignedIn, Signal::SignedOut],
            &[Signal::InitialEmpty, Signal::TokenRefreshed],
        ];

        for set in sets {
            for order in permutations(set) {
                let oracle = Arc::new(MemoryOracle::new());
                let (mut gate, navigator) = gate_on(Surface::Landing, &oracle);
                for signal in &order {
                    signal.deliver(&mut gate);
                }

                let expected: Vec<String> = order
                    .iter()
                    .map(|s| s.intent())
                    .find(|i| !i.is_none())
                    .and_then(|i| routes.path_for(i))
                    .map(str::to_string)
                    .into_iter()
                    .collect();
                assert_eq!(navigator.calls(), expected, "order {:?}", order);
            }
        }
    }

    #[tokio::test]
    async fn test_teardown_before_events_never_navigates() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (gate, navigator) = gate_on(Surface::Dashboard, &oracle);
        assert_eq!(oracle.listener_count(), 1);

        gate.teardown();
        assert_eq!(oracle.listener_count(), 0);

        assert_eq!(oracle.emit(AuthEvent::SignedOut), 0);
        oracle.sign_out().await.unwrap();
        assert_eq!(navigator.count(), 0);
    }

    #[tokio::test]
    async fn test_sign_out_with_queued_event_navigates_once() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);
        gate.probe().await;

        gate.sign_out().await.unwrap();
        // The oracle queued SIGNED_OUT behind INITIAL_SESSION
        while let Some(event) = gate.next_event().await {
            let done = matches!(event, AuthEvent::SignedOut);
            gate.on_auth_event(event);
            if done {
                break;
            }
        }
        assert_eq!(navigator.calls(), vec!["/login"]);
    }

    #[tokio::test]
    async fn test_sign_out_after_event_navigation_navigates_once() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);

        oracle.emit(AuthEvent::SignedOut);
        let _initial = gate.next_event().await;
        let event = gate.next_event().await.expect("signed out");
        assert_eq!(gate.on_auth_event(event), NavigationIntent::GoToLogin);

        gate.sign_out().await.unwrap();
        assert_eq!(navigator.calls(), vec!["/login"]);
    }

    #[tokio::test]
    async fn test_sign_out_failure_still_leaves() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        oracle.fail_next_sign_out("revocation failed");
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);
        gate.probe().await;

        assert!(matches!(gate.sign_out().await, Err(AuthError::SignOut(_))));
        assert_eq!(navigator.calls(), vec!["/login"]);
        assert!(gate.identity().is_none());
        assert_eq!(oracle.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn test_late_session_answer_keeps_identity_cleared() {
        let oracle = Arc::new(MemoryOracle::new());
        let (mut gate, navigator) = gate_on(Surface::Dashboard, &oracle);

        assert_eq!(gate.on_auth_event(AuthEvent::SignedOut), NavigationIntent::GoToLogin);
        let outcome = gate.apply_probe(Ok(Some(session("u1"))));

        assert!(matches!(outcome, ProbeOutcome::Authenticated(_)));
        assert!(gate.identity().is_none());
        assert_eq!(navigator.calls(), vec!["/login"]);
        assert_eq!(gate.display(), &GateDisplay::Redirecting("/login".to_string()));
    }

    #[tokio::test]
    async fn test_landing_session_sets_identity_while_navigating() {
        let oracle = Arc::new(MemoryOracle::with_session(session("u1")));
        let (mut gate, _navigator) = gate_on(Surface::Landing, &oracle);

        gate.probe().await;
        assert!(gate.is_latched());
        assert_eq!(gate.identity().map(|i| i.id.as_str()), Some("u1"));
    }

    #[tokio::test]
    async fn test_session_is_looked_up_once() {
        let oracle = Arc::new(MemoryOracle::new());
        let (mut gate, navigator) = gate_on(Surface::Login, &oracle);
        assert!(gate.probe_outcome().is_none());

        assert_eq!(gate.probe().await, ProbeOutcome::Unauthenticated);
        oracle.sign_in(session("u1"));
        assert_eq!(gate.probe().await, ProbeOutcome::Unauthenticated);
        assert_eq!(gate.apply_probe(Ok(Some(session("u1")))), ProbeOutcome::Unauthenticated);

        assert_eq!(oracle.probe_count(), 1);
        assert_eq!(gate.probe_outcome(), Some(&ProbeOutcome::Unauthenticated));
        assert!(gate.identity().is_none());
        assert_eq!(navigator.count(), 0);
    }

    #[tokio::test]
    async fn test_oauth_sign_in_targets_dashboard() {
        let oracle = Arc::new(MemoryOracle::new());
        let (gate, navigator) = gate_on(Surface::Login, &oracle);
        let origin = Url::parse("https://app.example.com").unwrap();

        let url = gate
            .sign_in_with_oauth(OAuthProvider::Github, &origin, None)
            .await
            .unwrap();
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "redirect_to" && v == "https://app.example.com/dashboard"));
        assert_eq!(navigator.count(), 0);
    }
}
