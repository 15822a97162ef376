//! Auth-change notifications and their fan-out to subscribers.
//!
//! The identity provider reports changes through loosely-typed callbacks.
//! Here they are a closed enumeration carrying a typed session, delivered to
//! each subscriber through its own unbounded channel. A subscription is
//! released when it is dropped, so a discarded view can never receive (and
//! act on) another event.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::Session;

/// An auth-change notification.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// First event every subscriber receives: the session at subscribe time
    InitialSession(Option<Session>),
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
    PasswordRecovery(Session),
}

/// Payload-free discriminant of [`AuthEvent`], named as the provider names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::InitialSession => "INITIAL_SESSION",
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEventKind::UserUpdated => "USER_UPDATED",
            AuthEventKind::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthEvent {
    pub fn kind(&self) -> AuthEventKind {
        match self {
            AuthEvent::InitialSession(_) => AuthEventKind::InitialSession,
            AuthEvent::SignedIn(_) => AuthEventKind::SignedIn,
            AuthEvent::SignedOut => AuthEventKind::SignedOut,
            AuthEvent::TokenRefreshed(_) => AuthEventKind::TokenRefreshed,
            AuthEvent::UserUpdated(_) => AuthEventKind::UserUpdated,
            AuthEvent::PasswordRecovery(_) => AuthEventKind::PasswordRecovery,
        }
    }

    /// The session carried by the event, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::InitialSession(session) => session.as_ref(),
            AuthEvent::SignedIn(session)
            | AuthEvent::TokenRefreshed(session)
            | AuthEvent::UserUpdated(session)
            | AuthEvent::PasswordRecovery(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<AuthEvent>>,
}

/// Fan-out point for auth events. Cheap to clone; clones share listeners.
#[derive(Clone, Default)]
pub struct AuthHub {
    inner: Arc<Mutex<HubInner>>,
}

fn lock(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuthHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&self) -> AuthSubscription {
        self.subscribe_with(None)
    }

    /// Register a listener whose first delivery is `initial`.
    ///
    /// The initial event is queued before the listener becomes visible to
    /// `emit`, so it is always observed first.
    pub fn subscribe_with(&self, initial: Option<AuthEvent>) -> AuthSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(event) = initial {
            // Receiver is alive in this scope; send cannot fail.
            let _ = tx.send(event);
        }

        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, tx);
        debug!(listener = id, "Auth listener subscribed");

        AuthSubscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live listener. Returns how many received it.
    pub fn emit(&self, event: AuthEvent) -> usize {
        let kind = event.kind();
        let mut inner = lock(&self.inner);
        inner
            .listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = inner.listeners.len();
        trace!(event = %kind, delivered, "Auth event emitted");
        delivered
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

/// A live registration with an [`AuthHub`].
///
/// Dropping it unsubscribes; events still queued for it are discarded.
pub struct AuthSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthEvent>,
    hub: Weak<Mutex<HubInner>>,
}

impl AuthSubscription {
    /// Wait for the next event. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        self.rx.try_recv().ok()
    }

    /// Explicit form of dropping the subscription
    pub fn unsubscribe(self) {}
}

impl Stream for AuthSubscription {
    type Item = AuthEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(inner) = self.hub.upgrade() {
            lock(&inner).listeners.remove(&self.id);
            debug!(listener = self.id, "Auth listener unsubscribed");
        }
    }
}
