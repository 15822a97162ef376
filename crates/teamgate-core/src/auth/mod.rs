//! Authentication module: sessions, auth events and the identity oracle.
//!
//! This module provides:
//! - `Session` / `Identity`: what the identity provider hands back
//! - `AuthEvent`, `AuthHub`, `AuthSubscription`: auth-change notifications
//! - `IdentityOracle`: the capability trait the session gate talks to
//! - `MemoryOracle`: an in-process oracle for tests and demos
//! - `CredentialStore`: OS-level password storage via keyring
//!
//! Sessions live in memory only. The provider issues and expires them; this
//! crate never persists tokens.

pub mod credentials;
pub mod events;
pub mod memory;
pub mod oracle;
pub mod session;

pub use credentials::CredentialStore;
pub use events::{AuthEvent, AuthEventKind, AuthHub, AuthSubscription};
pub use memory::MemoryOracle;
pub use oracle::{AuthError, IdentityOracle, OAuthProvider};
pub use session::{Identity, Session};
