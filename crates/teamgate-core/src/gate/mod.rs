//! Session gate: decides, for each auth signal, whether the page navigates.
//!
//! Two producers feed one consumer. The one-shot session probe and the
//! long-lived auth-event subscription both produce signals; the gate turns
//! each into a [`NavigationIntent`] and commits at most one of them through
//! its [`NavigationLatch`]. Later signals still update the stored identity.

pub mod intent;
pub mod latch;
pub mod navigator;
pub mod session_gate;

pub use intent::{NavigationIntent, Routes, Surface};
pub use latch::NavigationLatch;
pub use navigator::{ChannelNavigator, Navigator, RecordingNavigator};
pub use session_gate::{GateDisplay, ProbeOutcome, SessionGate};
