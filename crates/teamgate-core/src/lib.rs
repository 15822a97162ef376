//! Teamgate core - session-gated navigation and team bootstrap.
//!
//! A page mounts a [`gate::SessionGate`], which probes the identity provider
//! once and listens for auth events for the rest of the page's life. The
//! first signal that resolves to a navigation wins; everything after it is
//! display-only. Once the visitor is known, [`bootstrap::TeamBootstrap`]
//! loads their team memberships and can provision new teams.
//!
//! [`view::DashboardView`] ties the two together for the protected dashboard
//! page, and [`api::SupabaseClient`] talks to the hosted backend.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod gate;
pub mod models;
pub mod store;
pub mod utils;
pub mod view;

pub use reqwest::Url;
