//! REST client for the hosted backend.
//!
//! The backend exposes two services under one base URL:
//! - `/auth/v1` issues and revokes sessions (the identity oracle)
//! - `/rest/v1` serves the `teams` and `team_members` tables (the data store)
//!
//! Every request carries the project's anon key; table requests also carry
//! the signed-in user's bearer token so row-level security applies.

pub mod client;
pub mod error;

pub use client::{SignUpOutcome, SupabaseClient};
pub use error::ApiError;
