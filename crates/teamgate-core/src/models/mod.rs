//! Data models for teams and memberships.
//!
//! - `Team`: a tenant grouping of users (`teams` table)
//! - `TeamMembership`: a user's role within a team (`team_members` table)
//! - `MemberTeam`: a membership joined with its team, as the dashboard reads it
//! - `NewTeam`, `NewMembership`: insert payloads

pub mod team;

pub use team::{MemberTeam, NewMembership, NewTeam, Role, Team, TeamMembership};
