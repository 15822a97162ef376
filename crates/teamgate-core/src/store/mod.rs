//! The relational data store as team bootstrap sees it.
//!
//! Two tables are touched: `teams` and `team_members`. Storage, indexing and
//! constraints belong to the store; this crate only issues reads and writes.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::ApiError;
use crate::models::{MemberTeam, NewMembership, NewTeam, Team, TeamMembership};

pub use memory::{InMemoryStore, StoreOp};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not signed in - no session for store request")]
    NotAuthenticated,

    #[error("Insert into {table} returned no row")]
    EmptyInsert { table: &'static str },

    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Store request failed: {0}")]
    Api(#[from] ApiError),
}

#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Memberships of `user_id` joined with their teams, in store order
    async fn memberships_for_user(&self, user_id: &str) -> Result<Vec<MemberTeam>, StoreError>;

    /// Insert a team and return the stored row with its generated id
    async fn insert_team(&self, team: &NewTeam) -> Result<Team, StoreError>;

    /// Insert a membership and return the stored row
    async fn insert_membership(
        &self,
        membership: &NewMembership,
    ) -> Result<TeamMembership, StoreError>;
}
