//! Team bootstrap: membership fetch and two-step team provisioning.
//!
//! Provisioning writes a `teams` row, then a `team_members` row making the
//! creator its admin. The writes are not atomic. When the second one fails
//! the team exists without an administrator; that case is reported as
//! [`ProvisionError::Partial`] and the orphan team id is logged.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{MemberTeam, NewMembership, NewTeam, Role, Team};
use crate::store::{StoreError, TeamStore};

/// Longest team name accepted, in characters
pub const MAX_TEAM_NAME_LENGTH: usize = 100;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Invalid team name: {0}")]
    InvalidName(String),

    #[error("Failed to create team: {0}")]
    TeamInsert(#[source] StoreError),

    #[error("Team {} was created but admin membership failed: {}", team.id, source)]
    Partial {
        team: Team,
        #[source]
        source: StoreError,
    },
}

impl ProvisionError {
    /// True when a team row was written but has no admin
    pub fn is_partial(&self) -> bool {
        matches!(self, ProvisionError::Partial { .. })
    }

    /// Id of the team left without an admin, if any
    pub fn orphaned_team_id(&self) -> Option<&str> {
        match self {
            ProvisionError::Partial { team, .. } => Some(&team.id),
            _ => None,
        }
    }
}

/// Trim and bound a requested team name.
pub fn validate_team_name(name: &str) -> Result<String, ProvisionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::InvalidName("name is empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > MAX_TEAM_NAME_LENGTH {
        return Err(ProvisionError::InvalidName(format!(
            "name is {} characters, limit is {}",
            len, MAX_TEAM_NAME_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Display state of the team list. Rebuilt on every fetch.
#[derive(Debug, Clone)]
pub struct BootstrapState {
    pub memberships: Vec<MemberTeam>,
    pub loading: bool,
    pub create_pending: bool,
    pub fetch_error: Option<String>,
    pub create_error: Option<String>,
    /// Id of a team the most recent provisioning call left without an admin
    pub orphaned_team: Option<String>,
}

impl Default for BootstrapState {
    fn default() -> Self {
        Self {
            memberships: Vec::new(),
            loading: true,
            create_pending: false,
            fetch_error: None,
            create_error: None,
            orphaned_team: None,
        }
    }
}

impl BootstrapState {
    pub fn teams(&self) -> impl Iterator<Item = &Team> {
        self.memberships.iter().map(|m| &m.team)
    }

    /// The first membership returned by the store. Store order is not
    /// sorted; "first" is all that is promised.
    pub fn primary_team(&self) -> Option<&Team> {
        self.memberships.first().map(|m| &m.team)
    }

    pub fn primary_role(&self) -> Option<Role> {
        self.memberships.first().map(|m| m.role)
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }
}

/// Loads and extends the visitor's team list.
pub struct TeamBootstrap {
    store: Arc<dyn TeamStore>,
    state: BootstrapState,
}

impl TeamBootstrap {
    pub fn new(store: Arc<dyn TeamStore>) -> Self {
        Self {
            store,
            state: BootstrapState::default(),
        }
    }

    pub fn state(&self) -> &BootstrapState {
        &self.state
    }

    /// Replace the team list with a fresh read for `user_id`.
    ///
    /// On failure the list is emptied and the error recorded for display;
    /// either way loading ends.
    pub async fn fetch_teams(&mut self, user_id: &str) -> Result<usize, StoreError> {
        self.state.loading = true;
        let result = self.store.memberships_for_user(user_id).await;
        self.state.loading = false;

        match result {
            Ok(memberships) => {
                let count = memberships.len();
                debug!(user_id, count, "Fetched team memberships");
                self.state.memberships = memberships;
                self.state.fetch_error = None;
                Ok(count)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Failed to fetch team memberships");
                self.state.memberships.clear();
                self.state.fetch_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Create a team and make `creator_id` its admin.
    ///
    /// On success the team is appended locally with role admin, without a
    /// re-fetch. On any failure the local list is left as it was.
    pub async fn create_team(&mut self, name: &str, creator_id: &str) -> Result<Team, ProvisionError> {
        self.state.orphaned_team = None;
        let name = match validate_team_name(name) {
            Ok(name) => name,
            Err(e) => {
                self.state.create_error = Some(e.to_string());
                return Err(e);
            }
        };
        self.state.create_pending = true;
        let result = self.provision(&name, creator_id).await;
        self.state.create_pending = false;

        match &result {
            Ok(team) => {
                info!(team_id = %team.id, name = %team.name, "Team created");
                self.state.memberships.push(MemberTeam {
                    role: Role::Admin,
                    team: team.clone(),
                });
                self.state.create_error = None;
            }
            Err(e) => {
                self.state.create_error = Some(e.to_string());
                if let Some(team_id) = e.orphaned_team_id() {
                    self.state.orphaned_team = Some(team_id.to_string());
                }
            }
        }
        result
    }

    async fn provision(&self, name: &str, creator_id: &str) -> Result<Team, ProvisionError> {
        let team = self
            .store
            .insert_team(&NewTeam {
                name: name.to_string(),
            })
            .await
            .map_err(ProvisionError::TeamInsert)?;

        let membership = NewMembership {
            team_id: team.id.clone(),
            user_id: creator_id.to_string(),
            role: Role::Admin,
        };
        if let Err(source) = self.store.insert_membership(&membership).await {
            error!(
                team_id = %team.id,
                user_id = creator_id,
                error = %source,
                "Team has no admin after failed membership insert; needs manual reconciliation"
            );
            return Err(ProvisionError::Partial { team, source });
        }
        Ok(team)
    }
}
