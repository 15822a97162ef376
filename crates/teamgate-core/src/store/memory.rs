use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{StoreError, TeamStore};
use crate::models::{MemberTeam, NewMembership, NewTeam, Role, Team, TeamMembership};

/// Store operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    SelectMemberships,
    InsertTeam,
    InsertMembership,
}

#[derive(Default)]
struct Tables {
    teams: Vec<Team>,
    members: Vec<TeamMembership>,
    next_id: u64,
    failures: Vec<StoreOp>,
}

impl Tables {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Consume a scripted failure for `op`, if one is queued
    fn take_failure(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.failures.iter().position(|f| *f == op) {
            Some(idx) => {
                self.failures.remove(idx);
                Err(StoreError::Rejected(format!("scripted failure: {:?}", op)))
            }
            None => Ok(()),
        }
    }
}

/// In-memory `teams` / `team_members` tables for tests and demos.
///
/// Rows keep insertion order, which stands in for the store-defined order of
/// the hosted backend. No uniqueness is enforced on team names.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail. Queued failures are consumed in order.
    pub fn fail_next(&self, op: StoreOp) {
        self.tables().failures.push(op);
    }

    /// Insert a team with an existing membership, bypassing failure scripts
    pub fn seed_team(&self, name: &str, user_id: &str, role: Role) -> Team {
        let mut tables = self.tables();
        let now = Utc::now();
        let team = Team {
            id: tables.next_id("team"),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let membership = TeamMembership {
            id: tables.next_id("member"),
            team_id: team.id.clone(),
            user_id: user_id.to_string(),
            role,
            created_at: now,
            updated_at: now,
        };
        tables.teams.push(team.clone());
        tables.members.push(membership);
        team
    }

    pub fn teams(&self) -> Vec<Team> {
        self.tables().teams.clone()
    }

    pub fn memberships(&self) -> Vec<TeamMembership> {
        self.tables().members.clone()
    }

    /// Teams no administrator belongs to, e.g. left behind by a provisioning
    /// call whose membership write failed
    pub fn teams_without_admin(&self) -> Vec<Team> {
        let tables = self.tables();
        tables
            .teams
            .iter()
            .filter(|team| {
                !tables
                    .members
                    .iter()
                    .any(|m| m.team_id == team.id && m.role == Role::Admin)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TeamStore for InMemoryStore {
    async fn memberships_for_user(&self, user_id: &str) -> Result<Vec<MemberTeam>, StoreError> {
        let mut tables = self.tables();
        tables.take_failure(StoreOp::SelectMemberships)?;

        let rows = tables
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                tables
                    .teams
                    .iter()
                    .find(|t| t.id == m.team_id)
                    .map(|team| MemberTeam {
                        role: m.role,
                        team: team.clone(),
                    })
            })
            .collect();
        Ok(rows)
    }

    async fn insert_team(&self, team: &NewTeam) -> Result<Team, StoreError> {
        let mut tables = self.tables();
        tables.take_failure(StoreOp::InsertTeam)?;

        let now = Utc::now();
        let row = Team {
            id: tables.next_id("team"),
            name: team.name.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.teams.push(row.clone());
        Ok(row)
    }

    async fn insert_membership(
        &self,
        membership: &NewMembership,
    ) -> Result<TeamMembership, StoreError> {
        let mut tables = self.tables();
        tables.take_failure(StoreOp::InsertMembership)?;

        if !tables.teams.iter().any(|t| t.id == membership.team_id) {
            return Err(StoreError::Rejected(format!(
                "team_members.team_id references missing team {}",
                membership.team_id
            )));
        }

        let now = Utc::now();
        let row = TeamMembership {
            id: tables.next_id("member"),
            team_id: membership.team_id.clone(),
            user_id: membership.user_id.clone(),
            role: membership.role,
            created_at: now,
            updated_at: now,
        };
        tables.members.push(row.clone());
        Ok(row)
    }
}
