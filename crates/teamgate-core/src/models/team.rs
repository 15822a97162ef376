use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::format_timestamp;

/// Role a user holds within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `teams` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// "Created Mar 04, 2025" style label for team cards
    pub fn created_display(&self) -> String {
        format!("Created {}", format_timestamp(&self.created_at))
    }
}

/// A row of the `team_members` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TeamMembership {
    pub id: String,
    pub team_id: String,
    pub user_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A membership joined with the team it points at.
///
/// The store embeds the joined row under `teams`, matching the shape of
/// `select=role,teams(id,name,created_at,updated_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct MemberTeam {
    pub role: Role,
    #[serde(rename = "teams")]
    pub team: Team,
}

/// Insert payload for the `teams` table. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTeam {
    pub name: String,
}

/// Insert payload for the `team_members` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMembership {
    pub team_id: String,
    pub user_id: String,
    pub role: Role,
}
