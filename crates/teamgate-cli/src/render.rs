use teamgate_core::models::MemberTeam;
use teamgate_core::utils::{format_optional, truncate_string};
use teamgate_core::view::ViewState;

/// Widest team name shown in the list
const TEAM_NAME_WIDTH: usize = 40;

pub fn print_dashboard(state: &ViewState) {
    for line in dashboard_lines(state) {
        println!("{}", line);
    }
}

fn dashboard_lines(state: &ViewState) -> Vec<String> {
    let ViewState::Ready {
        identity,
        teams,
        primary_team,
        primary_role,
        fetch_error,
        create_pending,
        create_error,
        orphaned_team,
    } = state
    else {
        return match state {
            ViewState::Redirecting { path } => vec![format!("Redirecting to {}...", path)],
            _ => vec!["Loading...".to_string()],
        };
    };

    let email = identity.as_ref().and_then(|i| i.email.as_deref());
    let mut lines = vec![
        "=== Dashboard ===".to_string(),
        format!("Signed in as {}", format_optional(email, "unknown user")),
    ];
    if let (Some(team), Some(role)) = (primary_team, primary_role) {
        lines.push(format!("Current team: {} ({})", team.name, role));
    }
    lines.push(String::new());

    if let Some(err) = fetch_error {
        lines.push(format!("Could not load your teams: {}", err));
    } else if teams.is_empty() {
        lines.push("You are not a member of any team yet.".to_string());
        lines.push("Create one with --create-team <NAME>.".to_string());
    } else {
        lines.push("Your teams:".to_string());
        lines.extend(teams.iter().map(team_line));
    }

    if *create_pending {
        lines.push("Creating team...".to_string());
    }
    if let Some(err) = create_error {
        lines.push(format!("Last team creation failed: {}", err));
    }
    if let Some(id) = orphaned_team {
        lines.push(format!("Team {} has no administrator.", id));
    }
    lines
}

fn team_line(entry: &MemberTeam) -> String {
    format!(
        "  {:<width$}  {:<6}  {}",
        truncate_string(&entry.team.name, TEAM_NAME_WIDTH),
        entry.role.as_str(),
        entry.team.created_display(),
        width = TEAM_NAME_WIDTH
    )
}
