//! Teamgate CLI - sign in and manage your teams from the terminal.
//!
//! Walks the same pages a browser would: the landing page probes for a
//! session, the login page signs in, the dashboard lists teams. Each page
//! runs its own session gate, and the gate's navigation decides which page
//! comes next.

mod render;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use teamgate_core::api::{SignUpOutcome, SupabaseClient};
use teamgate_core::auth::{AuthError, CredentialStore, OAuthProvider};
use teamgate_core::bootstrap::ProvisionError;
use teamgate_core::config::Config;
use teamgate_core::gate::{ChannelNavigator, Navigator, SessionGate, Surface};
use teamgate_core::view::{DashboardView, ViewState};

// ============================================================================
// Constants
// ============================================================================

/// Log file name inside the log directory
const LOG_FILE_NAME: &str = "teamgate.log";

/// Password attempts before giving up on the login page
const MAX_LOGIN_ATTEMPTS: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "teamgate", about = "Sign in and manage your teams")]
struct Cli {
    /// Create a team you administer
    #[arg(long, value_name = "NAME")]
    create_team: Option<String>,

    /// Sign out after showing your teams
    #[arg(long)]
    sign_out: bool,

    /// Create an account instead of signing in
    #[arg(long, conflicts_with = "oauth")]
    sign_up: bool,

    /// Print a sign-in link for google or github
    #[arg(long, value_name = "PROVIDER")]
    oauth: Option<OAuthProvider>,
}

/// Initialize the tracing subscriber for logging
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=teamgate_core=debug).
/// Everything also goes to a log file when the log directory is writable.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = config
        .log_dir()
        .ok()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE_NAME)));
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// What the router does after a page finishes
enum Flow {
    Continue,
    Exit,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!("Teamgate starting");

    let (url, anon_key) = config.connection()?;
    let client = Arc::new(SupabaseClient::new(url, anon_key)?);
    let credentials = CredentialStore::for_project(url);
    let (navigator, mut pages) = ChannelNavigator::new();
    let navigator: Arc<dyn Navigator> = Arc::new(navigator);

    let mut path = config.routes.landing.clone();
    loop {
        let surface = config
            .routes
            .surface_for(&path)
            .with_context(|| format!("No page at {}", path))?;
        info!(path = %path, surface = ?surface, "Opening page");

        let flow = match surface {
            Surface::Landing => landing_page(&client, &navigator, &config).await,
            Surface::Login => login_page(&client, &navigator, &credentials, &mut config, &cli).await?,
            Surface::Dashboard => dashboard_page(&client, &navigator, &config, &cli).await?,
        };
        if let Flow::Exit = flow {
            break;
        }

        match next_page(&mut pages) {
            Some(next) => path = next,
            None => break,
        }
    }

    info!("Teamgate shutting down");
    Ok(())
}

/// The path the last page navigated to, if any
fn next_page(pages: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
    let mut next = None;
    while let Ok(path) = pages.try_recv() {
        next = Some(path);
    }
    next
}

/// Entry page: probe and move on
async fn landing_page(client: &Arc<SupabaseClient>, navigator: &Arc<dyn Navigator>, config: &Config) -> Flow {
    let mut gate = SessionGate::activate(
        client.clone(),
        navigator.clone(),
        config.routes.clone(),
        Surface::Landing,
    );
    gate.probe().await;
    gate.teardown();
    Flow::Continue
}

async fn login_page(
    client: &Arc<SupabaseClient>,
    navigator: &Arc<dyn Navigator>,
    credentials: &CredentialStore,
    config: &mut Config,
    cli: &Cli,
) -> Result<Flow> {
    let mut gate = SessionGate::activate(
        client.clone(),
        navigator.clone(),
        config.routes.clone(),
        Surface::Login,
    );
    gate.probe().await;
    if gate.is_latched() {
        gate.teardown();
        return Ok(Flow::Continue);
    }

    if let Some(provider) = cli.oauth {
        let origin = config.site_origin()?;
        let url = gate.sign_in_with_oauth(provider, &origin, None).await?;
        println!("Open this link to sign in with {}:\n\n  {}\n", provider, url);
        gate.teardown();
        return Ok(Flow::Exit);
    }

    let signed_in = if cli.sign_up {
        sign_up(client, config).await?
    } else {
        sign_in(client, credentials, config).await?
    };
    if !signed_in {
        gate.teardown();
        return Ok(Flow::Exit);
    }

    // The client broadcast SIGNED_IN; let the gate act on it
    while !gate.is_latched() {
        match gate.next_event().await {
            Some(event) => {
                gate.on_auth_event(event);
            }
            None => break,
        }
    }
    gate.teardown();
    Ok(Flow::Continue)
}

/// Password sign-in. Returns false when the visitor gave up.
async fn sign_in(client: &SupabaseClient, credentials: &CredentialStore, config: &mut Config) -> Result<bool> {
    println!("\n=== Teamgate Login ===\n");
    let email = prompt_email(config.last_email.as_deref())?;
    let mut remembered = credentials.recall(&email).unwrap_or_else(|e| {
        warn!(error = %e, "Keychain unavailable");
        None
    });

    for _ in 0..MAX_LOGIN_ATTEMPTS {
        let password = match remembered.take() {
            Some(password) => password,
            None => rpassword::prompt_password("Password: ")?,
        };

        println!("\nAuthenticating...");
        match client.sign_in_with_password(&email, &password).await {
            Ok(_) => {
                if let Err(e) = credentials.remember(&email, &password) {
                    warn!(error = %e, "Failed to store credentials");
                }
                config.last_email = Some(email);
                if let Err(e) = config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                println!("Login successful!\n");
                return Ok(true);
            }
            Err(AuthError::InvalidCredentials) => {
                if let Err(e) = credentials.forget(&email) {
                    warn!(error = %e, "Failed to forget stale password");
                }
                println!("Invalid email or password.");
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!("Too many failed attempts.");
    Ok(false)
}

/// Create an account. Returns true when the project signed the visitor
/// straight in.
async fn sign_up(client: &SupabaseClient, config: &mut Config) -> Result<bool> {
    println!("\n=== Teamgate Sign Up ===\n");
    let email = prompt_email(None)?;
    let password = rpassword::prompt_password("Choose a password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        println!("Passwords do not match.");
        return Ok(false);
    }

    let redirect = config
        .site_origin()?
        .join(&config.routes.dashboard)
        .context("Invalid dashboard route")?;
    let outcome = client.sign_up(&email, &password, &redirect).await?;
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match outcome {
        SignUpOutcome::ConfirmationSent => {
            println!("Check your email to confirm your account, then sign in.");
            Ok(false)
        }
        SignUpOutcome::SignedIn(_) => Ok(true),
    }
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    match (input.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => anyhow::bail!("Email required"),
        (false, _) => Ok(input.to_string()),
    }
}

async fn dashboard_page(
    client: &Arc<SupabaseClient>,
    navigator: &Arc<dyn Navigator>,
    config: &Config,
    cli: &Cli,
) -> Result<Flow> {
    let mut view = DashboardView::mount(
        client.clone(),
        client.clone(),
        navigator.clone(),
        config.routes.clone(),
    );
    view.start().await;
    if let ViewState::Redirecting { .. } = view.view_state() {
        view.teardown();
        return Ok(Flow::Continue);
    }

    if let Some(name) = &cli.create_team {
        match view.create_team(name).await {
            Ok(team) => println!("Created team {}.\n", team.name),
            Err(e @ ProvisionError::Partial { .. }) => {
                println!("Warning: {}", e);
                println!("The team exists but has no administrator. Contact support with the team id.\n");
            }
            Err(e) => println!("Could not create team: {}\n", e),
        }
    }

    view.process_pending_events();
    render::print_dashboard(&view.view_state());

    if cli.sign_out {
        if let Err(e) = view.sign_out().await {
            println!("Sign-out reported an error: {}", e);
        }
        view.process_pending_events();
        println!("Signed out.");
    }
    view.teardown();
    Ok(Flow::Exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(list: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("teamgate").chain(list.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = parse(&[]).unwrap();
        assert!(cli.create_team.is_none());
        assert!(!cli.sign_out && !cli.sign_up);

        let cli = parse(&["--create-team", "Acme Corp", "--sign-out"]).unwrap();
        assert_eq!(cli.create_team.as_deref(), Some("Acme Corp"));
        assert!(cli.sign_out);

        let cli = parse(&["--oauth", "GitHub"]).unwrap();
        assert_eq!(cli.oauth, Some(OAuthProvider::Github));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--create-team"]).is_err());
        assert!(parse(&["--oauth", "myspace"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["--sign-up", "--oauth", "google"]).is_err());
    }

    #[test]
    fn test_next_page_takes_latest() {
        let (navigator, mut pages) = ChannelNavigator::new();
        assert!(next_page(&mut pages).is_none());
        navigator.navigate("/login");
        assert_eq!(next_page(&mut pages).as_deref(), Some("/login"));
    }
}
