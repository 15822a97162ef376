use anyhow::{Context, Result};
use keyring::Entry;
use reqwest::Url;

const SERVICE_NAME: &str = "teamgate";

/// Remembered sign-in passwords in the OS keychain, keyed by email.
///
/// Entries are scoped to one backend project, so the same email on two
/// projects keeps two passwords. Tokens are never stored here.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl CredentialStore {
    /// Keychain scope for the project at `project_url`
    pub fn for_project(project_url: &str) -> Self {
        let host = Url::parse(project_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let service = match host {
            Some(host) => format!("{}:{}", SERVICE_NAME, host),
            None => SERVICE_NAME.to_string(),
        };
        Self { service }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, email: &str) -> Result<Entry> {
        Entry::new(&self.service, email).context("Failed to create keyring entry")
    }

    pub fn remember(&self, email: &str, password: &str) -> Result<()> {
        self.entry(email)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// The remembered password, or `None` if nothing is stored
    pub fn recall(&self, email: &str) -> Result<Option<String>> {
        match self.entry(email)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve password from keychain"),
        }
    }

    /// Drop the remembered password. Returns whether one existed.
    pub fn forget(&self, email: &str) -> Result<bool> {
        match self.entry(email)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}
