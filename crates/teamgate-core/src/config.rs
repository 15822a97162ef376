//! Application configuration management.
//!
//! Holds the backend connection (project URL and anon key), the site origin
//! used for OAuth redirects, the last email used to sign in, and the page
//! routes. Stored at `~/.config/teamgate/config.json`; `SUPABASE_URL`,
//! `SUPABASE_ANON_KEY` and `TEAMGATE_SITE_ORIGIN` override the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::gate::Routes;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "teamgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_SITE_ORIGIN: &str = "TEAMGATE_SITE_ORIGIN";

/// Origin used for OAuth redirects when none is configured
const DEFAULT_SITE_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub site_origin: Option<String>,
    pub last_email: Option<String>,
    #[serde(default)]
    pub routes: Routes,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Environment values win over the file
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_SUPABASE_URL) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_SUPABASE_ANON_KEY) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(origin) = non_empty(ENV_SITE_ORIGIN) {
            self.site_origin = Some(origin);
        }
    }

    /// Project URL and anon key, both required to reach the backend
    pub fn connection(&self) -> Result<(&str, &str)> {
        let url = self
            .supabase_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No project URL configured (set {})", ENV_SUPABASE_URL))?;
        let key = self
            .supabase_anon_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No anon key configured (set {})", ENV_SUPABASE_ANON_KEY))?;
        Ok((url, key))
    }

    pub fn site_origin(&self) -> Result<Url> {
        let origin = self.site_origin.as_deref().unwrap_or(DEFAULT_SITE_ORIGIN);
        Url::parse(origin).with_context(|| format!("Invalid site origin: {}", origin))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Directory for the rolling log file
    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("logs"))
    }
}
