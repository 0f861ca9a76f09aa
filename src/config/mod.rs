//! Configuration and credential storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{StoredToken, TokenStore};
use crate::tester::TesterSettings;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Homeserver base URL, e.g. `https://matrix.example.org`
    pub homeserver_url: Option<String>,
    /// Matrix user ID of the last login
    pub user_id: Option<String>,
    /// Matrix access token
    pub access_token: Option<StoredToken>,
    /// Endpoint answering doctored offers
    pub remote_test_service_url: Option<String>,
    pub gathering_timeout_secs: Option<u64>,
    pub relay_timeout_secs: Option<u64>,
    /// HTTP timeout for homeserver and testing service requests
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "mx-voip-tester", "mx-voip-tester")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Tester settings with stored timeouts applied over the defaults.
    pub fn tester_settings(&self) -> TesterSettings {
        let mut settings = TesterSettings::default();
        if let Some(secs) = self.gathering_timeout_secs {
            settings.gathering_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.relay_timeout_secs {
            settings.relay_timeout = Duration::from_secs(secs);
        }
        settings
    }
}

impl TokenStore for Config {
    fn get_access_token(&self) -> Option<StoredToken> {
        self.access_token.clone()
    }

    fn set_access_token(&mut self, token: String, expires_in: Option<u64>) {
        self.access_token = Some(StoredToken::new(token, expires_in));
    }

    fn clear_tokens(&mut self) {
        self.access_token = None;
    }
}

/// Parse an http(s) URL, rejecting anything else.
pub fn validate_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("Unsupported URL scheme '{}' in {}", other, raw),
    }
    if parsed.host_str().is_none() {
        bail!("URL has no host: {}", raw);
    }
    Ok(parsed)
}
