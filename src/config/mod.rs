//! Configuration and credential storage

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::auth::{Credentials, SessionStore};
use crate::error::MixiError;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://mixi.jp/connect_authorize.pl";
pub const DEFAULT_TOKEN_URL: &str = "https://secure.mixi-platform.com/2/token";
pub const DEFAULT_API_BASE: &str = "https://api.mixi-platform.com/";
pub const DEFAULT_SCOPE: &str = "r_profile";

/// Authorization page layout requested from the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    #[default]
    Touch,
    Pc,
    Smartphone,
    Ios,
}

impl Display {
    pub fn as_str(&self) -> &'static str {
        match self {
            Display::Touch => "touch",
            Display::Pc => "pc",
            Display::Smartphone => "smartphone",
            Display::Ios => "ios",
        }
    }
}

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider hosts. Defaults point at production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Registered application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Consumer key issued by the provider
    pub client_id: String,
    /// Consumer secret issued by the provider
    #[serde(default)]
    pub client_secret: String,
    /// Space-delimited scopes requested at login
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub display: Display,
    #[serde(default)]
    pub endpoints: Endpoints,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl AppConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: default_scope(),
            redirect_uri: String::new(),
            display: Display::default(),
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_display(mut self, display: Display) -> Self {
        self.display = display;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Load the application config from the default config directory
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "No config at {}. Create it with at least `client_id` and `client_secret`.",
                path.display()
            );
        }
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }
}

/// Get config directory path
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("jp", "mixi-cli", "mixi-cli")
        .context("Could not determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Session store persisted as a TOML table of credentials.
///
/// Every `set` rewrites the whole file.
#[derive(Debug)]
pub struct SessionFile {
    path: PathBuf,
    entries: BTreeMap<String, Credentials>,
}

impl SessionFile {
    /// Open the session file in the default config directory
    pub fn open_default() -> Result<Self> {
        Self::open(config_dir()?.join("session.toml"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read session file")?;
            toml::from_str(&content).context("Failed to parse session file")?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> std::result::Result<(), MixiError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(&self.entries)
            .map_err(|e| MixiError::Session(e.to_string()))?;
        fs::write(&self.path, content)?;

        // Set restrictive permissions on session file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

impl SessionStore for SessionFile {
    fn get(&self, key: &str) -> Option<Credentials> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, credentials: Credentials) -> crate::error::Result<()> {
        self.entries.insert(key.to_string(), credentials);
        self.save()
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
