//! Configuration management using the prefer crate.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://portaria-global.governarti.com.br";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Base URL of the remote portal.
    pub base_url: String,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Portal session credentials.
    pub login: LoginSettings,
}

/// Credentials and location for portal session recovery. Credentials are
/// never hard-coded; empty values make re-login a logged no-op.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub login_url: String,
    pub username: String,
    pub password: String,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/vigia/ for user data
        let data_dir = dirs::document_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("vigia");

        Self {
            data_dir,
            database_filename: "vigia.db".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: "Vigia/0.1".to_string(),
            request_timeout: 30,
            login: LoginSettings {
                login_url: format!("{DEFAULT_BASE_URL}/login"),
                username: String::new(),
                password: String::new(),
            },
        }
    }
}

impl Settings {
    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Base URL of the remote portal.
    #[serde(default)]
    pub base_url: Option<String>,
    /// User agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Login page URL (defaults to `<base_url>/login`).
    #[serde(default)]
    pub login_url: Option<String>,
    /// Portal username.
    #[serde(default)]
    pub username: Option<String>,
    /// Portal password.
    #[serde(default)]
    pub password: Option<String>,
}

impl Config {
    /// Load configuration using the prefer crate, which discovers vigia
    /// config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("vigia").await {
            Ok(pref_config) => {
                let target: Option<String> = pref_config.get("target").ok();
                let database: Option<String> = pref_config.get("database").ok();
                let base_url: Option<String> = pref_config.get("base_url").ok();
                let user_agent: Option<String> = pref_config.get("user_agent").ok();
                let request_timeout: Option<u64> = pref_config.get("request_timeout").ok();
                let login_url: Option<String> = pref_config.get("login_url").ok();
                let username: Option<String> = pref_config.get("username").ok();
                let password: Option<String> = pref_config.get("password").ok();

                Config {
                    target,
                    database,
                    base_url,
                    user_agent,
                    request_timeout,
                    login_url,
                    username,
                    password,
                }
            }
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref base_url) = self.base_url {
            settings.base_url = base_url.trim_end_matches('/').to_string();
            settings.login.login_url = format!("{}/login", settings.base_url);
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref login_url) = self.login_url {
            settings.login.login_url = login_url.clone();
        }
        if let Some(ref username) = self.username {
            settings.login.username = username.clone();
        }
        if let Some(ref password) = self.password {
            settings.login.password = password.clone();
        }
    }
}

/// Load settings from configuration.
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}
