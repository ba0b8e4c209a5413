use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// Candidates requested from the catalog per subscription and pass.
    #[serde(default = "default_search_pool_size")]
    pub search_pool_size: u32,

    /// Titles listed in one notification.
    #[serde(default = "default_notify_page_size")]
    pub notify_page_size: u32,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_site_url")]
    pub site_url: String,

    #[serde(default = "default_email_from")]
    pub email_from: String,

    pub resend_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("porkast-sync");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("porkast.db").to_string_lossy().to_string()
}

fn default_refresh_interval() -> u32 {
    180
}

fn default_search_pool_size() -> u32 {
    200
}

fn default_notify_page_size() -> u32 {
    10
}

fn default_max_concurrency() -> usize {
    8
}

fn default_site_url() -> String {
    "https://porkast.com".to_string()
}

fn default_email_from() -> String {
    "Porkast <noreply@porkast.com>".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            refresh_interval_minutes: default_refresh_interval(),
            search_pool_size: default_search_pool_size(),
            notify_page_size: default_notify_page_size(),
            max_concurrency: default_max_concurrency(),
            site_url: default_site_url(),
            email_from: default_email_from(),
            resend_api_key: None,
            telegram_bot_token: None,
            spotify_client_id: None,
            spotify_client_secret: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads the file at `path`, writing a default one if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("porkast-sync")
            .join("config.toml")
    }

    /// Secrets set in the environment take precedence over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("RESEND_API_KEY") {
            self.resend_api_key = Some(v);
        }
        if let Some(v) = non_empty("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = Some(v);
        }
        if let Some(v) = non_empty("SPOTIFY_CLIENT_ID") {
            self.spotify_client_id = Some(v);
        }
        if let Some(v) = non_empty("SPOTIFY_CLIENT_SECRET") {
            self.spotify_client_secret = Some(v);
        }
    }
}
