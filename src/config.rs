//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - GitHub API endpoint, token and the repositories to ingest
//! - Server binding settings
//! - Database selection
//! - Sync schedule, paging and pacing

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::github::{GitHubClient, GITHUB_API_BASE};
use crate::source::{RepoRef, MAX_PAGE_SIZE};
use crate::sync::SyncSettings;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub github: GitHubConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Optional; `GITHUB_TOKEN` takes precedence
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub repos: Vec<RepoRef>,
}

fn default_api_base() -> String {
    GITHUB_API_BASE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// PostgreSQL URL, normally supplied through `DATABASE_URL`
    #[serde(default)]
    pub url: Option<String>,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("devvault.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the periodic background sync in the server
    pub enabled: bool,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub page_size: u32,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    pub pace_millis: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            initial_delay_secs: 10,
            page_size: MAX_PAGE_SIZE,
            max_pages: 10,
            request_timeout_secs: 30,
            pace_millis: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Load demo users and issues into an empty store
    pub demo_data: bool,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self { demo_data: true }
    }
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path, falling back to the embedded defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `GITHUB_TOKEN`, `DATABASE_URL`, `DEVVAULT_HOST` and `DEVVAULT_PORT`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let set = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = set("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(url) = set("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = set("DEVVAULT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = set("DEVVAULT_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("DEVVAULT_PORT is not a port number: {}", port))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.page_size == 0 || self.sync.page_size > MAX_PAGE_SIZE {
            anyhow::bail!(
                "sync.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                self.sync.page_size
            );
        }
        if self.sync.max_pages == 0 {
            anyhow::bail!("sync.max_pages must be at least 1");
        }
        for repo in &self.github.repos {
            if repo.owner.trim().is_empty() || repo.repo.trim().is_empty() {
                anyhow::bail!("github.repos entries need a non-empty owner and repo");
            }
        }
        Ok(())
    }

    pub fn github_token(&self) -> Option<String> {
        self.github.token.clone().filter(|t| !t.is_empty())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            repos: self.github.repos.clone(),
            pace: Duration::from_millis(self.sync.pace_millis),
            max_pages: self.sync.max_pages,
            fetch_timeout: Duration::from_secs(self.sync.request_timeout_secs),
        }
    }

    pub fn github_client(&self) -> Result<GitHubClient> {
        GitHubClient::new(
            self.github.api_base.clone(),
            self.github_token(),
            self.sync.page_size,
            Duration::from_secs(self.sync.request_timeout_secs),
        )
        .context("Failed to build GitHub client")
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            github: GitHubConfig {
                api_base: default_api_base(),
                token: None,
                repos: Vec::new(),
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            seed: SeedConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_embedded_default_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.github.repos.len(), 6);
        assert_eq!(config.github.repos[0], RepoRef::new("facebook", "react"));
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync_settings().pace, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str(
            r#"
            [github]
            [server]
            host = "127.0.0.1"
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.github.api_base, GITHUB_API_BASE);
        assert!(config.github.repos.is_empty());
        assert_eq!(config.sync.max_pages, 10);
        assert!(config.seed.demo_data);
        assert_eq!(config.database.sqlite_path, PathBuf::from("devvault.db"));
    }

    #[test]
    fn test_validate_rejects_bad_page_size_and_repos() {
        let mut config = Config::default();
        config.sync.page_size = 101;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.github.repos.push(RepoRef::new("acme", " "));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GITHUB_TOKEN", "ghp_test"),
            ("DATABASE_URL", "postgres://localhost/devvault"),
            ("DEVVAULT_PORT", "9090"),
            ("DEVVAULT_HOST", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.github_token().as_deref(), Some("ghp_test"));
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/devvault")
        );
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");

        let mut bad = Config::default();
        assert!(bad
            .apply_overrides(|k| (k == "DEVVAULT_PORT").then(|| "http".to_string()))
            .is_err());
    }
}
