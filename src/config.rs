//! Configuration Management
//!
//! Provider connection settings, resolved as CLI > environment > config file > defaults.

use crate::error::{ProviderError, Result};
use crate::poll::PollSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default Prism Central port
pub const DEFAULT_PORT: u16 = 9440;

/// Default Foundation VM port
pub const DEFAULT_FOUNDATION_PORT: u16 = 8000;

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Prism Central endpoint (host or IP)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    /// Never written back to disk
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Accept self-signed Prism certificates
    #[serde(default)]
    pub insecure: bool,
    /// Provider-wide Prism task timeout in minutes (0 keeps the per-entity defaults)
    #[serde(default)]
    pub wait_timeout: u64,
    #[serde(default)]
    pub foundation_endpoint: Option<String>,
    #[serde(default)]
    pub foundation_port: Option<u16>,
    #[serde(default)]
    pub poll: PollSettings,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ntnx").join("config.json"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring config file {:?}: {}", path, e);
                Self::default()
            }),
            None => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Load configuration from a specific file (missing file gives defaults)
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Apply `NUTANIX_*` / `FOUNDATION_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(endpoint) = var("NUTANIX_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(username) = var("NUTANIX_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = var("NUTANIX_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(port) = var("NUTANIX_PORT") {
            match port.parse() {
                Ok(port) => self.port = Some(port),
                Err(_) => tracing::warn!("Invalid NUTANIX_PORT: {}", port),
            }
        }
        if let Some(insecure) = var("NUTANIX_INSECURE") {
            self.insecure = matches!(insecure.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(timeout) = var("NUTANIX_WAIT_TIMEOUT") {
            match timeout.parse() {
                Ok(minutes) => self.wait_timeout = minutes,
                Err(_) => tracing::warn!("Invalid NUTANIX_WAIT_TIMEOUT: {}", timeout),
            }
        }
        if let Some(endpoint) = var("FOUNDATION_ENDPOINT") {
            self.foundation_endpoint = Some(endpoint);
        }
        if let Some(port) = var("FOUNDATION_PORT") {
            match port.parse() {
                Ok(port) => self.foundation_port = Some(port),
                Err(_) => tracing::warn!("Invalid FOUNDATION_PORT: {}", port),
            }
        }
    }

    /// Get effective Prism port
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Get effective Foundation port
    pub fn effective_foundation_port(&self) -> u16 {
        self.foundation_port.unwrap_or(DEFAULT_FOUNDATION_PORT)
    }

    /// Poll settings with the provider-wide wait timeout applied
    pub fn effective_poll(&self) -> PollSettings {
        self.poll.clone().with_wait_timeout(self.wait_timeout)
    }

    /// Check that Prism credentials are complete
    pub fn validate_prism(&self) -> Result<()> {
        if self.endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(ProviderError::validation(
                "no Prism endpoint configured; set NUTANIX_ENDPOINT or use --endpoint",
            ));
        }
        if self.username.as_deref().unwrap_or("").is_empty()
            || self.password.as_deref().unwrap_or("").is_empty()
        {
            return Err(ProviderError::validation(
                "username and password are required; set NUTANIX_USERNAME and NUTANIX_PASSWORD",
            ));
        }
        Ok(())
    }
}
