// Configuration management module
// Handles loading, saving, and validating configuration

use crate::scrobbler::lastfm::{DEFAULT_API_URL, DEFAULT_AUTH_URL};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scrobble after playing this percentage of the track (50% default)
    pub scrobble_threshold: u8,

    /// Text cleanup configuration
    pub cleanup: CleanupConfig,

    /// Rich presence configuration
    pub presence: PresenceConfig,

    /// Artwork lookup configuration
    pub artwork: ArtworkConfig,

    /// Last.fm configuration
    pub lastfm: LastFmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Enable text cleanup
    pub enabled: bool,

    /// Regex patterns to remove from track/album/artist names
    /// Applied in order, each pattern is removed from the text
    pub patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: vec![
                r"\s*\[Explicit\]".to_string(),
                r"\s*\[Clean\]".to_string(),
                r"\s*\(Explicit\)".to_string(),
                r"\s*\(Clean\)".to_string(),
                r"\s*- Explicit".to_string(),
                r"\s*- Clean".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub enabled: bool,

    /// Discord application the presence is shown under
    pub client_id: String,

    /// Asset used when no artwork is available
    pub large_image: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id: "402370117901484042".to_string(),
            large_image: "big_sur_logo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtworkConfig {
    pub enabled: bool,

    /// Catalog lookup endpoint
    pub lookup_url: String,

    /// Requested artwork edge length in pixels
    pub size: u32,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_url: "https://itunes.apple.com/lookup".to_string(),
            size: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    pub enabled: bool,
    pub api_key: String,
    pub api_secret: String,
    pub api_url: String,
    pub auth_url: String,

    /// Seconds to wait for browser approval before the first token exchange
    pub auth_grace_period_secs: u64,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            api_secret: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            auth_grace_period_secs: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scrobble_threshold: 50,
            cleanup: CleanupConfig::default(),
            presence: PresenceConfig::default(),
            artwork: ArtworkConfig::default(),
            lastfm: LastFmConfig::default(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?;

        Ok(config_dir.join("presence_scrobbler.conf"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            log::info!("Config file not found, creating default at {:?}", config_path);
            let default_config = Self::default();
            default_config.save_to(config_path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(config_path, content)
            .context("Failed to write config file")?;

        log::info!("Config saved to {:?}", config_path);

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate scrobble threshold (should be 1-100%)
        if self.scrobble_threshold == 0 || self.scrobble_threshold > 100 {
            anyhow::bail!("scrobble_threshold must be between 1 and 100");
        }

        if self.artwork.size == 0 {
            anyhow::bail!("artwork size must be greater than 0");
        }

        if self.presence.enabled && self.presence.client_id.is_empty() {
            anyhow::bail!("presence client_id is required when presence is enabled");
        }

        if self.lastfm.enabled {
            if self.lastfm.api_key.is_empty() {
                anyhow::bail!("Last.fm api_key is required when Last.fm is enabled");
            }
            if self.lastfm.api_secret.is_empty() {
                anyhow::bail!("Last.fm api_secret is required when Last.fm is enabled");
            }
        }

        if !self.presence.enabled && !self.lastfm.enabled {
            log::warn!("Neither rich presence nor Last.fm is enabled");
        }

        Ok(())
    }
}
