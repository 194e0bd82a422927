use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley application.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one concern; all sections fall back to defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub widget: WidgetConfig,
    #[serde(default)]
    pub typing: TypingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embeddable widget configuration.
///
/// The tenant identifier is the only required field; everything else is an
/// optional display override layered on top of the tenant's stored settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Tenant identifier. Empty is a hard initialization failure.
    pub tenant: String,
    pub business_name: Option<String>,
    pub representative_name: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub welcome_message: Option<String>,
}

impl WidgetConfig {
    /// Minimal config with just a tenant identifier.
    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration before any widget surface exists.
    ///
    /// A missing tenant identifier aborts setup; display overrides are
    /// never validated.
    pub fn validate(&self) -> Result<()> {
        if self.tenant.trim().is_empty() {
            return Err(ParleyError::Config(
                "widget.tenant must be set to a tenant identifier".to_string(),
            ));
        }
        Ok(())
    }

    /// Layer the display overrides onto a tenant's stored settings.
    pub fn apply_overrides(&self, settings: &mut crate::types::WidgetSettings) {
        if let Some(ref v) = self.business_name {
            settings.business_name = v.clone();
        }
        if let Some(ref v) = self.representative_name {
            settings.representative_name = v.clone();
        }
        if let Some(ref v) = self.primary_color {
            settings.primary_color = v.clone();
        }
        if let Some(ref v) = self.secondary_color {
            settings.secondary_color = v.clone();
        }
        if let Some(ref v) = self.welcome_message {
            settings.welcome_message = v.clone();
        }
    }
}

/// Simulated typing delay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Delay between responder selection and reply emission, in ms.
    pub delay_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { delay_ms: 1200 }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend: "sqlite" or "memory".
    pub backend: String,
    /// Database file name inside the data directory (sqlite backend).
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            database: "parley.db".to_string(),
        }
    }
}
