use super::schema::CrmSyncConfig;
use crate::registry::LocatorRegistry;
use crmsync_common::locator::LocatorError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid locator: {0}")]
    Locator(#[from] LocatorError),
    #[error("Invalid locator for field {field}: {source}")]
    FieldLocator {
        field: String,
        #[source]
        source: LocatorError,
    },
    #[error("Locator not configured: {0}")]
    NotConfigured(String),
    #[error("No field mapping configured for: {0}")]
    FieldNotConfigured(String),
    #[error("CRM URL is not set")]
    MissingUrl,
    #[error("crm.listing_url_fragment must not be empty")]
    EmptyListingFragment,
    #[error("Invalid CRM URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./crmsync.yaml
    /// 2. ~/.crmsync/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<CrmSyncConfig, ConfigError> {
        let local_config = PathBuf::from("./crmsync.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".crmsync").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        info!("No configuration file found, using defaults");
        Ok(CrmSyncConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<CrmSyncConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document. An empty document yields defaults.
    pub fn parse(content: &str) -> Result<CrmSyncConfig, ConfigError> {
        let config: CrmSyncConfig = if content.trim().is_empty() {
            CrmSyncConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load-time checks: every locator and field mapping must be well formed
    /// and a configured URL must parse. Missing entries are not an error here;
    /// they surface when an operation needs them.
    pub fn validate(config: &CrmSyncConfig) -> Result<(), ConfigError> {
        LocatorRegistry::from_config(&config.crm)?;
        if config.crm.listing_url_fragment.trim().is_empty() {
            return Err(ConfigError::EmptyListingFragment);
        }
        if !config.crm.url.trim().is_empty() {
            url::Url::parse(config.crm.url.trim()).map_err(|e| ConfigError::InvalidUrl {
                url: config.crm.url.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Write the configuration back out, creating parent directories.
    pub async fn save_to(path: &Path, config: &CrmSyncConfig) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_yaml::to_string(config)?;
        tokio::fs::write(path, content).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}
