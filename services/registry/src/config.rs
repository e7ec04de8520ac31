//! Server configuration, read from TOML.
//!
//! ```toml
//! listen = "0.0.0.0:5000"
//!
//! [storage]
//! driver = "local"
//! path = "/var/lib/registry"
//! ```

use std::net::{Ipv4Addr, SocketAddr};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::StorageConfig;

/// Default listen port
pub const DEFAULT_PORT: u16 = 5000;

/// Directory used by the local driver when none is configured
pub const DEFAULT_STORAGE_PATH: &str = "registry-data";

/// Errors loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("reading config from {path}")]
    Read {
        /// Path to the config file
        path: Utf8PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration
    #[error("parsing config: {0}")]
    Parse(#[from] toml_edit::de::Error),
}

/// Registry server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    /// Address to serve on
    pub listen: SocketAddr,

    /// Storage backend
    pub storage: StorageConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            storage: StorageConfig::Local {
                path: Utf8PathBuf::from(DEFAULT_STORAGE_PATH),
            },
        }
    }
}

impl RegistryConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(text)?)
    }

    /// Read configuration from a file
    pub async fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        tracing::debug!(%path, "loaded config");
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = RegistryConfig::from_toml("").unwrap();
        assert_eq!(config.listen, "127.0.0.1:5000".parse().unwrap());
        assert!(matches!(
            config.storage,
            StorageConfig::Local { ref path } if path == DEFAULT_STORAGE_PATH
        ));
    }

    #[test]
    fn storage_table() {
        let config = RegistryConfig::from_toml(
            r#"
            listen = "0.0.0.0:8080"

            [storage]
            driver = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 8080);
        assert!(matches!(config.storage, StorageConfig::Memory));
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let err = RegistryConfig::from_toml("[storage]\ndriver = \"s3\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_file() {
        let err = RegistryConfig::load(Utf8Path::new("/nonexistent/registry.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
