//! Daemon settings
//!
//! Layered with the `config` crate: built-in defaults, then the optional TOML
//! file named by `RELIQUARY_CONFIG`, then `RELIQUARY__SECTION__KEY` environment
//! variables (for example `RELIQUARY__ENGINE__BLOCK_SIZE=50`).

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use reliquary_core::application::EngineConfig;
use serde::Deserialize;

const CONFIG_PATH_VAR: &str = "RELIQUARY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "~/.reliquary/reliquary.toml";
const DEFAULT_DB_PATH: &str = "~/.reliquary/reliquary.db";
const DEFAULT_STORAGE_ROOT: &str = "~/.reliquary/storage";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub rpc: RpcSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: DEFAULT_STORAGE_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub host: String,
    pub port: u16,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

impl Settings {
    /// Load from the configured file (if present) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = shellexpand::tilde(&path).into_owned();

        let builder = Config::builder().add_source(File::new(&path, FileFormat::Toml).required(false));
        Self::from_builder(builder).with_context(|| format!("Failed to load settings from {}", path))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let mut settings: Settings = builder
            .add_source(
                Environment::with_prefix("RELIQUARY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.database.path = shellexpand::tilde(&settings.database.path).into_owned();
        settings.storage.root = shellexpand::tilde(&settings.storage.root).into_owned();
        settings.engine.validate()?;
        Ok(settings)
    }

    /// sqlx connection URL for the database path
    pub fn database_url(&self) -> String {
        if self.database.path.starts_with("sqlite:") {
            self.database.path.clone()
        } else {
            format!("sqlite://{}", self.database.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reliquary_core::application::OverflowPolicy;

    fn from_toml(toml: &str) -> Result<Settings> {
        Settings::from_builder(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings.engine, EngineConfig::default());
        assert_eq!(settings.rpc.port, DEFAULT_RPC_PORT);
        assert!(settings.database.path.ends_with(".reliquary/reliquary.db"));
        assert!(!settings.database.path.starts_with('~'));
    }

    #[test]
    fn test_file_values_override_defaults() {
        let settings = from_toml(
            r#"
            [engine]
            block_size = 25
            overflow_policy = "reject"

            [database]
            path = "/var/lib/reliquary/jobs.db"

            [rpc]
            port = 9600
            "#,
        )
        .unwrap();

        assert_eq!(settings.engine.block_size, 25);
        assert_eq!(settings.engine.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(
            settings.engine.max_parallel_jobs,
            EngineConfig::default().max_parallel_jobs
        );
        assert_eq!(settings.database_url(), "sqlite:///var/lib/reliquary/jobs.db");
        assert_eq!(settings.rpc.port, 9600);
    }

    #[test]
    fn test_invalid_engine_values_rejected() {
        let err = from_toml("[engine]\nblock_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("block_size"));
    }

    #[test]
    fn test_database_url_passthrough() {
        let mut settings = Settings::default();
        settings.database.path = "sqlite::memory:".to_string();
        assert_eq!(settings.database_url(), "sqlite::memory:");
    }
}
