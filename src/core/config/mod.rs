use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::types::PipelineSettings;

pub const CONFIG_PATH_ENV: &str = "CRM_PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "crm-pipeline.toml";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageBackend,
    pub pipeline: PipelineSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: 10,
            run_migrations: true,
        }
    }
}

/// Where pipeline records live. `memory` keeps everything in process and is meant for
/// local runs and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

impl AppConfig {
    /// Defaults, then the TOML file (`CRM_PIPELINE_CONFIG` or `crm-pipeline.toml`), then
    /// `CRM_*` variables such as `CRM_SERVER__PORT`.
    pub fn load() -> Result<Self, figment::Error> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config: Self = Self::figment(&path)
            .merge(
                Env::prefixed("CRM_")
                    .ignore(&["PIPELINE_CONFIG"])
                    .split("__"),
            )
            .extract()?;
        if config.database.url.is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                config.database.url = url;
            }
        }
        Ok(config)
    }

    /// Defaults merged with the TOML file at `path`. A missing file is not an error.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Toml::file(path))
    }

    pub fn from_file(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.pipeline.closed_stage_display_limit, 20);
        assert_eq!(config.pipeline.default_analytics_period_days, 30);
        assert!(!config.pipeline.track_deal_history);
        assert!(config.database.run_migrations);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
storage = "memory"

[server]
port = 9090

[pipeline]
track_deal_history = true
closed_stage_display_limit = 5
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.pipeline.track_deal_history);
        assert_eq!(config.pipeline.closed_stage_display_limit, 5);
        assert_eq!(config.pipeline.default_analytics_period_days, 30);
        assert_eq!(config.database.pool_size, 10);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_bad_storage_value_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "storage = \"redis\"").unwrap();
        assert!(AppConfig::from_file(file.path()).is_err());
    }
}
