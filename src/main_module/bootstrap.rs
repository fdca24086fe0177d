//! Storage and application state initialization

use anyhow::{bail, Context};
use log::info;
use std::sync::Arc;

use crate::core::config::{AppConfig, StorageBackend};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{create_conn, redact_database_url, run_migrations};
use crate::pipeline::storage::{InMemoryPipelineStore, PgPipelineStore, PipelineStore};
use crate::pipeline::PipelineEngine;

/// Opens the configured store, applies migrations when asked to, and wires the engine.
pub fn init_app_state(config: AppConfig) -> anyhow::Result<Arc<AppState>> {
    let (store, pool): (Arc<dyn PipelineStore>, _) = match config.storage {
        StorageBackend::Memory => {
            info!("Using in-memory pipeline storage; data is lost on exit");
            (Arc::new(InMemoryPipelineStore::new()), None)
        }
        StorageBackend::Postgres => {
            if config.database.url.is_empty() {
                bail!("database.url is not set (use CRM_DATABASE__URL or DATABASE_URL)");
            }
            info!(
                "Connecting to {}",
                redact_database_url(&config.database.url)
            );
            let pool = create_conn(&config.database.url, config.database.pool_size)
                .context("failed to create database pool")?;
            if config.database.run_migrations {
                let applied = run_migrations(&pool)
                    .map_err(|e| anyhow::anyhow!("{e}"))
                    .context("failed to run migrations")?;
                info!("Applied {} pending migration(s)", applied);
            }
            (Arc::new(PgPipelineStore::new(pool.clone())), Some(pool))
        }
    };

    let engine = PipelineEngine::with_system_clock(store, config.pipeline.clone());
    Ok(AppState::new(config, pool, engine).into_shared())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_needs_no_database() {
        let config = AppConfig {
            storage: StorageBackend::Memory,
            ..AppConfig::default()
        };
        let state = init_app_state(config).unwrap();
        assert!(state.conn.is_none());
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let err = init_app_state(AppConfig::default()).unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }
}
