use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::shared::utils::DbPool;
use crate::pipeline::PipelineEngine;

/// Shared by every handler. `conn` is only set when running on PostgreSQL.
pub struct AppState {
    pub config: AppConfig,
    pub conn: Option<DbPool>,
    pub pipeline: PipelineEngine,
}

impl AppState {
    pub fn new(config: AppConfig, conn: Option<DbPool>, pipeline: PipelineEngine) -> Self {
        Self {
            config,
            conn,
            pipeline,
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("has_pool", &self.conn.is_some())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
