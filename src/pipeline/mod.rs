pub mod analytics;
pub mod board;
pub mod clock;
pub mod converter;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod handlers;
pub mod history;
pub mod mover;
pub mod registry;
pub mod storage;
pub mod types;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub use engine::PipelineEngine;
pub use error::{ErrorKind, PipelineError};
pub use handlers::*;
pub use storage::{InMemoryPipelineStore, PgPipelineStore, PipelineStore};
pub use types::*;

pub fn configure_pipeline_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/crm/pipeline/stages",
            get(handle_list_stages).post(handle_create_stage),
        )
        .route("/api/crm/pipeline/stages/reorder", post(handle_reorder_stages))
        .route(
            "/api/crm/pipeline/stages/:id",
            get(handle_get_stage)
                .patch(handle_update_stage)
                .delete(handle_delete_stage),
        )
        .route("/api/crm/pipeline/board", get(handle_get_board))
        .route("/api/crm/pipeline/move", post(handle_move_item))
        .route(
            "/api/crm/pipeline/reorder-in-stage",
            post(handle_reorder_in_stage),
        )
        .route("/api/crm/pipeline/value", patch(handle_update_value))
        .route("/api/crm/pipeline/analytics", get(handle_get_analytics))
        .route(
            "/api/crm/pipeline/leads/:id/history",
            get(handle_lead_history),
        )
        .route("/api/crm/leads/:id/convert", post(handle_convert_lead))
}
