//! Liveness, storage reachability and connection pool usage

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log::warn;
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let storage_ok = match state.pipeline.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check could not reach storage: {}", e);
            false
        }
    };

    let database = state.conn.as_ref().map(|pool| {
        let pool_state = pool.state();
        serde_json::json!({
            "connections": pool_state.connections,
            "idleConnections": pool_state.idle_connections,
            "maxSize": pool.max_size()
        })
    });

    let (status, code) = if storage_ok {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "crm-pipeline",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": storage_ok,
            "database": database
        })),
    )
}
