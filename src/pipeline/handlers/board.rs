use axum::{extract::State, Json};
use std::sync::Arc;

use crate::core::middleware::TenantContext;
use crate::core::shared::state::AppState;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{Board, BoardQuery, ItemKind};

use super::ApiQuery;

pub async fn handle_get_board(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiQuery(query): ApiQuery<BoardQuery>,
) -> Result<Json<Board>, PipelineError> {
    let kind = query.entity_type.unwrap_or(ItemKind::Lead);
    let board = state.pipeline.board().build(tenant.org_id, kind).await?;
    Ok(Json(board))
}
