use axum::{extract::State, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::middleware::TenantContext;
use crate::core::shared::state::AppState;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{
    ItemKind, MoveRequest, MovedItem, PipelineItem, ReorderInStageRequest,
    ReorderInStageResponse, StageHistoryEntry, ValueChangeRequest,
};

use super::{required, ApiJson, ApiPath};

pub async fn handle_move_item(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiJson(req): ApiJson<MoveRequest>,
) -> Result<Json<MovedItem>, PipelineError> {
    let entity_id = required(req.entity_id, "entityId")?;
    let kind = required(req.entity_type, "entityType")?;
    let stage_id = required(req.stage_id, "stageId")?;

    let moved = state
        .pipeline
        .mover()
        .move_to_stage(
            tenant.org_id,
            tenant.user_id,
            kind,
            entity_id,
            stage_id,
            req.new_order,
        )
        .await?;
    Ok(Json(moved))
}

pub async fn handle_reorder_in_stage(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiJson(req): ApiJson<ReorderInStageRequest>,
) -> Result<Json<ReorderInStageResponse>, PipelineError> {
    let stage_id = required(req.stage_id, "stageId")?;
    let kind = required(req.entity_type, "entityType")?;
    let ordered_ids = required(req.ordered_ids, "orderedIds")?;

    let updated = state
        .pipeline
        .mover()
        .reorder_in_stage(tenant.org_id, kind, stage_id, ordered_ids)
        .await?;
    Ok(Json(ReorderInStageResponse {
        stage_id,
        entity_type: kind,
        updated,
    }))
}

pub async fn handle_update_value(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiJson(req): ApiJson<ValueChangeRequest>,
) -> Result<Json<PipelineItem>, PipelineError> {
    let entity_id = required(req.entity_id, "entityId")?;
    let kind = required(req.entity_type, "entityType")?;
    let value = required(req.value, "value")?;

    let item = state
        .pipeline
        .mover()
        .update_value(tenant.org_id, kind, entity_id, value)
        .await?;
    Ok(Json(item))
}

pub async fn handle_lead_history(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiPath(lead_id): ApiPath<Uuid>,
) -> Result<Json<Vec<StageHistoryEntry>>, PipelineError> {
    let engine = &state.pipeline;
    engine
        .mover()
        .load_item(tenant.org_id, ItemKind::Lead, lead_id)
        .await
        .map_err(|e| match e {
            PipelineError::ItemNotFound { .. } => PipelineError::LeadNotFound(lead_id),
            other => other,
        })?;
    let history = engine
        .store()
        .history_for_item(tenant.org_id, ItemKind::Lead, lead_id)
        .await?;
    Ok(Json(history))
}
