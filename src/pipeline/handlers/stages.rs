use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::middleware::TenantContext;
use crate::core::shared::state::AppState;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{
    CreateStageRequest, ReorderStagesRequest, Stage, StageWithCounts, UpdateStageRequest,
};

use super::{required, ApiJson, ApiPath};

pub async fn handle_list_stages(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
) -> Result<Json<Vec<StageWithCounts>>, PipelineError> {
    let stages = state.pipeline.stages().list_with_counts(tenant.org_id).await?;
    Ok(Json(stages))
}

pub async fn handle_get_stage(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiPath(stage_id): ApiPath<Uuid>,
) -> Result<Json<StageWithCounts>, PipelineError> {
    let stage = state
        .pipeline
        .stages()
        .get_with_counts(tenant.org_id, stage_id)
        .await?;
    Ok(Json(stage))
}

pub async fn handle_create_stage(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiJson(req): ApiJson<CreateStageRequest>,
) -> Result<(StatusCode, Json<Stage>), PipelineError> {
    let stage = state.pipeline.stages().create(tenant.org_id, req).await?;
    Ok((StatusCode::CREATED, Json(stage)))
}

pub async fn handle_update_stage(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiPath(stage_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateStageRequest>,
) -> Result<Json<Stage>, PipelineError> {
    let stage = state
        .pipeline
        .stages()
        .update(tenant.org_id, stage_id, req)
        .await?;
    Ok(Json(stage))
}

pub async fn handle_delete_stage(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiPath(stage_id): ApiPath<Uuid>,
) -> Result<StatusCode, PipelineError> {
    state.pipeline.stages().delete(tenant.org_id, stage_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_reorder_stages(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiJson(req): ApiJson<ReorderStagesRequest>,
) -> Result<Json<Vec<StageWithCounts>>, PipelineError> {
    let stage_ids = required(req.stage_ids, "stageIds")?;
    let stages = state
        .pipeline
        .stages()
        .reorder(tenant.org_id, stage_ids)
        .await?;
    Ok(Json(stages))
}
