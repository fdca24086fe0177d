use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::middleware::TenantContext;
use crate::core::shared::state::AppState;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{ConversionResult, ConvertRequest};

use super::{ApiPath, OptionalJson};

/// The body is optional; an empty request converts with the lead's own value.
pub async fn handle_convert_lead(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiPath(lead_id): ApiPath<Uuid>,
    OptionalJson(req): OptionalJson<ConvertRequest>,
) -> Result<(StatusCode, Json<ConversionResult>), PipelineError> {
    let result = state
        .pipeline
        .converter()
        .convert(tenant.org_id, tenant.user_id, lead_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}
