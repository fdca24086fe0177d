use axum::{extract::State, Json};
use std::sync::Arc;

use crate::core::middleware::TenantContext;
use crate::core::shared::state::AppState;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{AnalyticsQuery, PipelineAnalytics};

use super::ApiQuery;

pub async fn handle_get_analytics(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    ApiQuery(query): ApiQuery<AnalyticsQuery>,
) -> Result<Json<PipelineAnalytics>, PipelineError> {
    let report = state
        .pipeline
        .analytics()
        .compute(tenant.org_id, query.period)
        .await?;
    Ok(Json(report))
}
