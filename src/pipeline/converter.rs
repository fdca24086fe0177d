use log::info;
use uuid::Uuid;

use super::engine::PipelineEngine;
use super::error::PipelineError;
use super::forecast::forecast_for_stage;
use super::registry::first_open_stage;
use super::storage::ConversionCommit;
use super::types::{
    Activity, ActivityType, ConversionResult, ConvertRequest, Deal, ItemKind, LeadStatus,
    Stageable,
};

/// Turns a lead into a deal, once. The lead is closed as won and linked to the deal
/// without going through a stage move, so its stage ledger is left as it was.
pub struct LeadConverter<'a> {
    engine: &'a PipelineEngine,
}

impl<'a> LeadConverter<'a> {
    pub fn new(engine: &'a PipelineEngine) -> Self {
        Self { engine }
    }

    pub async fn convert(
        &self,
        org_id: Uuid,
        actor_id: Option<Uuid>,
        lead_id: Uuid,
        req: ConvertRequest,
    ) -> Result<ConversionResult, PipelineError> {
        let store = self.engine.store();
        let mut lead = store
            .get_lead(org_id, lead_id)
            .await?
            .ok_or(PipelineError::LeadNotFound(lead_id))?;
        if lead.is_converted() {
            return Err(PipelineError::AlreadyConverted {
                lead_id,
                deal_id: lead.converted_to_deal_id,
            });
        }

        let value = req.value.unwrap_or(lead.value);
        if !value.is_finite() || value < 0.0 {
            return Err(PipelineError::Validation(
                "value must be a non-negative number".into(),
            ));
        }

        let stages = self.engine.stages().ensure_default_stages(org_id).await?;
        let stage = first_open_stage(&stages)
            .cloned()
            .ok_or_else(|| PipelineError::Validation("No open stage to place the deal in".into()))?;

        let now = self.engine.now();
        let mut deal = Deal::new(org_id, lead.title.clone(), value, now);
        deal.description = lead.description.clone();
        deal.customer_id = lead.customer_id;
        deal.owner_id = lead.assignee_id.or(actor_id);
        deal.lead_id = Some(lead.id);
        deal.expected_close_date = req.expected_close_date.or(lead.expected_close_date);
        let order = store
            .next_stage_order(org_id, ItemKind::Deal, stage.id)
            .await?;
        deal.place(stage.id, order, Some(now));
        deal.apply_forecast(forecast_for_stage(value, &stage));

        lead.converted_to_deal_id = Some(deal.id);
        lead.status = LeadStatus::Won;
        lead.closed_at = Some(now);
        lead.touch(now);

        let activity = Activity {
            id: Uuid::new_v4(),
            org_id,
            activity_type: ActivityType::LeadConverted,
            title: format!("Lead converted to deal: {}", lead.title),
            description: Some(format!("Deal created in stage {}", stage.name)),
            lead_id: Some(lead.id),
            deal_id: Some(deal.id),
            stage_id: Some(stage.id),
            actor_id,
            created_at: now,
        };

        let lead = store
            .commit_conversion(ConversionCommit {
                deal: deal.clone(),
                lead,
                activity,
            })
            .await?;
        info!(
            "Converted lead {} into deal {} for org {org_id}",
            lead.id, deal.id
        );

        Ok(ConversionResult { deal, lead })
    }
}
