use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use super::engine::PipelineEngine;
use super::error::PipelineError;
use super::forecast::{forecast, forecast_for_stage};
use super::storage::MoveCommit;
use super::types::{
    Activity, ActivityType, ItemKind, MovedItem, PipelineItem, Stage, StageOutcome, Stageable,
};

/// Moves Leads and Deals between stages, keeping forecast, status, stage ledger and
/// activity log in step with the stage pointer.
pub struct PipelineMover<'a> {
    engine: &'a PipelineEngine,
}

impl<'a> PipelineMover<'a> {
    pub fn new(engine: &'a PipelineEngine) -> Self {
        Self { engine }
    }

    pub async fn load_item(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        item_id: Uuid,
    ) -> Result<PipelineItem, PipelineError> {
        let store = self.engine.store();
        let item = match kind {
            ItemKind::Lead => store.get_lead(org_id, item_id).await?.map(PipelineItem::Lead),
            ItemKind::Deal => store.get_deal(org_id, item_id).await?.map(PipelineItem::Deal),
        };
        item.ok_or(PipelineError::ItemNotFound { kind, id: item_id })
    }

    fn ensure_movable(item: &PipelineItem) -> Result<(), PipelineError> {
        if let Some(deal_id) = item.converted_to_deal_id() {
            return Err(PipelineError::AlreadyConverted {
                lead_id: item.id(),
                deal_id: Some(deal_id),
            });
        }
        Ok(())
    }

    /// Puts the item into `stage_id`. A move into the item's current stage still
    /// refreshes forecast and status but leaves the stage ledger alone.
    pub async fn move_to_stage(
        &self,
        org_id: Uuid,
        actor_id: Option<Uuid>,
        kind: ItemKind,
        item_id: Uuid,
        stage_id: Uuid,
        new_order: Option<i32>,
    ) -> Result<MovedItem, PipelineError> {
        let store = self.engine.store();
        let stage = self.engine.stages().get(org_id, stage_id).await?;
        let mut item = self.load_item(org_id, kind, item_id).await?;
        Self::ensure_movable(&item)?;

        let now = self.engine.now();
        let previous_stage_id = item.stage_id();
        let stage_changed = previous_stage_id != Some(stage.id);

        let order = match new_order {
            Some(order) => order,
            None if stage_changed => store.next_stage_order(org_id, kind, stage.id).await?,
            None => item.as_stageable().stage_order(),
        };

        let history = self
            .engine
            .history()
            .transition(item.as_stageable(), stage.id, actor_id, now);

        {
            let stageable = item.as_stageable_mut();
            let value = stageable.value();
            stageable.apply_forecast(forecast_for_stage(value, &stage));
            stageable.apply_outcome(stage.outcome(), now);
            stageable.place(stage.id, order, stage_changed.then_some(now));
            stageable.touch(now);
        }

        let previous_stage_name = match previous_stage_id {
            Some(id) if stage_changed => store.get_stage(org_id, id).await?.map(|s| s.name),
            _ => None,
        };
        let activity = move_activity(
            &item,
            &stage,
            previous_stage_name.as_deref(),
            actor_id,
            now,
        );

        debug!(
            "Moving {} {} to stage {} (order {order})",
            kind, item_id, stage.id
        );
        store
            .commit_move(MoveCommit {
                item: item.clone(),
                history,
                activity,
            })
            .await?;

        if stage.outcome() != StageOutcome::Open {
            info!(
                "{} {} closed as {} in stage \"{}\"",
                kind,
                item_id,
                if stage.is_won { "won" } else { "lost" },
                stage.name
            );
        }

        Ok(MovedItem { item, stage })
    }

    /// Changes the item's value and recomputes its expected revenue from the current
    /// stage probability, or the stored probability when the item has no stage.
    pub async fn update_value(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        item_id: Uuid,
        value: f64,
    ) -> Result<PipelineItem, PipelineError> {
        if !value.is_finite() || value < 0.0 {
            return Err(PipelineError::Validation(
                "value must be a non-negative number".into(),
            ));
        }

        let store = self.engine.store();
        let mut item = self.load_item(org_id, kind, item_id).await?;
        Self::ensure_movable(&item)?;

        let stage = match item.stage_id() {
            Some(id) => store.get_stage(org_id, id).await?,
            None => None,
        };
        let now = self.engine.now();
        {
            let stageable = item.as_stageable_mut();
            stageable.set_value(value);
            let next = match &stage {
                Some(stage) => forecast_for_stage(value, stage),
                None => forecast(value, stageable.probability()),
            };
            stageable.apply_forecast(next);
            stageable.touch(now);
        }

        store.commit_value_change(item.clone()).await?;
        Ok(item)
    }

    /// Rewrites `stage_order` to each id's index. Ids not in the stage are skipped.
    pub async fn reorder_in_stage(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
        ordered_ids: Vec<Uuid>,
    ) -> Result<usize, PipelineError> {
        self.engine.stages().get(org_id, stage_id).await?;
        let updated = self
            .engine
            .store()
            .reorder_in_stage(org_id, kind, stage_id, ordered_ids, self.engine.now())
            .await?;
        debug!("Reordered {updated} {kind} item(s) in stage {stage_id}");
        Ok(updated)
    }
}

fn move_activity(
    item: &PipelineItem,
    stage: &Stage,
    previous_stage_name: Option<&str>,
    actor_id: Option<Uuid>,
    at: DateTime<Utc>,
) -> Activity {
    let kind = item.kind();
    let activity_type = ActivityType::for_move(kind, stage.outcome());
    let title = item.as_stageable().title();
    let headline = match stage.outcome() {
        StageOutcome::Won => format!("{kind} won: {title}"),
        StageOutcome::Lost => format!("{kind} lost: {title}"),
        StageOutcome::Open => format!("{kind} moved to {}: {title}", stage.name),
    };
    let description = match previous_stage_name {
        Some(previous) => format!("Moved from {previous} to {}", stage.name),
        None => format!("Moved to {}", stage.name),
    };
    let (lead_id, deal_id) = match item {
        PipelineItem::Lead(lead) => (Some(lead.id), None),
        PipelineItem::Deal(deal) => (deal.lead_id, Some(deal.id)),
    };

    Activity {
        id: Uuid::new_v4(),
        org_id: item.as_stageable().org_id(),
        activity_type,
        title: headline,
        description: Some(description),
        lead_id,
        deal_id,
        stage_id: Some(stage.id),
        actor_id,
        created_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::TestPipeline;
    use crate::pipeline::storage::PipelineStore;
    use crate::pipeline::types::{DealStatus, LeadStatus, PipelineSettings};
    use chrono::Duration;

    #[tokio::test]
    async fn test_move_recomputes_forecast() {
        let t = TestPipeline::new();
        let qualified = t.stage("Qualified").await.unwrap();
        let lead = t.insert_lead("Acme", 1000.0, None).await.unwrap();

        let moved = t
            .engine
            .mover()
            .move_to_stage(t.org_id, Some(t.user_id), ItemKind::Lead, lead.id, qualified.id, None)
            .await
            .unwrap();
        let PipelineItem::Lead(lead) = moved.item else {
            panic!("expected a lead");
        };
        assert_eq!(lead.probability, 40);
        assert_eq!(lead.expected_revenue, 400.0);
        assert_eq!(lead.stage_id, Some(qualified.id));
        assert_eq!(lead.stage_entered_at, Some(t.clock_now()));
        assert_eq!(moved.stage.id, qualified.id);

        let stored = t.store.get_lead(t.org_id, lead.id).await.unwrap().unwrap();
        assert_eq!(stored.expected_revenue, 400.0);
    }

    #[tokio::test]
    async fn test_move_closes_previous_history_row() {
        let t = TestPipeline::new();
        let (new, contacted) = (t.stage("New").await.unwrap(), t.stage("Contacted").await.unwrap());
        let lead = t.insert_lead("Acme", 100.0, None).await.unwrap();
        let mover = t.engine.mover();

        mover
            .move_to_stage(t.org_id, Some(t.user_id), ItemKind::Lead, lead.id, new.id, None)
            .await
            .unwrap();
        let t0 = t.clock_now();
        t.advance(Duration::milliseconds(600_000));
        mover
            .move_to_stage(t.org_id, Some(t.user_id), ItemKind::Lead, lead.id, contacted.id, None)
            .await
            .unwrap();

        let history = t
            .store
            .history_for_item(t.org_id, ItemKind::Lead, lead.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage_id, new.id);
        assert_eq!(history[0].entered_at, t0);
        assert_eq!(history[0].exited_at, Some(t0 + Duration::milliseconds(600_000)));
        assert_eq!(history[0].duration_minutes, Some(10));
        assert_eq!(history[1].stage_id, contacted.id);
        assert!(history[1].is_open());
        assert_eq!(history[1].moved_by, Some(t.user_id));
    }

    #[tokio::test]
    async fn test_at_most_one_open_history_row() {
        let t = TestPipeline::new();
        let stages = t.stages().await.unwrap();
        let lead = t.insert_lead("Acme", 100.0, None).await.unwrap();
        let mover = t.engine.mover();

        for stage in stages.iter().chain(stages.iter().rev()).chain(stages.iter()) {
            mover
                .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, stage.id, None)
                .await
                .unwrap();
            t.advance(Duration::minutes(1));
            let open = t
                .store
                .history_for_item(t.org_id, ItemKind::Lead, lead.id)
                .await
                .unwrap()
                .into_iter()
                .filter(|h| h.is_open())
                .count();
            assert_eq!(open, 1);
        }
    }

    #[tokio::test]
    async fn test_same_stage_move_keeps_ledger() {
        let t = TestPipeline::new();
        let proposal = t.stage("Proposal").await.unwrap();
        let lead = t.insert_lead("Acme", 100.0, None).await.unwrap();
        let mover = t.engine.mover();

        mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, proposal.id, None)
            .await
            .unwrap();
        let entered = t.clock_now();
        t.advance(Duration::minutes(5));
        let moved = mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, proposal.id, Some(3))
            .await
            .unwrap();

        let PipelineItem::Lead(lead) = moved.item else {
            panic!("expected a lead");
        };
        assert_eq!(lead.stage_order, 3);
        assert_eq!(lead.stage_entered_at, Some(entered));
        let history = t
            .store
            .history_for_item(t.org_id, ItemKind::Lead, lead.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_open());
    }

    #[tokio::test]
    async fn test_move_into_won_stage_closes_lead() {
        let t = TestPipeline::new();
        let won = t.stage("Won").await.unwrap();
        let lead = t.insert_lead("Acme", 100.0, None).await.unwrap();

        let moved = t
            .engine
            .mover()
            .move_to_stage(t.org_id, Some(t.user_id), ItemKind::Lead, lead.id, won.id, None)
            .await
            .unwrap();
        let PipelineItem::Lead(lead) = moved.item else {
            panic!("expected a lead");
        };
        assert_eq!(lead.status, LeadStatus::Won);
        assert_eq!(lead.closed_at, Some(t.clock_now()));

        let activities = t.store.recent_activities(t.org_id, 10).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, ActivityType::LeadWon);
        assert_eq!(activities[0].title, "Lead won: Acme");
        assert_eq!(activities[0].actor_id, Some(t.user_id));
        assert_eq!(activities[0].lead_id, Some(lead.id));
    }

    #[tokio::test]
    async fn test_reopening_a_closed_deal_clears_timestamps() {
        let t = TestPipeline::new();
        let (lost, proposal) = (t.stage("Lost").await.unwrap(), t.stage("Proposal").await.unwrap());
        let deal = t.insert_deal("Globex", 2000.0, None).await.unwrap();
        let mover = t.engine.mover();

        let moved = mover
            .move_to_stage(t.org_id, None, ItemKind::Deal, deal.id, lost.id, None)
            .await
            .unwrap();
        let PipelineItem::Deal(closed) = moved.item else {
            panic!("expected a deal");
        };
        assert_eq!(closed.status, DealStatus::Lost);
        assert!(closed.lost_at.is_some());
        assert_eq!(closed.expected_revenue, 0.0);

        let moved = mover
            .move_to_stage(t.org_id, None, ItemKind::Deal, deal.id, proposal.id, None)
            .await
            .unwrap();
        let PipelineItem::Deal(reopened) = moved.item else {
            panic!("expected a deal");
        };
        assert_eq!(reopened.status, DealStatus::Active);
        assert_eq!(reopened.lost_at, None);
        assert_eq!(reopened.actual_close_date, None);
        assert_eq!(reopened.expected_revenue, 1200.0);

        let activities = t.store.recent_activities(t.org_id, 10).await.unwrap();
        assert_eq!(activities[0].activity_type, ActivityType::StageChanged);
        assert_eq!(activities[1].activity_type, ActivityType::DealLost);
    }

    #[tokio::test]
    async fn test_deal_history_follows_settings() {
        let t = TestPipeline::new();
        let proposal = t.stage("Proposal").await.unwrap();
        let deal = t.insert_deal("Globex", 10.0, None).await.unwrap();
        t.engine
            .mover()
            .move_to_stage(t.org_id, None, ItemKind::Deal, deal.id, proposal.id, None)
            .await
            .unwrap();
        assert!(t.store.all_history().await.is_empty());

        let t = TestPipeline::with_settings(PipelineSettings {
            track_deal_history: true,
            ..Default::default()
        });
        let proposal = t.stage("Proposal").await.unwrap();
        let deal = t.insert_deal("Globex", 10.0, None).await.unwrap();
        t.engine
            .mover()
            .move_to_stage(t.org_id, None, ItemKind::Deal, deal.id, proposal.id, None)
            .await
            .unwrap();
        let history = t.store.all_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].item_kind, ItemKind::Deal);
    }

    #[tokio::test]
    async fn test_move_appends_to_end_of_target_column() {
        let t = TestPipeline::new();
        let qualified = t.stage("Qualified").await.unwrap();
        t.insert_lead("Existing", 1.0, Some(&qualified)).await.unwrap();
        t.insert_lead("Existing 2", 1.0, Some(&qualified)).await.unwrap();
        let lead = t.insert_lead("Acme", 1.0, None).await.unwrap();

        let moved = t
            .engine
            .mover()
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, qualified.id, None)
            .await
            .unwrap();
        assert_eq!(moved.item.as_stageable().stage_order(), 2);
    }

    #[tokio::test]
    async fn test_move_errors() {
        let t = TestPipeline::new();
        let new = t.stage("New").await.unwrap();
        let lead = t.insert_lead("Acme", 1.0, None).await.unwrap();
        let mover = t.engine.mover();

        let err = mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageNotFound(_)));

        let err = mover
            .move_to_stage(t.org_id, None, ItemKind::Deal, lead.id, new.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ItemNotFound { kind: ItemKind::Deal, .. }));

        let other_org = Uuid::new_v4();
        let err = mover
            .move_to_stage(other_org, None, ItemKind::Lead, lead.id, new.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageNotFound(_)));

        assert!(t.store.recent_activities(t.org_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_converted_lead_cannot_move() {
        let t = TestPipeline::new();
        let new = t.stage("New").await.unwrap();
        let lead = t.insert_lead("Acme", 500.0, Some(&new)).await.unwrap();
        t.engine
            .converter()
            .convert(t.org_id, Some(t.user_id), lead.id, Default::default())
            .await
            .unwrap();

        let err = t
            .engine
            .mover()
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, new.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyConverted { .. }));
    }

    #[tokio::test]
    async fn test_update_value_uses_stage_probability() {
        let t = TestPipeline::new();
        let negotiation = t.stage("Negotiation").await.unwrap();
        let deal = t.insert_deal("Globex", 1000.0, Some(&negotiation)).await.unwrap();
        assert_eq!(deal.expected_revenue, 800.0);

        let item = t
            .engine
            .mover()
            .update_value(t.org_id, ItemKind::Deal, deal.id, 2500.0)
            .await
            .unwrap();
        let PipelineItem::Deal(deal) = item else {
            panic!("expected a deal");
        };
        assert_eq!(deal.value, 2500.0);
        assert_eq!(deal.probability, 80);
        assert_eq!(deal.expected_revenue, 2000.0);

        let err = t
            .engine
            .mover()
            .update_value(t.org_id, ItemKind::Deal, deal.id, -1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reorder_in_stage_skips_foreign_items() {
        let t = TestPipeline::new();
        let (new, won) = (t.stage("New").await.unwrap(), t.stage("Won").await.unwrap());
        let a = t.insert_lead("A", 1.0, Some(&new)).await.unwrap();
        let b = t.insert_lead("B", 1.0, Some(&new)).await.unwrap();
        let elsewhere = t.insert_lead("C", 1.0, Some(&won)).await.unwrap();

        let updated = t
            .engine
            .mover()
            .reorder_in_stage(t.org_id, ItemKind::Lead, new.id, vec![b.id, elsewhere.id, a.id])
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let a = t.store.get_lead(t.org_id, a.id).await.unwrap().unwrap();
        let b = t.store.get_lead(t.org_id, b.id).await.unwrap().unwrap();
        assert_eq!(b.stage_order, 0);
        assert_eq!(a.stage_order, 2);

        let err = t
            .engine
            .mover()
            .reorder_in_stage(t.org_id, ItemKind::Lead, Uuid::new_v4(), vec![a.id])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageNotFound(_)));
    }
}
