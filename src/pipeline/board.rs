use log::info;
use std::collections::HashMap;
use uuid::Uuid;

use super::engine::PipelineEngine;
use super::error::PipelineError;
use super::registry::default_stage;
use super::types::{Board, BoardCard, BoardColumn, ItemKind, Stage};

pub struct BoardBuilder<'a> {
    engine: &'a PipelineEngine,
}

impl<'a> BoardBuilder<'a> {
    pub fn new(engine: &'a PipelineEngine) -> Self {
        Self { engine }
    }

    /// Places every open, unstaged lead of the tenant in the default stage so the board
    /// never hides one. Returns how many leads were placed.
    pub async fn reconcile_unstaged_leads(
        &self,
        org_id: Uuid,
        stages: &[Stage],
    ) -> Result<usize, PipelineError> {
        let Some(stage) = default_stage(stages) else {
            return Ok(0);
        };
        let assigned = self
            .engine
            .store()
            .assign_unstaged_leads(org_id, stage, self.engine.now())
            .await?;
        if assigned > 0 {
            info!(
                "Assigned {assigned} unstaged lead(s) of org {org_id} to default stage \"{}\"",
                stage.name
            );
        }
        Ok(assigned)
    }

    pub async fn build(&self, org_id: Uuid, kind: ItemKind) -> Result<Board, PipelineError> {
        let stages = self.engine.stages().ensure_default_stages(org_id).await?;
        if kind == ItemKind::Lead {
            self.reconcile_unstaged_leads(org_id, &stages).await?;
        }

        let store = self.engine.store();
        let mut by_stage: HashMap<Uuid, Vec<BoardCard>> = HashMap::new();
        for card in store.load_open_cards(org_id, kind).await? {
            if let Some(stage_id) = card.stage_id {
                by_stage.entry(stage_id).or_default().push(card);
            }
        }

        let limit = self.engine.settings().closed_stage_display_limit;
        let mut columns = Vec::with_capacity(stages.len());
        for stage in stages {
            let items = if stage.is_closed {
                store
                    .load_closed_cards(org_id, kind, stage.outcome(), limit)
                    .await?
            } else {
                by_stage.remove(&stage.id).unwrap_or_default()
            };
            columns.push(column(stage, items));
        }

        Ok(Board {
            entity_type: kind,
            stages: columns,
        })
    }
}

fn column(stage: Stage, items: Vec<BoardCard>) -> BoardColumn {
    let total_value = items.iter().map(|card| card.value).sum();
    BoardColumn {
        stage,
        item_count: items.len(),
        total_value,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::TestPipeline;
    use crate::pipeline::storage::PipelineStore;
    use crate::pipeline::types::{Lead, LeadStatus};
    use chrono::Duration;

    #[tokio::test]
    async fn test_board_bootstraps_default_stages() {
        let t = TestPipeline::new();
        let board = t.engine.board().build(t.org_id, ItemKind::Lead).await.unwrap();

        assert_eq!(board.entity_type, ItemKind::Lead);
        let names: Vec<&str> = board.stages.iter().map(|c| c.stage.name.as_str()).collect();
        assert_eq!(
            names,
            ["New", "Contacted", "Qualified", "Proposal", "Negotiation", "Won", "Lost"]
        );
        let probabilities: Vec<i32> = board.stages.iter().map(|c| c.stage.probability).collect();
        assert_eq!(probabilities, [10, 20, 40, 60, 80, 100, 0]);
        assert!(board.stages[5].stage.is_closed);
        assert!(board.stages[6].stage.is_closed);
        assert!(board.stages.iter().all(|c| c.items.is_empty()));
    }

    #[tokio::test]
    async fn test_unstaged_leads_land_in_default_stage() {
        let t = TestPipeline::new();
        t.stages().await.unwrap();
        let open = t.insert_lead("Open", 1000.0, None).await.unwrap();
        t.advance(Duration::minutes(1));
        let second = t.insert_lead("Second", 200.0, None).await.unwrap();
        let mut lost = Lead::new(t.org_id, "Lost", 50.0, t.clock_now());
        lost.status = LeadStatus::Lost;
        t.store.insert_lead(lost.clone()).await.unwrap();

        let board = t.engine.board().build(t.org_id, ItemKind::Lead).await.unwrap();
        let new_column = &board.stages[0];
        let ids: Vec<Uuid> = new_column.items.iter().map(|c| c.id).collect();
        assert_eq!(ids, [open.id, second.id]);
        assert_eq!(new_column.item_count, 2);
        assert_eq!(new_column.total_value, 1200.0);
        assert_eq!(new_column.items[0].stage_entered_at, Some(t.clock_now()));
        assert_eq!(new_column.items[0].expected_revenue, 100.0);

        let lost = t.store.get_lead(t.org_id, lost.id).await.unwrap().unwrap();
        assert!(lost.stage_id.is_none());

        // Second load has nothing left to place.
        let placed = t
            .engine
            .board()
            .reconcile_unstaged_leads(t.org_id, &t.stages().await.unwrap())
            .await
            .unwrap();
        assert_eq!(placed, 0);
    }

    #[tokio::test]
    async fn test_columns_follow_stage_order() {
        let t = TestPipeline::new();
        let proposal = t.stage("Proposal").await.unwrap();
        let a = t.insert_lead("A", 1.0, Some(&proposal)).await.unwrap();
        let b = t.insert_lead("B", 1.0, Some(&proposal)).await.unwrap();
        t.engine
            .mover()
            .reorder_in_stage(t.org_id, ItemKind::Lead, proposal.id, vec![b.id, a.id])
            .await
            .unwrap();

        let board = t.engine.board().build(t.org_id, ItemKind::Lead).await.unwrap();
        let column = board.stages.iter().find(|c| c.stage.id == proposal.id).unwrap();
        let ids: Vec<Uuid> = column.items.iter().map(|c| c.id).collect();
        assert_eq!(ids, [b.id, a.id]);
    }

    #[tokio::test]
    async fn test_closed_columns_are_capped_and_newest_first() {
        let t = TestPipeline::new();
        let won = t.stage("Won").await.unwrap();
        let lead_ids: Vec<Uuid> = {
            let mut ids = Vec::new();
            for i in 0..25 {
                let lead = t.insert_lead(&format!("Lead {i}"), 10.0, None).await.unwrap();
                t.engine
                    .mover()
                    .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, won.id, None)
                    .await
                    .unwrap();
                t.advance(Duration::minutes(1));
                ids.push(lead.id);
            }
            ids
        };

        let board = t.engine.board().build(t.org_id, ItemKind::Lead).await.unwrap();
        let won_column = board.stages.iter().find(|c| c.stage.id == won.id).unwrap();
        assert_eq!(won_column.items.len(), 20);
        assert_eq!(won_column.items[0].id, lead_ids[24]);
        assert_eq!(won_column.items[19].id, lead_ids[5]);
        assert!(won_column.items.iter().all(|c| c.status == "WON"));

        let lost_column = board.stages.iter().find(|c| c.stage.name == "Lost").unwrap();
        assert!(lost_column.items.is_empty());
    }

    #[tokio::test]
    async fn test_deal_board_carries_display_names() {
        let t = TestPipeline::new();
        let qualified = t.stage("Qualified").await.unwrap();
        let (customer, owner) = (Uuid::new_v4(), Uuid::new_v4());
        t.store.insert_customer(customer, "Globex Corp").await;
        t.store.insert_user(owner, "Dana Scully").await;

        let mut deal = crate::pipeline::types::Deal::new(t.org_id, "Renewal", 900.0, t.clock_now());
        deal.customer_id = Some(customer);
        deal.owner_id = Some(owner);
        deal.stage_id = Some(qualified.id);
        t.store.insert_deal(deal.clone()).await.unwrap();
        t.insert_lead("Unstaged lead", 1.0, None).await.unwrap();

        let board = t.engine.board().build(t.org_id, ItemKind::Deal).await.unwrap();
        let column = board.stages.iter().find(|c| c.stage.id == qualified.id).unwrap();
        assert_eq!(column.items.len(), 1);
        assert_eq!(column.items[0].customer_name.as_deref(), Some("Globex Corp"));
        assert_eq!(column.items[0].assignee_name.as_deref(), Some("Dana Scully"));
        assert_eq!(column.items[0].entity_type, ItemKind::Deal);

        // Deal boards leave unstaged leads alone.
        let leads = t.store.load_open_cards(t.org_id, ItemKind::Lead).await.unwrap();
        assert!(leads.is_empty());
    }
}
