use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ConversionCommit, MoveCommit, PipelineStore, StageDeletion, StoreResult,
};
use crate::pipeline::error::PipelineError;
use crate::pipeline::forecast::forecast_for_stage;
use crate::pipeline::history::close_open_rows;
use crate::pipeline::types::{
    Activity, BoardCard, Deal, DealStatus, ItemFact, ItemKind, Lead, LeadStatus, PipelineItem,
    Stage, StageCounts, StageHistoryEntry, StageOutcome, Stageable,
};

#[derive(Debug, Default)]
struct MemoryState {
    stages: Vec<Stage>,
    leads: Vec<Lead>,
    deals: Vec<Deal>,
    history: Vec<StageHistoryEntry>,
    activities: Vec<Activity>,
    customers: HashMap<Uuid, String>,
    users: HashMap<Uuid, String>,
}

impl MemoryState {
    fn clear_other_defaults(&mut self, stage: &Stage) {
        if !stage.is_default {
            return;
        }
        for other in self
            .stages
            .iter_mut()
            .filter(|s| s.org_id == stage.org_id && s.id != stage.id)
        {
            other.is_default = false;
        }
    }

    fn lead_card(&self, lead: &Lead) -> BoardCard {
        BoardCard::from_lead(
            lead,
            lead.customer_id.and_then(|id| self.customers.get(&id).cloned()),
            lead.assignee_id.and_then(|id| self.users.get(&id).cloned()),
        )
    }

    fn deal_card(&self, deal: &Deal) -> BoardCard {
        BoardCard::from_deal(
            deal,
            deal.customer_id.and_then(|id| self.customers.get(&id).cloned()),
            deal.owner_id.and_then(|id| self.users.get(&id).cloned()),
        )
    }

    fn next_stage_order(&self, org_id: Uuid, kind: ItemKind, stage_id: Uuid) -> i32 {
        let max = match kind {
            ItemKind::Lead => self
                .leads
                .iter()
                .filter(|l| l.org_id == org_id && l.stage_id == Some(stage_id))
                .map(|l| l.stage_order)
                .max(),
            ItemKind::Deal => self
                .deals
                .iter()
                .filter(|d| d.org_id == org_id && d.stage_id == Some(stage_id))
                .map(|d| d.stage_order)
                .max(),
        };
        max.map_or(0, |m| m + 1)
    }

    fn replace_item(&mut self, item: PipelineItem) -> StoreResult<()> {
        match item {
            PipelineItem::Lead(lead) => {
                let slot = self
                    .leads
                    .iter_mut()
                    .find(|l| l.id == lead.id && l.org_id == lead.org_id)
                    .ok_or(PipelineError::ItemNotFound {
                        kind: ItemKind::Lead,
                        id: lead.id,
                    })?;
                if slot.is_converted() {
                    return Err(PipelineError::AlreadyConverted {
                        lead_id: slot.id,
                        deal_id: slot.converted_to_deal_id,
                    });
                }
                *slot = lead;
            }
            PipelineItem::Deal(deal) => {
                let slot = self
                    .deals
                    .iter_mut()
                    .find(|d| d.id == deal.id && d.org_id == deal.org_id)
                    .ok_or(PipelineError::ItemNotFound {
                        kind: ItemKind::Deal,
                        id: deal.id,
                    })?;
                *slot = deal;
            }
        }
        Ok(())
    }
}

/// Store backed by process memory. One write lock per commit keeps each unit of work
/// atomic. Used by tests and the `memory` storage mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPipelineStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, id: Uuid, name: impl Into<String>) {
        self.state.write().await.customers.insert(id, name.into());
    }

    pub async fn insert_user(&self, id: Uuid, display_name: impl Into<String>) {
        self.state.write().await.users.insert(id, display_name.into());
    }

    pub async fn all_history(&self) -> Vec<StageHistoryEntry> {
        self.state.read().await.history.clone()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn list_stages(&self, org_id: Uuid) -> StoreResult<Vec<Stage>> {
        let state = self.state.read().await;
        let mut stages: Vec<Stage> = state
            .stages
            .iter()
            .filter(|s| s.org_id == org_id)
            .cloned()
            .collect();
        stages.sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
        Ok(stages)
    }

    async fn get_stage(&self, org_id: Uuid, stage_id: Uuid) -> StoreResult<Option<Stage>> {
        let state = self.state.read().await;
        Ok(state
            .stages
            .iter()
            .find(|s| s.id == stage_id && s.org_id == org_id)
            .cloned())
    }

    async fn insert_default_stages_if_empty(
        &self,
        org_id: Uuid,
        stages: Vec<Stage>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.stages.iter().any(|s| s.org_id == org_id) {
            return Ok(false);
        }
        state.stages.extend(stages);
        Ok(true)
    }

    async fn insert_stage(&self, stage: Stage) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.clear_other_defaults(&stage);
        state.stages.push(stage);
        Ok(())
    }

    async fn update_stage(&self, stage: Stage) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.clear_other_defaults(&stage);
        let slot = state
            .stages
            .iter_mut()
            .find(|s| s.id == stage.id && s.org_id == stage.org_id)
            .ok_or(PipelineError::StageNotFound(stage.id))?;
        *slot = stage;
        Ok(())
    }

    async fn delete_stage_if_unused(
        &self,
        org_id: Uuid,
        stage_id: Uuid,
    ) -> StoreResult<StageDeletion> {
        let mut state = self.state.write().await;
        let Some(position) = state
            .stages
            .iter()
            .position(|s| s.id == stage_id && s.org_id == org_id)
        else {
            return Ok(StageDeletion::NotFound);
        };

        let leads = state
            .leads
            .iter()
            .filter(|l| l.stage_id == Some(stage_id))
            .count() as i64;
        let deals = state
            .deals
            .iter()
            .filter(|d| d.stage_id == Some(stage_id))
            .count() as i64;
        if leads > 0 || deals > 0 {
            return Ok(StageDeletion::HasDependents {
                name: state.stages[position].name.clone(),
                leads,
                deals,
            });
        }

        state.stages.remove(position);
        Ok(StageDeletion::Deleted)
    }

    async fn reorder_stages(
        &self,
        org_id: Uuid,
        ordered_ids: Vec<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for (index, id) in ordered_ids.iter().enumerate() {
            if let Some(stage) = state
                .stages
                .iter_mut()
                .find(|s| s.id == *id && s.org_id == org_id)
            {
                stage.order = index as i32;
                stage.updated_at = at;
            }
        }
        Ok(())
    }

    async fn stage_item_counts(&self, org_id: Uuid) -> StoreResult<HashMap<Uuid, StageCounts>> {
        let state = self.state.read().await;
        let mut counts: HashMap<Uuid, StageCounts> = HashMap::new();
        for stage_id in state
            .leads
            .iter()
            .filter(|l| l.org_id == org_id)
            .filter_map(|l| l.stage_id)
        {
            counts.entry(stage_id).or_default().lead_count += 1;
        }
        for stage_id in state
            .deals
            .iter()
            .filter(|d| d.org_id == org_id)
            .filter_map(|d| d.stage_id)
        {
            counts.entry(stage_id).or_default().deal_count += 1;
        }
        Ok(counts)
    }

    async fn insert_lead(&self, lead: Lead) -> StoreResult<()> {
        self.state.write().await.leads.push(lead);
        Ok(())
    }

    async fn insert_deal(&self, deal: Deal) -> StoreResult<()> {
        self.state.write().await.deals.push(deal);
        Ok(())
    }

    async fn get_lead(&self, org_id: Uuid, lead_id: Uuid) -> StoreResult<Option<Lead>> {
        let state = self.state.read().await;
        Ok(state
            .leads
            .iter()
            .find(|l| l.id == lead_id && l.org_id == org_id)
            .cloned())
    }

    async fn get_deal(&self, org_id: Uuid, deal_id: Uuid) -> StoreResult<Option<Deal>> {
        let state = self.state.read().await;
        Ok(state
            .deals
            .iter()
            .find(|d| d.id == deal_id && d.org_id == org_id)
            .cloned())
    }

    async fn next_stage_order(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
    ) -> StoreResult<i32> {
        Ok(self.state.read().await.next_stage_order(org_id, kind, stage_id))
    }

    async fn assign_unstaged_leads(
        &self,
        org_id: Uuid,
        stage: &Stage,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let mut order = state.next_stage_order(org_id, ItemKind::Lead, stage.id);

        let mut unstaged: Vec<&mut Lead> = state
            .leads
            .iter_mut()
            .filter(|l| {
                l.org_id == org_id
                    && l.stage_id.is_none()
                    && !l.status.is_terminal()
                    && !l.is_converted()
            })
            .collect();
        unstaged.sort_by_key(|l| l.created_at);

        let assigned = unstaged.len();
        for lead in unstaged {
            let forecast = forecast_for_stage(lead.value, stage);
            lead.place(stage.id, order, Some(at));
            lead.apply_forecast(forecast);
            lead.touch(at);
            order += 1;
        }
        Ok(assigned)
    }

    async fn load_open_cards(&self, org_id: Uuid, kind: ItemKind) -> StoreResult<Vec<BoardCard>> {
        let state = self.state.read().await;
        let mut cards: Vec<BoardCard> = match kind {
            ItemKind::Lead => state
                .leads
                .iter()
                .filter(|l| l.org_id == org_id && l.stage_id.is_some() && !l.status.is_terminal())
                .map(|l| state.lead_card(l))
                .collect(),
            ItemKind::Deal => state
                .deals
                .iter()
                .filter(|d| d.org_id == org_id && d.stage_id.is_some())
                .map(|d| state.deal_card(d))
                .collect(),
        };
        cards.sort_by(|a, b| {
            a.stage_order
                .cmp(&b.stage_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(cards)
    }

    async fn load_closed_cards(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        outcome: StageOutcome,
        limit: i64,
    ) -> StoreResult<Vec<BoardCard>> {
        let state = self.state.read().await;
        let mut cards: Vec<BoardCard> = match (kind, outcome) {
            (_, StageOutcome::Open) => Vec::new(),
            (ItemKind::Lead, outcome) => {
                let status = if outcome == StageOutcome::Won {
                    LeadStatus::Won
                } else {
                    LeadStatus::Lost
                };
                state
                    .leads
                    .iter()
                    .filter(|l| l.org_id == org_id && l.status == status && l.closed_at.is_some())
                    .map(|l| state.lead_card(l))
                    .collect()
            }
            (ItemKind::Deal, outcome) => {
                let status = if outcome == StageOutcome::Won {
                    DealStatus::Won
                } else {
                    DealStatus::Lost
                };
                state
                    .deals
                    .iter()
                    .filter(|d| {
                        d.org_id == org_id && d.status == status && d.actual_close_date.is_some()
                    })
                    .map(|d| state.deal_card(d))
                    .collect()
            }
        };
        cards.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        cards.truncate(limit.max(0) as usize);
        Ok(cards)
    }

    async fn commit_move(&self, commit: MoveCommit) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let org_id = commit.activity.org_id;
        state.replace_item(commit.item)?;

        if let Some(transition) = commit.history {
            let mut open: Vec<StageHistoryEntry> = state
                .history
                .iter()
                .filter(|h| {
                    h.org_id == org_id
                        && h.item_kind == transition.item_kind
                        && h.item_id == transition.item_id
                        && h.is_open()
                })
                .cloned()
                .collect();
            close_open_rows(&mut open, &transition);
            for closed in open {
                if let Some(row) = state.history.iter_mut().find(|h| h.id == closed.id) {
                    *row = closed;
                }
            }
            state.history.push(transition.opened);
        }

        state.activities.push(commit.activity);
        Ok(())
    }

    async fn commit_value_change(&self, item: PipelineItem) -> StoreResult<()> {
        self.state.write().await.replace_item(item)
    }

    async fn commit_conversion(&self, commit: ConversionCommit) -> StoreResult<Lead> {
        let mut state = self.state.write().await;
        let lead_id = commit.lead.id;
        let slot = state
            .leads
            .iter_mut()
            .find(|l| l.id == lead_id && l.org_id == commit.lead.org_id)
            .ok_or(PipelineError::LeadNotFound(lead_id))?;
        if slot.is_converted() {
            return Err(PipelineError::AlreadyConverted {
                lead_id,
                deal_id: slot.converted_to_deal_id,
            });
        }
        slot.converted_to_deal_id = commit.lead.converted_to_deal_id;
        slot.status = commit.lead.status;
        slot.closed_at = commit.lead.closed_at;
        slot.updated_at = commit.lead.updated_at;
        let stored = slot.clone();
        state.deals.push(commit.deal);
        state.activities.push(commit.activity);
        Ok(stored)
    }

    async fn reorder_in_stage(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
        ordered_ids: Vec<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for (index, id) in ordered_ids.iter().enumerate() {
            let item: Option<&mut dyn Stageable> = match kind {
                ItemKind::Lead => state
                    .leads
                    .iter_mut()
                    .find(|l| l.id == *id && l.org_id == org_id && l.stage_id == Some(stage_id))
                    .map(|l| l as &mut dyn Stageable),
                ItemKind::Deal => state
                    .deals
                    .iter_mut()
                    .find(|d| d.id == *id && d.org_id == org_id && d.stage_id == Some(stage_id))
                    .map(|d| d as &mut dyn Stageable),
            };
            if let Some(item) = item {
                item.place(stage_id, index as i32, None);
                item.touch(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn history_for_item(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        item_id: Uuid,
    ) -> StoreResult<Vec<StageHistoryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<StageHistoryEntry> = state
            .history
            .iter()
            .filter(|h| h.org_id == org_id && h.item_kind == kind && h.item_id == item_id)
            .cloned()
            .collect();
        entries.sort_by_key(|h| h.entered_at);
        Ok(entries)
    }

    async fn item_facts(&self, org_id: Uuid) -> StoreResult<Vec<ItemFact>> {
        let state = self.state.read().await;
        let leads = state
            .leads
            .iter()
            .filter(|l| l.org_id == org_id)
            .map(ItemFact::from_lead);
        let deals = state
            .deals
            .iter()
            .filter(|d| d.org_id == org_id)
            .map(ItemFact::from_deal);
        Ok(leads.chain(deals).collect())
    }

    async fn closed_durations(
        &self,
        org_id: Uuid,
        kind: ItemKind,
    ) -> StoreResult<Vec<(Uuid, i64)>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.org_id == org_id && h.item_kind == kind)
            .filter_map(|h| h.duration_minutes.map(|d| (h.stage_id, d)))
            .collect())
    }

    async fn recent_activities(&self, org_id: Uuid, limit: i64) -> StoreResult<Vec<Activity>> {
        let state = self.state.read().await;
        let mut activities: Vec<Activity> = state
            .activities
            .iter()
            .filter(|a| a.org_id == org_id)
            .cloned()
            .collect();
        activities.reverse();
        activities.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        activities.truncate(limit.max(0) as usize);
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::TestPipeline;
    use crate::pipeline::types::{ActivityType, ConvertRequest};
    use chrono::Duration;

    fn move_activity(org_id: Uuid, lead_id: Uuid) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            org_id,
            activity_type: ActivityType::StageChanged,
            title: "Lead moved".to_string(),
            description: None,
            lead_id: Some(lead_id),
            deal_id: None,
            stage_id: None,
            actor_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_stale_lead_write_after_conversion_is_rejected() {
        let t = TestPipeline::new();
        let new = t.stage("New").await.unwrap();
        let lead = t.insert_lead("Acme", 1000.0, Some(&new)).await.unwrap();
        let stale = t.store.get_lead(t.org_id, lead.id).await.unwrap().unwrap();

        let converted = t
            .engine
            .converter()
            .convert(t.org_id, None, lead.id, ConvertRequest::default())
            .await
            .unwrap();

        let mut moved = stale.clone();
        moved.status = LeadStatus::Contacted;
        let err = t
            .store
            .commit_move(MoveCommit {
                item: PipelineItem::Lead(moved),
                history: None,
                activity: move_activity(t.org_id, lead.id),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AlreadyConverted { deal_id: Some(id), .. } if id == converted.deal.id
        ));

        let err = t
            .store
            .commit_value_change(PipelineItem::Lead(stale))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyConverted { .. }));

        let stored = t.store.get_lead(t.org_id, lead.id).await.unwrap().unwrap();
        assert_eq!(stored.converted_to_deal_id, Some(converted.deal.id));
        assert_eq!(stored.status, LeadStatus::Won);
        let activities = t.store.recent_activities(t.org_id, 10).await.unwrap();
        assert_eq!(activities.len(), 1);
    }

    #[tokio::test]
    async fn test_conversion_keeps_stage_of_a_move_in_between() {
        let t = TestPipeline::new();
        let (new, qualified) = (
            t.stage("New").await.unwrap(),
            t.stage("Qualified").await.unwrap(),
        );
        let lead = t.insert_lead("Acme", 1000.0, None).await.unwrap();
        let mover = t.engine.mover();
        mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, new.id, None)
            .await
            .unwrap();
        let stale = t.store.get_lead(t.org_id, lead.id).await.unwrap().unwrap();
        t.advance(Duration::minutes(5));
        mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, qualified.id, None)
            .await
            .unwrap();

        let deal = Deal::new(t.org_id, "Acme", 1000.0, t.clock_now());
        let mut converted = stale;
        converted.converted_to_deal_id = Some(deal.id);
        converted.status = LeadStatus::Won;
        converted.closed_at = Some(t.clock_now());
        let stored = t
            .store
            .commit_conversion(ConversionCommit {
                deal: deal.clone(),
                lead: converted,
                activity: move_activity(t.org_id, lead.id),
            })
            .await
            .unwrap();

        assert_eq!(stored.stage_id, Some(qualified.id));
        assert_eq!(stored.converted_to_deal_id, Some(deal.id));
        assert_eq!(stored.status, LeadStatus::Won);
        let open: Vec<Uuid> = t
            .store
            .all_history()
            .await
            .into_iter()
            .filter(|h| h.is_open())
            .map(|h| h.stage_id)
            .collect();
        assert_eq!(open, [qualified.id]);
    }

    #[tokio::test]
    async fn test_deleting_stage_keeps_its_history() {
        let t = TestPipeline::new();
        let new = t.stage("New").await.unwrap();
        let stage = t
            .engine
            .stages()
            .create(
                t.org_id,
                crate::pipeline::types::CreateStageRequest {
                    name: "Discovery".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let lead = t.insert_lead("Acme", 1.0, None).await.unwrap();
        let mover = t.engine.mover();
        mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, stage.id, None)
            .await
            .unwrap();
        t.advance(Duration::minutes(1));
        mover
            .move_to_stage(t.org_id, None, ItemKind::Lead, lead.id, new.id, None)
            .await
            .unwrap();

        t.engine.stages().delete(t.org_id, stage.id).await.unwrap();
        let history = t
            .store
            .history_for_item(t.org_id, ItemKind::Lead, lead.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage_id, stage.id);
    }

    fn stage(org_id: Uuid, name: &str, order: i32) -> Stage {
        let now = Utc::now();
        Stage {
            id: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            color: None,
            order,
            probability: 50,
            is_closed: false,
            is_won: false,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let store = InMemoryPipelineStore::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let s = stage(org_a, "New", 0);
        store.insert_stage(s.clone()).await.unwrap();

        assert!(store.get_stage(org_a, s.id).await.unwrap().is_some());
        assert!(store.get_stage(org_b, s.id).await.unwrap().is_none());
        assert!(store.list_stages(org_b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_flag_is_exclusive() {
        let store = InMemoryPipelineStore::new();
        let org = Uuid::new_v4();
        let mut first = stage(org, "New", 0);
        first.is_default = true;
        let mut second = stage(org, "Inbox", 1);
        second.is_default = true;
        store.insert_stage(first.clone()).await.unwrap();
        store.insert_stage(second.clone()).await.unwrap();

        let stages = store.list_stages(org).await.unwrap();
        let defaults: Vec<&Stage> = stages.iter().filter(|s| s.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);
    }

    #[tokio::test]
    async fn test_closed_cards_newest_first_and_capped() {
        let store = InMemoryPipelineStore::new();
        let org = Uuid::new_v4();
        let t0 = Utc::now();
        for i in 0..5 {
            let mut lead = Lead::new(org, format!("Lead {i}"), 10.0, t0);
            lead.status = LeadStatus::Won;
            lead.closed_at = Some(t0 + Duration::minutes(i));
            store.insert_lead(lead).await.unwrap();
        }

        let cards = store
            .load_closed_cards(org, ItemKind::Lead, StageOutcome::Won, 3)
            .await
            .unwrap();
        assert_eq!(cards.len(), 3);
        assert_eq!(cards[0].title, "Lead 4");
        assert_eq!(cards[2].title, "Lead 2");
    }
}
