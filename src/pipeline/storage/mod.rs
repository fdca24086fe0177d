pub mod memory;
pub mod postgres;

pub use memory::InMemoryPipelineStore;
pub use postgres::PgPipelineStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::error::PipelineError;
use super::history::HistoryTransition;
use super::types::{
    Activity, BoardCard, Deal, ItemFact, ItemKind, Lead, PipelineItem, Stage, StageCounts,
    StageHistoryEntry, StageOutcome,
};

pub type StoreResult<T> = Result<T, PipelineError>;

/// Item update, ledger changes and activity row of one move. Committed atomically,
/// and rejected with `AlreadyConverted` when the lead was converted after it was read.
#[derive(Debug, Clone)]
pub struct MoveCommit {
    pub item: PipelineItem,
    pub history: Option<HistoryTransition>,
    pub activity: Activity,
}

/// New deal, the converted source lead and the linking activity. Committed atomically,
/// and only if the lead has not been converted in the meantime. Only the conversion
/// fields of `lead` are written; its stage placement is left as stored.
#[derive(Debug, Clone)]
pub struct ConversionCommit {
    pub deal: Deal,
    pub lead: Lead,
    pub activity: Activity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageDeletion {
    Deleted,
    NotFound,
    HasDependents { name: String, leads: i64, deals: i64 },
}

/// Persistence seam of the pipeline engine. Every read is scoped by tenant; a row that
/// belongs to another tenant is reported as absent.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    /// Stages ordered by `order`, then creation time.
    async fn list_stages(&self, org_id: Uuid) -> StoreResult<Vec<Stage>>;
    async fn get_stage(&self, org_id: Uuid, stage_id: Uuid) -> StoreResult<Option<Stage>>;
    /// Inserts the seed set only if the tenant has no stage at all. Returns whether it
    /// inserted. Serialized per tenant so concurrent first loads seed once.
    async fn insert_default_stages_if_empty(
        &self,
        org_id: Uuid,
        stages: Vec<Stage>,
    ) -> StoreResult<bool>;
    /// A stage saved with `is_default` clears the flag on the tenant's other stages.
    async fn insert_stage(&self, stage: Stage) -> StoreResult<()>;
    async fn update_stage(&self, stage: Stage) -> StoreResult<()>;
    async fn delete_stage_if_unused(&self, org_id: Uuid, stage_id: Uuid)
        -> StoreResult<StageDeletion>;
    /// Sets each listed stage's order to its index, in one transaction.
    async fn reorder_stages(
        &self,
        org_id: Uuid,
        ordered_ids: Vec<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn stage_item_counts(&self, org_id: Uuid) -> StoreResult<HashMap<Uuid, StageCounts>>;

    async fn insert_lead(&self, lead: Lead) -> StoreResult<()>;
    async fn insert_deal(&self, deal: Deal) -> StoreResult<()>;
    async fn get_lead(&self, org_id: Uuid, lead_id: Uuid) -> StoreResult<Option<Lead>>;
    async fn get_deal(&self, org_id: Uuid, deal_id: Uuid) -> StoreResult<Option<Deal>>;
    /// `max(stage_order) + 1` among the stage's items of that kind, `0` when empty.
    async fn next_stage_order(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
    ) -> StoreResult<i32>;

    /// Places every open, unstaged lead of the tenant at the end of `stage`, stamping
    /// `stage_entered_at` and the stage forecast. Returns the number of leads moved.
    async fn assign_unstaged_leads(
        &self,
        org_id: Uuid,
        stage: &Stage,
        at: DateTime<Utc>,
    ) -> StoreResult<usize>;
    /// Staged items still in play: leads not WON/LOST, deals of any status. Ordered by
    /// `stage_order`.
    async fn load_open_cards(&self, org_id: Uuid, kind: ItemKind) -> StoreResult<Vec<BoardCard>>;
    /// Most recently closed items with the given outcome, newest first.
    async fn load_closed_cards(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        outcome: StageOutcome,
        limit: i64,
    ) -> StoreResult<Vec<BoardCard>>;

    async fn commit_move(&self, commit: MoveCommit) -> StoreResult<()>;
    async fn commit_value_change(&self, item: PipelineItem) -> StoreResult<()>;
    /// Returns the lead as stored after the conversion.
    async fn commit_conversion(&self, commit: ConversionCommit) -> StoreResult<Lead>;
    /// Sets `stage_order` to the index for each listed item currently in the stage.
    /// Ids outside the stage are skipped. Returns the number of rows updated.
    async fn reorder_in_stage(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
        ordered_ids: Vec<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    async fn history_for_item(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        item_id: Uuid,
    ) -> StoreResult<Vec<StageHistoryEntry>>;
    async fn item_facts(&self, org_id: Uuid) -> StoreResult<Vec<ItemFact>>;
    /// `(stage_id, duration)` of closed ledger rows for the kind.
    async fn closed_durations(&self, org_id: Uuid, kind: ItemKind)
        -> StoreResult<Vec<(Uuid, i64)>>;
    async fn recent_activities(&self, org_id: Uuid, limit: i64) -> StoreResult<Vec<Activity>>;
}
