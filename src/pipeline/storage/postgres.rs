use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::dsl::{count_star, max};
use diesel::prelude::*;
use diesel::sql_types::Text;
use std::collections::HashMap;
use uuid::Uuid;

use super::{ConversionCommit, MoveCommit, PipelineStore, StageDeletion, StoreResult};
use crate::core::shared::schema::{
    crm_activities, crm_customers, crm_deals, crm_leads, crm_pipeline_stages, crm_stage_history,
    crm_users,
};
use crate::core::shared::utils::DbPool;
use crate::pipeline::error::PipelineError;
use crate::pipeline::forecast::forecast_for_stage;
use crate::pipeline::history::close_open_rows;
use crate::pipeline::types::{
    Activity, ActivityType, BoardCard, Deal, DealStatus, ItemFact, ItemKind, Lead, LeadStatus,
    PipelineItem, Stage, StageCounts, StageHistoryEntry, StageOutcome, Stageable,
};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_pipeline_stages)]
#[diesel(treat_none_as_null = true)]
pub struct DbStage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub stage_order: i32,
    pub probability: i32,
    pub is_closed: bool,
    pub is_won: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_leads)]
#[diesel(treat_none_as_null = true)]
pub struct DbLead {
    pub id: Uuid,
    pub org_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub value: f64,
    pub probability: i32,
    pub expected_revenue: f64,
    pub stage_id: Option<Uuid>,
    pub stage_order: i32,
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub expected_close_date: Option<NaiveDate>,
    pub closed_at: Option<DateTime<Utc>>,
    pub lost_reason: Option<String>,
    pub converted_to_deal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_deals)]
#[diesel(treat_none_as_null = true)]
pub struct DbDeal {
    pub id: Uuid,
    pub org_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub value: f64,
    pub probability: i32,
    pub expected_revenue: f64,
    pub stage_id: Option<Uuid>,
    pub stage_order: i32,
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub expected_close_date: Option<NaiveDate>,
    pub actual_close_date: Option<DateTime<Utc>>,
    pub won_at: Option<DateTime<Utc>>,
    pub lost_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crm_stage_history)]
pub struct DbStageHistory {
    pub id: Uuid,
    pub org_id: Uuid,
    pub item_kind: String,
    pub item_id: Uuid,
    pub stage_id: Uuid,
    pub moved_by: Option<Uuid>,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crm_activities)]
pub struct DbActivity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub activity_type: String,
    pub title: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub fn db_stage_to_stage(db: DbStage) -> Stage {
    Stage {
        id: db.id,
        org_id: db.org_id,
        name: db.name,
        color: db.color,
        order: db.stage_order,
        probability: db.probability,
        is_closed: db.is_closed,
        is_won: db.is_won,
        is_default: db.is_default,
        created_at: db.created_at,
        updated_at: db.updated_at,
    }
}

pub fn stage_to_db(stage: Stage) -> DbStage {
    DbStage {
        id: stage.id,
        org_id: stage.org_id,
        name: stage.name,
        color: stage.color,
        stage_order: stage.order,
        probability: stage.probability,
        is_closed: stage.is_closed,
        is_won: stage.is_won,
        is_default: stage.is_default,
        created_at: stage.created_at,
        updated_at: stage.updated_at,
    }
}

pub fn db_lead_to_lead(db: DbLead) -> Lead {
    Lead {
        id: db.id,
        org_id: db.org_id,
        customer_id: db.customer_id,
        assignee_id: db.assignee_id,
        title: db.title,
        description: db.description,
        status: db.status.parse().unwrap_or(LeadStatus::New),
        value: db.value,
        probability: db.probability,
        expected_revenue: db.expected_revenue,
        stage_id: db.stage_id,
        stage_order: db.stage_order,
        stage_entered_at: db.stage_entered_at,
        expected_close_date: db.expected_close_date,
        closed_at: db.closed_at,
        lost_reason: db.lost_reason,
        converted_to_deal_id: db.converted_to_deal_id,
        created_at: db.created_at,
        updated_at: db.updated_at,
    }
}

pub fn lead_to_db(lead: Lead) -> DbLead {
    DbLead {
        id: lead.id,
        org_id: lead.org_id,
        customer_id: lead.customer_id,
        assignee_id: lead.assignee_id,
        title: lead.title,
        description: lead.description,
        status: lead.status.as_str().to_string(),
        value: lead.value,
        probability: lead.probability,
        expected_revenue: lead.expected_revenue,
        stage_id: lead.stage_id,
        stage_order: lead.stage_order,
        stage_entered_at: lead.stage_entered_at,
        expected_close_date: lead.expected_close_date,
        closed_at: lead.closed_at,
        lost_reason: lead.lost_reason,
        converted_to_deal_id: lead.converted_to_deal_id,
        created_at: lead.created_at,
        updated_at: lead.updated_at,
    }
}

pub fn db_deal_to_deal(db: DbDeal) -> Deal {
    Deal {
        id: db.id,
        org_id: db.org_id,
        customer_id: db.customer_id,
        owner_id: db.owner_id,
        lead_id: db.lead_id,
        title: db.title,
        description: db.description,
        status: db.status.parse().unwrap_or(DealStatus::Active),
        value: db.value,
        probability: db.probability,
        expected_revenue: db.expected_revenue,
        stage_id: db.stage_id,
        stage_order: db.stage_order,
        stage_entered_at: db.stage_entered_at,
        expected_close_date: db.expected_close_date,
        actual_close_date: db.actual_close_date,
        won_at: db.won_at,
        lost_at: db.lost_at,
        created_at: db.created_at,
        updated_at: db.updated_at,
    }
}

pub fn deal_to_db(deal: Deal) -> DbDeal {
    DbDeal {
        id: deal.id,
        org_id: deal.org_id,
        customer_id: deal.customer_id,
        owner_id: deal.owner_id,
        lead_id: deal.lead_id,
        title: deal.title,
        description: deal.description,
        status: deal.status.as_str().to_string(),
        value: deal.value,
        probability: deal.probability,
        expected_revenue: deal.expected_revenue,
        stage_id: deal.stage_id,
        stage_order: deal.stage_order,
        stage_entered_at: deal.stage_entered_at,
        expected_close_date: deal.expected_close_date,
        actual_close_date: deal.actual_close_date,
        won_at: deal.won_at,
        lost_at: deal.lost_at,
        created_at: deal.created_at,
        updated_at: deal.updated_at,
    }
}

pub fn db_history_to_entry(db: DbStageHistory) -> StageHistoryEntry {
    StageHistoryEntry {
        id: db.id,
        org_id: db.org_id,
        item_kind: db.item_kind.parse().unwrap_or(ItemKind::Lead),
        item_id: db.item_id,
        stage_id: db.stage_id,
        moved_by: db.moved_by,
        entered_at: db.entered_at,
        exited_at: db.exited_at,
        duration_minutes: db.duration,
    }
}

pub fn entry_to_db(entry: StageHistoryEntry) -> DbStageHistory {
    DbStageHistory {
        id: entry.id,
        org_id: entry.org_id,
        item_kind: entry.item_kind.as_str().to_string(),
        item_id: entry.item_id,
        stage_id: entry.stage_id,
        moved_by: entry.moved_by,
        entered_at: entry.entered_at,
        exited_at: entry.exited_at,
        duration: entry.duration_minutes,
    }
}

pub fn db_activity_to_activity(db: DbActivity) -> Activity {
    Activity {
        id: db.id,
        org_id: db.org_id,
        activity_type: db.activity_type.parse().unwrap_or(ActivityType::StageChanged),
        title: db.title,
        description: db.description,
        lead_id: db.lead_id,
        deal_id: db.deal_id,
        stage_id: db.stage_id,
        actor_id: db.actor_id,
        created_at: db.created_at,
    }
}

pub fn activity_to_db(activity: Activity) -> DbActivity {
    DbActivity {
        id: activity.id,
        org_id: activity.org_id,
        activity_type: activity.activity_type.as_str().to_string(),
        title: activity.title,
        description: activity.description,
        lead_id: activity.lead_id,
        deal_id: activity.deal_id,
        stage_id: activity.stage_id,
        actor_id: activity.actor_id,
        created_at: activity.created_at,
    }
}

const CLOSED_STATUSES: [&str; 2] = ["WON", "LOST"];

fn closed_status(outcome: StageOutcome) -> Option<&'static str> {
    match outcome {
        StageOutcome::Won => Some("WON"),
        StageOutcome::Lost => Some("LOST"),
        StageOutcome::Open => None,
    }
}

fn update_item(conn: &mut PgConnection, item: PipelineItem) -> StoreResult<()> {
    let (kind, id, updated) = match item {
        PipelineItem::Lead(lead) => {
            let (id, org_id) = (lead.id, lead.org_id);
            let updated = diesel::update(
                crm_leads::table
                    .filter(crm_leads::id.eq(id))
                    .filter(crm_leads::org_id.eq(org_id))
                    .filter(crm_leads::converted_to_deal_id.is_null()),
            )
            .set(&lead_to_db(lead))
            .execute(conn)?;
            if updated == 0 {
                return Err(lead_write_rejection(conn, org_id, id)?);
            }
            (ItemKind::Lead, id, updated)
        }
        PipelineItem::Deal(deal) => {
            let (id, org_id) = (deal.id, deal.org_id);
            let updated = diesel::update(
                crm_deals::table
                    .filter(crm_deals::id.eq(id))
                    .filter(crm_deals::org_id.eq(org_id)),
            )
            .set(&deal_to_db(deal))
            .execute(conn)?;
            (ItemKind::Deal, id, updated)
        }
    };
    if updated == 0 {
        return Err(PipelineError::ItemNotFound { kind, id });
    }
    Ok(())
}

/// Why a guarded lead write touched no row: converted since it was read, or gone.
fn lead_write_rejection(
    conn: &mut PgConnection,
    org_id: Uuid,
    lead_id: Uuid,
) -> QueryResult<PipelineError> {
    let existing: Option<Option<Uuid>> = crm_leads::table
        .filter(crm_leads::id.eq(lead_id))
        .filter(crm_leads::org_id.eq(org_id))
        .select(crm_leads::converted_to_deal_id)
        .first(conn)
        .optional()?;
    Ok(match existing {
        Some(deal_id) => PipelineError::AlreadyConverted { lead_id, deal_id },
        None => PipelineError::ItemNotFound {
            kind: ItemKind::Lead,
            id: lead_id,
        },
    })
}

fn clear_other_defaults(conn: &mut PgConnection, stage: &DbStage) -> QueryResult<usize> {
    if !stage.is_default {
        return Ok(0);
    }
    diesel::update(
        crm_pipeline_stages::table
            .filter(crm_pipeline_stages::org_id.eq(stage.org_id))
            .filter(crm_pipeline_stages::id.ne(stage.id))
            .filter(crm_pipeline_stages::is_default.eq(true)),
    )
    .set(crm_pipeline_stages::is_default.eq(false))
    .execute(conn)
}

fn next_order(
    conn: &mut PgConnection,
    org_id: Uuid,
    kind: ItemKind,
    stage_id: Uuid,
) -> QueryResult<i32> {
    let current: Option<i32> = match kind {
        ItemKind::Lead => crm_leads::table
            .filter(crm_leads::org_id.eq(org_id))
            .filter(crm_leads::stage_id.eq(stage_id))
            .select(max(crm_leads::stage_order))
            .first(conn)?,
        ItemKind::Deal => crm_deals::table
            .filter(crm_deals::org_id.eq(org_id))
            .filter(crm_deals::stage_id.eq(stage_id))
            .select(max(crm_deals::stage_order))
            .first(conn)?,
    };
    Ok(current.map_or(0, |m| m + 1))
}

fn lead_cards(
    conn: &mut PgConnection,
    org_id: Uuid,
    status: Option<&str>,
    limit: Option<i64>,
) -> QueryResult<Vec<BoardCard>> {
    let mut query = crm_leads::table
        .left_join(crm_customers::table.on(crm_customers::id.nullable().eq(crm_leads::customer_id)))
        .left_join(crm_users::table.on(crm_users::id.nullable().eq(crm_leads::assignee_id)))
        .filter(crm_leads::org_id.eq(org_id))
        .select((
            DbLead::as_select(),
            crm_customers::name.nullable(),
            crm_users::display_name.nullable(),
        ))
        .into_boxed();

    query = match status {
        Some(status) => query
            .filter(crm_leads::status.eq(status.to_string()))
            .filter(crm_leads::closed_at.is_not_null())
            .order(crm_leads::closed_at.desc()),
        None => query
            .filter(crm_leads::stage_id.is_not_null())
            .filter(crm_leads::status.ne_all(CLOSED_STATUSES))
            .order((crm_leads::stage_order.asc(), crm_leads::created_at.asc())),
    };
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let rows: Vec<(DbLead, Option<String>, Option<String>)> = query.load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(db, customer, assignee)| {
            BoardCard::from_lead(&db_lead_to_lead(db), customer, assignee)
        })
        .collect())
}

fn deal_cards(
    conn: &mut PgConnection,
    org_id: Uuid,
    status: Option<&str>,
    limit: Option<i64>,
) -> QueryResult<Vec<BoardCard>> {
    let mut query = crm_deals::table
        .left_join(crm_customers::table.on(crm_customers::id.nullable().eq(crm_deals::customer_id)))
        .left_join(crm_users::table.on(crm_users::id.nullable().eq(crm_deals::owner_id)))
        .filter(crm_deals::org_id.eq(org_id))
        .select((
            DbDeal::as_select(),
            crm_customers::name.nullable(),
            crm_users::display_name.nullable(),
        ))
        .into_boxed();

    query = match status {
        Some(status) => query
            .filter(crm_deals::status.eq(status.to_string()))
            .filter(crm_deals::actual_close_date.is_not_null())
            .order(crm_deals::actual_close_date.desc()),
        None => query
            .filter(crm_deals::stage_id.is_not_null())
            .order((crm_deals::stage_order.asc(), crm_deals::created_at.asc())),
    };
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let rows: Vec<(DbDeal, Option<String>, Option<String>)> = query.load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(db, customer, owner)| BoardCard::from_deal(&db_deal_to_deal(db), customer, owner))
        .collect())
}

/// Postgres-backed store. Every call runs on the blocking pool with its own pooled
/// connection; multi-row writes run inside one transaction.
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: DbPool,
}

impl PgPipelineStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn ping(&self) -> StoreResult<()> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_stages(&self, org_id: Uuid) -> StoreResult<Vec<Stage>> {
        self.run(move |conn| {
            let rows: Vec<DbStage> = crm_pipeline_stages::table
                .filter(crm_pipeline_stages::org_id.eq(org_id))
                .order((
                    crm_pipeline_stages::stage_order.asc(),
                    crm_pipeline_stages::created_at.asc(),
                ))
                .select(DbStage::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(db_stage_to_stage).collect())
        })
        .await
    }

    async fn get_stage(&self, org_id: Uuid, stage_id: Uuid) -> StoreResult<Option<Stage>> {
        self.run(move |conn| {
            let row: Option<DbStage> = crm_pipeline_stages::table
                .filter(crm_pipeline_stages::id.eq(stage_id))
                .filter(crm_pipeline_stages::org_id.eq(org_id))
                .select(DbStage::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(db_stage_to_stage))
        })
        .await
    }

    async fn insert_default_stages_if_empty(
        &self,
        org_id: Uuid,
        stages: Vec<Stage>,
    ) -> StoreResult<bool> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind::<Text, _>(org_id.to_string())
                    .execute(conn)?;

                let existing: i64 = crm_pipeline_stages::table
                    .filter(crm_pipeline_stages::org_id.eq(org_id))
                    .count()
                    .get_result(conn)?;
                if existing > 0 {
                    return Ok(false);
                }

                let rows: Vec<DbStage> = stages.into_iter().map(stage_to_db).collect();
                diesel::insert_into(crm_pipeline_stages::table)
                    .values(&rows)
                    .execute(conn)?;
                Ok(true)
            })
        })
        .await
    }

    async fn insert_stage(&self, stage: Stage) -> StoreResult<()> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let row = stage_to_db(stage);
                clear_other_defaults(conn, &row)?;
                diesel::insert_into(crm_pipeline_stages::table)
                    .values(&row)
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn update_stage(&self, stage: Stage) -> StoreResult<()> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let row = stage_to_db(stage);
                clear_other_defaults(conn, &row)?;
                let updated = diesel::update(
                    crm_pipeline_stages::table
                        .filter(crm_pipeline_stages::id.eq(row.id))
                        .filter(crm_pipeline_stages::org_id.eq(row.org_id)),
                )
                .set(&row)
                .execute(conn)?;
                if updated == 0 {
                    return Err(PipelineError::StageNotFound(row.id));
                }
                Ok(())
            })
        })
        .await
    }

    async fn delete_stage_if_unused(
        &self,
        org_id: Uuid,
        stage_id: Uuid,
    ) -> StoreResult<StageDeletion> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let name: Option<String> = crm_pipeline_stages::table
                    .filter(crm_pipeline_stages::id.eq(stage_id))
                    .filter(crm_pipeline_stages::org_id.eq(org_id))
                    .select(crm_pipeline_stages::name)
                    .for_update()
                    .first(conn)
                    .optional()?;
                let Some(name) = name else {
                    return Ok(StageDeletion::NotFound);
                };

                let leads: i64 = crm_leads::table
                    .filter(crm_leads::stage_id.eq(stage_id))
                    .count()
                    .get_result(conn)?;
                let deals: i64 = crm_deals::table
                    .filter(crm_deals::stage_id.eq(stage_id))
                    .count()
                    .get_result(conn)?;
                if leads > 0 || deals > 0 {
                    return Ok(StageDeletion::HasDependents { name, leads, deals });
                }

                diesel::delete(
                    crm_pipeline_stages::table
                        .filter(crm_pipeline_stages::id.eq(stage_id))
                        .filter(crm_pipeline_stages::org_id.eq(org_id)),
                )
                .execute(conn)?;
                Ok(StageDeletion::Deleted)
            })
        })
        .await
    }

    async fn reorder_stages(
        &self,
        org_id: Uuid,
        ordered_ids: Vec<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                for (index, id) in ordered_ids.into_iter().enumerate() {
                    diesel::update(
                        crm_pipeline_stages::table
                            .filter(crm_pipeline_stages::id.eq(id))
                            .filter(crm_pipeline_stages::org_id.eq(org_id)),
                    )
                    .set((
                        crm_pipeline_stages::stage_order.eq(index as i32),
                        crm_pipeline_stages::updated_at.eq(at),
                    ))
                    .execute(conn)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn stage_item_counts(&self, org_id: Uuid) -> StoreResult<HashMap<Uuid, StageCounts>> {
        self.run(move |conn| {
            let lead_rows: Vec<(Option<Uuid>, i64)> = crm_leads::table
                .filter(crm_leads::org_id.eq(org_id))
                .filter(crm_leads::stage_id.is_not_null())
                .group_by(crm_leads::stage_id)
                .select((crm_leads::stage_id, count_star()))
                .load(conn)?;
            let deal_rows: Vec<(Option<Uuid>, i64)> = crm_deals::table
                .filter(crm_deals::org_id.eq(org_id))
                .filter(crm_deals::stage_id.is_not_null())
                .group_by(crm_deals::stage_id)
                .select((crm_deals::stage_id, count_star()))
                .load(conn)?;

            let mut counts: HashMap<Uuid, StageCounts> = HashMap::new();
            for (stage_id, n) in lead_rows {
                if let Some(stage_id) = stage_id {
                    counts.entry(stage_id).or_default().lead_count = n;
                }
            }
            for (stage_id, n) in deal_rows {
                if let Some(stage_id) = stage_id {
                    counts.entry(stage_id).or_default().deal_count = n;
                }
            }
            Ok(counts)
        })
        .await
    }

    async fn insert_lead(&self, lead: Lead) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(crm_leads::table)
                .values(&lead_to_db(lead))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn insert_deal(&self, deal: Deal) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(crm_deals::table)
                .values(&deal_to_db(deal))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn get_lead(&self, org_id: Uuid, lead_id: Uuid) -> StoreResult<Option<Lead>> {
        self.run(move |conn| {
            let row: Option<DbLead> = crm_leads::table
                .filter(crm_leads::id.eq(lead_id))
                .filter(crm_leads::org_id.eq(org_id))
                .select(DbLead::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(db_lead_to_lead))
        })
        .await
    }

    async fn get_deal(&self, org_id: Uuid, deal_id: Uuid) -> StoreResult<Option<Deal>> {
        self.run(move |conn| {
            let row: Option<DbDeal> = crm_deals::table
                .filter(crm_deals::id.eq(deal_id))
                .filter(crm_deals::org_id.eq(org_id))
                .select(DbDeal::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(db_deal_to_deal))
        })
        .await
    }

    async fn next_stage_order(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
    ) -> StoreResult<i32> {
        self.run(move |conn| Ok(next_order(conn, org_id, kind, stage_id)?))
            .await
    }

    async fn assign_unstaged_leads(
        &self,
        org_id: Uuid,
        stage: &Stage,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let stage = stage.clone();
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let rows: Vec<DbLead> = crm_leads::table
                    .filter(crm_leads::org_id.eq(org_id))
                    .filter(crm_leads::stage_id.is_null())
                    .filter(crm_leads::converted_to_deal_id.is_null())
                    .filter(crm_leads::status.ne_all(CLOSED_STATUSES))
                    .order(crm_leads::created_at.asc())
                    .select(DbLead::as_select())
                    .for_update()
                    .load(conn)?;
                if rows.is_empty() {
                    return Ok(0);
                }

                let mut order = next_order(conn, org_id, ItemKind::Lead, stage.id)?;
                let assigned = rows.len();
                for row in rows {
                    let mut lead = db_lead_to_lead(row);
                    lead.place(stage.id, order, Some(at));
                    lead.apply_forecast(forecast_for_stage(lead.value, &stage));
                    lead.touch(at);
                    update_item(conn, PipelineItem::Lead(lead))?;
                    order += 1;
                }
                Ok(assigned)
            })
        })
        .await
    }

    async fn load_open_cards(&self, org_id: Uuid, kind: ItemKind) -> StoreResult<Vec<BoardCard>> {
        self.run(move |conn| {
            let cards = match kind {
                ItemKind::Lead => lead_cards(conn, org_id, None, None)?,
                ItemKind::Deal => deal_cards(conn, org_id, None, None)?,
            };
            Ok(cards)
        })
        .await
    }

    async fn load_closed_cards(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        outcome: StageOutcome,
        limit: i64,
    ) -> StoreResult<Vec<BoardCard>> {
        let Some(status) = closed_status(outcome) else {
            return Ok(Vec::new());
        };
        self.run(move |conn| {
            let cards = match kind {
                ItemKind::Lead => lead_cards(conn, org_id, Some(status), Some(limit.max(0)))?,
                ItemKind::Deal => deal_cards(conn, org_id, Some(status), Some(limit.max(0)))?,
            };
            Ok(cards)
        })
        .await
    }

    async fn commit_move(&self, commit: MoveCommit) -> StoreResult<()> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let org_id = commit.activity.org_id;
                update_item(conn, commit.item)?;

                if let Some(transition) = commit.history {
                    let rows: Vec<DbStageHistory> = crm_stage_history::table
                        .filter(crm_stage_history::org_id.eq(org_id))
                        .filter(crm_stage_history::item_kind.eq(transition.item_kind.as_str()))
                        .filter(crm_stage_history::item_id.eq(transition.item_id))
                        .filter(crm_stage_history::exited_at.is_null())
                        .select(DbStageHistory::as_select())
                        .for_update()
                        .load(conn)?;
                    let mut open: Vec<StageHistoryEntry> =
                        rows.into_iter().map(db_history_to_entry).collect();
                    close_open_rows(&mut open, &transition);

                    for row in &open {
                        diesel::update(crm_stage_history::table.find(row.id))
                            .set((
                                crm_stage_history::exited_at.eq(row.exited_at),
                                crm_stage_history::duration.eq(row.duration_minutes),
                            ))
                            .execute(conn)?;
                    }

                    diesel::insert_into(crm_stage_history::table)
                        .values(&entry_to_db(transition.opened))
                        .execute(conn)?;
                }

                diesel::insert_into(crm_activities::table)
                    .values(&activity_to_db(commit.activity))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn commit_value_change(&self, item: PipelineItem) -> StoreResult<()> {
        self.run(move |conn| update_item(conn, item)).await
    }

    async fn commit_conversion(&self, commit: ConversionCommit) -> StoreResult<Lead> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let lead = commit.lead;
                let (lead_id, org_id) = (lead.id, lead.org_id);

                diesel::insert_into(crm_deals::table)
                    .values(&deal_to_db(commit.deal))
                    .execute(conn)?;

                let stored: Option<DbLead> = diesel::update(
                    crm_leads::table
                        .filter(crm_leads::id.eq(lead_id))
                        .filter(crm_leads::org_id.eq(org_id))
                        .filter(crm_leads::converted_to_deal_id.is_null()),
                )
                .set((
                    crm_leads::converted_to_deal_id.eq(lead.converted_to_deal_id),
                    crm_leads::status.eq(lead.status.as_str()),
                    crm_leads::closed_at.eq(lead.closed_at),
                    crm_leads::updated_at.eq(lead.updated_at),
                ))
                .returning(DbLead::as_returning())
                .get_result(conn)
                .optional()?;

                let Some(stored) = stored else {
                    return Err(match lead_write_rejection(conn, org_id, lead_id)? {
                        PipelineError::ItemNotFound { .. } => PipelineError::LeadNotFound(lead_id),
                        other => other,
                    });
                };

                diesel::insert_into(crm_activities::table)
                    .values(&activity_to_db(commit.activity))
                    .execute(conn)?;
                Ok(db_lead_to_lead(stored))
            })
        })
        .await
    }

    async fn reorder_in_stage(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        stage_id: Uuid,
        ordered_ids: Vec<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.run(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                let mut updated = 0;
                for (index, id) in ordered_ids.into_iter().enumerate() {
                    updated += match kind {
                        ItemKind::Lead => diesel::update(
                            crm_leads::table
                                .filter(crm_leads::id.eq(id))
                                .filter(crm_leads::org_id.eq(org_id))
                                .filter(crm_leads::stage_id.eq(stage_id)),
                        )
                        .set((
                            crm_leads::stage_order.eq(index as i32),
                            crm_leads::updated_at.eq(at),
                        ))
                        .execute(conn)?,
                        ItemKind::Deal => diesel::update(
                            crm_deals::table
                                .filter(crm_deals::id.eq(id))
                                .filter(crm_deals::org_id.eq(org_id))
                                .filter(crm_deals::stage_id.eq(stage_id)),
                        )
                        .set((
                            crm_deals::stage_order.eq(index as i32),
                            crm_deals::updated_at.eq(at),
                        ))
                        .execute(conn)?,
                    };
                }
                Ok(updated)
            })
        })
        .await
    }

    async fn history_for_item(
        &self,
        org_id: Uuid,
        kind: ItemKind,
        item_id: Uuid,
    ) -> StoreResult<Vec<StageHistoryEntry>> {
        self.run(move |conn| {
            let rows: Vec<DbStageHistory> = crm_stage_history::table
                .filter(crm_stage_history::org_id.eq(org_id))
                .filter(crm_stage_history::item_kind.eq(kind.as_str()))
                .filter(crm_stage_history::item_id.eq(item_id))
                .order(crm_stage_history::entered_at.asc())
                .select(DbStageHistory::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(db_history_to_entry).collect())
        })
        .await
    }

    async fn item_facts(&self, org_id: Uuid) -> StoreResult<Vec<ItemFact>> {
        self.run(move |conn| {
            let leads: Vec<DbLead> = crm_leads::table
                .filter(crm_leads::org_id.eq(org_id))
                .select(DbLead::as_select())
                .load(conn)?;
            let deals: Vec<DbDeal> = crm_deals::table
                .filter(crm_deals::org_id.eq(org_id))
                .select(DbDeal::as_select())
                .load(conn)?;

            let facts = leads
                .into_iter()
                .map(|db| ItemFact::from_lead(&db_lead_to_lead(db)))
                .chain(
                    deals
                        .into_iter()
                        .map(|db| ItemFact::from_deal(&db_deal_to_deal(db))),
                )
                .collect();
            Ok(facts)
        })
        .await
    }

    async fn closed_durations(
        &self,
        org_id: Uuid,
        kind: ItemKind,
    ) -> StoreResult<Vec<(Uuid, i64)>> {
        self.run(move |conn| {
            let rows: Vec<(Uuid, Option<i64>)> = crm_stage_history::table
                .filter(crm_stage_history::org_id.eq(org_id))
                .filter(crm_stage_history::item_kind.eq(kind.as_str()))
                .filter(crm_stage_history::duration.is_not_null())
                .select((crm_stage_history::stage_id, crm_stage_history::duration))
                .load(conn)?;
            Ok(rows
                .into_iter()
                .filter_map(|(stage_id, duration)| duration.map(|d| (stage_id, d)))
                .collect())
        })
        .await
    }

    async fn recent_activities(&self, org_id: Uuid, limit: i64) -> StoreResult<Vec<Activity>> {
        self.run(move |conn| {
            let rows: Vec<DbActivity> = crm_activities::table
                .filter(crm_activities::org_id.eq(org_id))
                .order(crm_activities::created_at.desc())
                .limit(limit.max(0))
                .select(DbActivity::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(db_activity_to_activity).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_row_conversion_keeps_status() {
        let mut lead = Lead::new(Uuid::new_v4(), "Acme", 1000.0, Utc::now());
        lead.status = LeadStatus::Negotiation;
        lead.stage_order = 3;

        let row = lead_to_db(lead.clone());
        assert_eq!(row.status, "NEGOTIATION");
        assert_eq!(db_lead_to_lead(row), lead);
    }

    #[test]
    fn test_unknown_status_falls_back() {
        let mut row = deal_to_db(Deal::new(Uuid::new_v4(), "Acme", 1.0, Utc::now()));
        row.status = "ARCHIVED".to_string();
        assert_eq!(db_deal_to_deal(row).status, DealStatus::Active);
    }

    #[test]
    fn test_history_row_stores_kind_lowercase() {
        let entry = crate::pipeline::history::open_entry(
            Uuid::new_v4(),
            ItemKind::Deal,
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            Utc::now(),
        );
        let row = entry_to_db(entry.clone());
        assert_eq!(row.item_kind, "deal");
        assert_eq!(db_history_to_entry(row), entry);
    }

    #[test]
    fn test_closed_status_mapping() {
        assert_eq!(closed_status(StageOutcome::Won), Some("WON"));
        assert_eq!(closed_status(StageOutcome::Lost), Some("LOST"));
        assert_eq!(closed_status(StageOutcome::Open), None);
    }
}
