use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashSet;
use uuid::Uuid;

use super::engine::PipelineEngine;
use super::error::PipelineError;
use super::storage::StageDeletion;
use super::types::{CreateStageRequest, Stage, StageWithCounts, UpdateStageRequest};

const MAX_STAGE_NAME_LEN: usize = 100;

struct SeedStage {
    name: &'static str,
    color: &'static str,
    probability: i32,
    is_closed: bool,
    is_won: bool,
}

const SEED_STAGES: [SeedStage; 7] = [
    SeedStage { name: "New", color: "#94a3b8", probability: 10, is_closed: false, is_won: false },
    SeedStage { name: "Contacted", color: "#60a5fa", probability: 20, is_closed: false, is_won: false },
    SeedStage { name: "Qualified", color: "#818cf8", probability: 40, is_closed: false, is_won: false },
    SeedStage { name: "Proposal", color: "#f59e0b", probability: 60, is_closed: false, is_won: false },
    SeedStage { name: "Negotiation", color: "#fb923c", probability: 80, is_closed: false, is_won: false },
    SeedStage { name: "Won", color: "#22c55e", probability: 100, is_closed: true, is_won: true },
    SeedStage { name: "Lost", color: "#ef4444", probability: 0, is_closed: true, is_won: false },
];

/// The seven-stage set every tenant starts with. `New` is the default stage.
pub fn default_stage_set(org_id: Uuid, now: DateTime<Utc>) -> Vec<Stage> {
    SEED_STAGES
        .iter()
        .enumerate()
        .map(|(index, seed)| Stage {
            id: Uuid::new_v4(),
            org_id,
            name: seed.name.to_string(),
            color: Some(seed.color.to_string()),
            order: index as i32,
            probability: seed.probability,
            is_closed: seed.is_closed,
            is_won: seed.is_won,
            is_default: index == 0,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

/// Stage flagged default, or the first one by order. Expects `stages` sorted.
pub fn default_stage(stages: &[Stage]) -> Option<&Stage> {
    stages.iter().find(|s| s.is_default).or_else(|| stages.first())
}

/// First non-closed stage by order. Expects `stages` sorted.
pub fn first_open_stage(stages: &[Stage]) -> Option<&Stage> {
    stages.iter().find(|s| !s.is_closed)
}

fn validate_stage(stage: &Stage) -> Result<(), PipelineError> {
    if stage.name.is_empty() {
        return Err(PipelineError::Validation("Stage name is required".into()));
    }
    if stage.name.chars().count() > MAX_STAGE_NAME_LEN {
        return Err(PipelineError::Validation(format!(
            "Stage name must be at most {MAX_STAGE_NAME_LEN} characters"
        )));
    }
    if !(0..=100).contains(&stage.probability) {
        return Err(PipelineError::Validation(
            "Stage probability must be between 0 and 100".into(),
        ));
    }
    if stage.is_won && !stage.is_closed {
        return Err(PipelineError::Validation(
            "A won stage must also be closed".into(),
        ));
    }
    Ok(())
}

fn ensure_unique_name(stages: &[Stage], stage: &Stage) -> Result<(), PipelineError> {
    if stages.iter().any(|s| s.id != stage.id && s.name == stage.name) {
        return Err(PipelineError::Validation(format!(
            "A stage named \"{}\" already exists",
            stage.name
        )));
    }
    Ok(())
}

pub struct StageRegistry<'a> {
    engine: &'a PipelineEngine,
}

impl<'a> StageRegistry<'a> {
    pub fn new(engine: &'a PipelineEngine) -> Self {
        Self { engine }
    }

    /// Seeds the default stage set when the tenant has none. Safe to call on every read.
    pub async fn ensure_default_stages(&self, org_id: Uuid) -> Result<Vec<Stage>, PipelineError> {
        let store = self.engine.store();
        let stages = store.list_stages(org_id).await?;
        if !stages.is_empty() {
            return Ok(stages);
        }

        let seed = default_stage_set(org_id, self.engine.now());
        if store.insert_default_stages_if_empty(org_id, seed).await? {
            info!("Bootstrapped default pipeline stages for org {org_id}");
        } else {
            debug!("Default stages for org {org_id} were created concurrently");
        }
        store.list_stages(org_id).await
    }

    pub async fn get(&self, org_id: Uuid, stage_id: Uuid) -> Result<Stage, PipelineError> {
        self.engine
            .store()
            .get_stage(org_id, stage_id)
            .await?
            .ok_or(PipelineError::StageNotFound(stage_id))
    }

    pub async fn list_with_counts(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<StageWithCounts>, PipelineError> {
        let stages = self.ensure_default_stages(org_id).await?;
        let counts = self.engine.store().stage_item_counts(org_id).await?;
        Ok(stages
            .into_iter()
            .map(|stage| {
                let c = counts.get(&stage.id).cloned().unwrap_or_default();
                StageWithCounts {
                    stage,
                    lead_count: c.lead_count,
                    deal_count: c.deal_count,
                }
            })
            .collect())
    }

    pub async fn get_with_counts(
        &self,
        org_id: Uuid,
        stage_id: Uuid,
    ) -> Result<StageWithCounts, PipelineError> {
        let stage = self.get(org_id, stage_id).await?;
        let counts = self.engine.store().stage_item_counts(org_id).await?;
        let c = counts.get(&stage.id).cloned().unwrap_or_default();
        Ok(StageWithCounts {
            stage,
            lead_count: c.lead_count,
            deal_count: c.deal_count,
        })
    }

    pub async fn create(
        &self,
        org_id: Uuid,
        req: CreateStageRequest,
    ) -> Result<Stage, PipelineError> {
        let existing = self.engine.store().list_stages(org_id).await?;
        let now = self.engine.now();
        let next_order = existing.iter().map(|s| s.order).max().map_or(0, |m| m + 1);

        let stage = Stage {
            id: Uuid::new_v4(),
            org_id,
            name: req.name.trim().to_string(),
            color: req.color,
            order: req.order.unwrap_or(next_order),
            probability: req.probability.unwrap_or(0),
            is_closed: req.is_closed.unwrap_or(false),
            is_won: req.is_won.unwrap_or(false),
            is_default: req.is_default.unwrap_or(false),
            created_at: now,
            updated_at: now,
        };
        validate_stage(&stage)?;
        ensure_unique_name(&existing, &stage)?;

        self.engine.store().insert_stage(stage.clone()).await?;
        info!("Created stage \"{}\" ({}) for org {org_id}", stage.name, stage.id);
        Ok(stage)
    }

    pub async fn update(
        &self,
        org_id: Uuid,
        stage_id: Uuid,
        req: UpdateStageRequest,
    ) -> Result<Stage, PipelineError> {
        let existing = self.engine.store().list_stages(org_id).await?;
        let mut stage = existing
            .iter()
            .find(|s| s.id == stage_id)
            .cloned()
            .ok_or(PipelineError::StageNotFound(stage_id))?;

        if let Some(name) = req.name {
            stage.name = name.trim().to_string();
        }
        if let Some(color) = req.color {
            stage.color = Some(color);
        }
        if let Some(order) = req.order {
            stage.order = order;
        }
        if let Some(probability) = req.probability {
            stage.probability = probability;
        }
        if let Some(is_closed) = req.is_closed {
            stage.is_closed = is_closed;
        }
        if let Some(is_won) = req.is_won {
            stage.is_won = is_won;
        }
        if let Some(is_default) = req.is_default {
            stage.is_default = is_default;
        }
        stage.updated_at = self.engine.now();

        validate_stage(&stage)?;
        ensure_unique_name(&existing, &stage)?;

        self.engine.store().update_stage(stage.clone()).await?;
        Ok(stage)
    }

    pub async fn delete(&self, org_id: Uuid, stage_id: Uuid) -> Result<(), PipelineError> {
        match self
            .engine
            .store()
            .delete_stage_if_unused(org_id, stage_id)
            .await?
        {
            StageDeletion::Deleted => {
                info!("Deleted stage {stage_id} for org {org_id}");
                Ok(())
            }
            StageDeletion::NotFound => Err(PipelineError::StageNotFound(stage_id)),
            StageDeletion::HasDependents { name, leads, deals } => {
                Err(PipelineError::HasDependents { name, leads, deals })
            }
        }
    }

    /// Sets each stage's order to its position in `ordered_ids`. Every id must be one
    /// of the tenant's stages; stages left out keep their current order.
    pub async fn reorder(
        &self,
        org_id: Uuid,
        ordered_ids: Vec<Uuid>,
    ) -> Result<Vec<StageWithCounts>, PipelineError> {
        let stages = self.engine.store().list_stages(org_id).await?;
        let known: HashSet<Uuid> = stages.iter().map(|s| s.id).collect();

        let mut seen = HashSet::new();
        for id in &ordered_ids {
            if !known.contains(id) {
                return Err(PipelineError::StageNotFound(*id));
            }
            if !seen.insert(*id) {
                return Err(PipelineError::Validation(format!(
                    "Stage {id} is listed more than once"
                )));
            }
        }

        self.engine
            .store()
            .reorder_stages(org_id, ordered_ids, self.engine.now())
            .await?;
        self.list_with_counts(org_id).await
    }
}
