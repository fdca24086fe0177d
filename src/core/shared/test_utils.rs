use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::config::AppConfig;
use crate::core::shared::state::AppState;
use crate::pipeline::clock::{Clock, ManualClock};
use crate::pipeline::error::PipelineError;
use crate::pipeline::forecast::forecast_for_stage;
use crate::pipeline::storage::{InMemoryPipelineStore, PipelineStore};
use crate::pipeline::types::{Deal, ItemKind, Lead, PipelineSettings, Stage, Stageable};
use crate::pipeline::PipelineEngine;

/// Fixed start instant so dwell times in tests are exact.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// In-memory engine on a manual clock, with one tenant and one acting user.
pub struct TestPipeline {
    pub engine: PipelineEngine,
    pub store: Arc<InMemoryPipelineStore>,
    pub clock: Arc<ManualClock>,
    pub org_id: Uuid,
    pub user_id: Uuid,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let store = Arc::new(InMemoryPipelineStore::new());
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let engine = PipelineEngine::new(store.clone(), clock.clone(), settings);
        Self {
            engine,
            store,
            clock,
            org_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Default stages of the tenant, seeding them on first use.
    pub async fn stages(&self) -> Result<Vec<Stage>, PipelineError> {
        self.engine.stages().ensure_default_stages(self.org_id).await
    }

    pub async fn stage(&self, name: &str) -> Result<Stage, PipelineError> {
        self.stages()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PipelineError::Validation(format!("no stage named {name}")))
    }

    /// Inserts a lead, optionally already sitting at the end of `stage`.
    pub async fn insert_lead(
        &self,
        title: &str,
        value: f64,
        stage: Option<&Stage>,
    ) -> Result<Lead, PipelineError> {
        let mut lead = Lead::new(self.org_id, title, value, self.clock_now());
        if let Some(stage) = stage {
            self.place(&mut lead, ItemKind::Lead, stage).await?;
        }
        self.store.insert_lead(lead.clone()).await?;
        Ok(lead)
    }

    pub async fn insert_deal(
        &self,
        title: &str,
        value: f64,
        stage: Option<&Stage>,
    ) -> Result<Deal, PipelineError> {
        let mut deal = Deal::new(self.org_id, title, value, self.clock_now());
        if let Some(stage) = stage {
            self.place(&mut deal, ItemKind::Deal, stage).await?;
        }
        self.store.insert_deal(deal.clone()).await?;
        Ok(deal)
    }

    async fn place(
        &self,
        item: &mut dyn Stageable,
        kind: ItemKind,
        stage: &Stage,
    ) -> Result<(), PipelineError> {
        let order = self
            .store
            .next_stage_order(self.org_id, kind, stage.id)
            .await?;
        item.place(stage.id, order, Some(self.clock_now()));
        item.apply_forecast(forecast_for_stage(item.value(), stage));
        item.apply_outcome(stage.outcome(), self.clock_now());
        Ok(())
    }

    /// App state over this pipeline, for driving the router.
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(AppConfig::default(), None, self.engine.clone()))
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
