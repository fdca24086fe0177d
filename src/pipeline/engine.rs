use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::analytics::AnalyticsAggregator;
use super::board::BoardBuilder;
use super::clock::{Clock, SystemClock};
use super::converter::LeadConverter;
use super::history::StageHistoryRecorder;
use super::mover::PipelineMover;
use super::registry::StageRegistry;
use super::storage::PipelineStore;
use super::types::PipelineSettings;

/// Entry point of the stage engine. Cheap to clone; components borrow it per call.
#[derive(Clone)]
pub struct PipelineEngine {
    store: Arc<dyn PipelineStore>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn with_system_clock(store: Arc<dyn PipelineStore>, settings: PipelineSettings) -> Self {
        Self::new(store, Arc::new(SystemClock), settings)
    }

    pub fn store(&self) -> &dyn PipelineStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn stages(&self) -> StageRegistry<'_> {
        StageRegistry::new(self)
    }

    pub fn history(&self) -> StageHistoryRecorder<'_> {
        StageHistoryRecorder::new(&self.settings)
    }

    pub fn mover(&self) -> PipelineMover<'_> {
        PipelineMover::new(self)
    }

    pub fn board(&self) -> BoardBuilder<'_> {
        BoardBuilder::new(self)
    }

    pub fn analytics(&self) -> AnalyticsAggregator<'_> {
        AnalyticsAggregator::new(self)
    }

    pub fn converter(&self) -> LeadConverter<'_> {
        LeadConverter::new(self)
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
