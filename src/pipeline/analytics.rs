use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::engine::PipelineEngine;
use super::error::PipelineError;
use super::types::{
    ItemFact, ItemKind, PipelineAnalytics, Stage, StageDwell, StageMetric,
};

const MAX_PERIOD_DAYS: i64 = 3650;

/// `round(part / whole * 100)`, `0` when `whole` is zero.
pub fn percentage(part: i64, whole: i64) -> i64 {
    if whole <= 0 {
        return 0;
    }
    (part as f64 / whole as f64 * 100.0).round() as i64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct AnalyticsAggregator<'a> {
    engine: &'a PipelineEngine,
}

impl<'a> AnalyticsAggregator<'a> {
    pub fn new(engine: &'a PipelineEngine) -> Self {
        Self { engine }
    }

    /// Point-in-time pipeline report. Counts and rates cover items created in the last
    /// `period_days`; per-stage figures and pipeline value cover everything open now.
    pub async fn compute(
        &self,
        org_id: Uuid,
        period_days: Option<i64>,
    ) -> Result<PipelineAnalytics, PipelineError> {
        let period_days =
            period_days.unwrap_or(self.engine.settings().default_analytics_period_days);
        if !(1..=MAX_PERIOD_DAYS).contains(&period_days) {
            return Err(PipelineError::Validation(format!(
                "period must be between 1 and {MAX_PERIOD_DAYS} days"
            )));
        }
        let since = self.engine.now() - Duration::days(period_days);

        let store = self.engine.store();
        let stages = store.list_stages(org_id).await?;
        let facts = store.item_facts(org_id).await?;

        let mut durations = store.closed_durations(org_id, ItemKind::Lead).await?;
        if ItemKind::Deal.is_historied(self.engine.settings()) {
            durations.extend(store.closed_durations(org_id, ItemKind::Deal).await?);
        }

        let (total_leads, won_leads) = created_since(&facts, ItemKind::Lead, since);
        let (total_deals, won_deals) = created_since(&facts, ItemKind::Deal, since);

        let pipeline_value = round2(facts.iter().filter(|f| f.is_open).map(|f| f.value).sum());
        let won_revenue = round2(
            facts
                .iter()
                .filter(|f| f.kind == ItemKind::Deal && f.is_won)
                .filter(|f| f.won_at.is_some_and(|at| at >= since))
                .map(|f| f.value)
                .sum(),
        );

        Ok(PipelineAnalytics {
            period_days,
            stages: stage_metrics(&stages, &facts),
            total_leads,
            won_leads,
            lead_conversion_rate: percentage(won_leads, total_leads),
            total_deals,
            won_deals,
            deal_win_rate: percentage(won_deals, total_deals),
            pipeline_value,
            won_revenue,
            avg_time_in_stage: dwell_by_stage(&stages, &durations),
        })
    }
}

/// `(created, won)` counts of one kind among items created at or after `since`.
fn created_since(facts: &[ItemFact], kind: ItemKind, since: DateTime<Utc>) -> (i64, i64) {
    facts
        .iter()
        .filter(|f| f.kind == kind && f.created_at >= since)
        .fold((0, 0), |(total, won), f| (total + 1, won + i64::from(f.is_won)))
}

fn stage_metrics(stages: &[Stage], facts: &[ItemFact]) -> Vec<StageMetric> {
    let mut metrics: Vec<StageMetric> = stages
        .iter()
        .map(|stage| StageMetric {
            stage_id: stage.id,
            name: stage.name.clone(),
            lead_count: 0,
            deal_count: 0,
            lead_value: 0.0,
            deal_value: 0.0,
            total_count: 0,
            total_value: 0.0,
        })
        .collect();
    let index: HashMap<Uuid, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, stage)| (stage.id, i))
        .collect();

    for fact in facts {
        let Some(&i) = fact.stage_id.and_then(|id| index.get(&id)) else {
            continue;
        };
        let metric = &mut metrics[i];
        match fact.kind {
            ItemKind::Lead => {
                metric.lead_count += 1;
                metric.lead_value += fact.value;
            }
            ItemKind::Deal => {
                metric.deal_count += 1;
                metric.deal_value += fact.value;
            }
        }
        metric.total_count += 1;
        metric.total_value += fact.value;
    }

    for metric in &mut metrics {
        metric.lead_value = round2(metric.lead_value);
        metric.deal_value = round2(metric.deal_value);
        metric.total_value = round2(metric.total_value);
    }
    metrics
}

/// Mean closed dwell per stage, in stage order. Stages without samples are omitted.
fn dwell_by_stage(stages: &[Stage], durations: &[(Uuid, i64)]) -> Vec<StageDwell> {
    let mut sums: HashMap<Uuid, (i64, usize)> = HashMap::new();
    for (stage_id, minutes) in durations {
        let entry = sums.entry(*stage_id).or_insert((0, 0));
        entry.0 += minutes;
        entry.1 += 1;
    }

    stages
        .iter()
        .filter_map(|stage| {
            let (total, samples) = sums.get(&stage.id)?;
            Some(StageDwell {
                stage_id: stage.id,
                name: stage.name.clone(),
                average_minutes: round2(*total as f64 / *samples as f64),
                samples: *samples,
            })
        })
        .collect()
}
