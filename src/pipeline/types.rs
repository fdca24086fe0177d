use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::forecast::Forecast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[serde(alias = "leads", alias = "LEAD")]
    Lead,
    #[serde(alias = "deals", alias = "DEAL")]
    Deal,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Deal => "deal",
        }
    }

    /// Leads always keep a stage ledger; deals only when enabled in settings.
    pub fn is_historied(&self, settings: &PipelineSettings) -> bool {
        match self {
            Self::Lead => true,
            Self::Deal => settings.track_deal_history,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lead => write!(f, "Lead"),
            Self::Deal => write!(f, "Deal"),
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lead" | "leads" => Ok(Self::Lead),
            "deal" | "deals" => Ok(Self::Deal),
            other => Err(format!("Unknown entity type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Contacted => "CONTACTED",
            Self::Qualified => "QUALIFIED",
            Self::Proposal => "PROPOSAL",
            Self::Negotiation => "NEGOTIATION",
            Self::Won => "WON",
            Self::Lost => "LOST",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "CONTACTED" => Ok(Self::Contacted),
            "QUALIFIED" => Ok(Self::Qualified),
            "PROPOSAL" => Ok(Self::Proposal),
            "NEGOTIATION" => Ok(Self::Negotiation),
            "WON" => Ok(Self::Won),
            "LOST" => Ok(Self::Lost),
            other => Err(format!("Unknown lead status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealStatus {
    Active,
    Won,
    Lost,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Won => "WON",
            Self::Lost => "LOST",
        }
    }
}

impl FromStr for DealStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "WON" => Ok(Self::Won),
            "LOST" => Ok(Self::Lost),
            other => Err(format!("Unknown deal status: {other}")),
        }
    }
}

/// What entering a stage means for the item's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Open,
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub order: i32,
    pub probability: i32,
    pub is_closed: bool,
    pub is_won: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stage {
    pub fn outcome(&self) -> StageOutcome {
        match (self.is_closed, self.is_won) {
            (true, true) => StageOutcome::Won,
            (true, false) => StageOutcome::Lost,
            (false, _) => StageOutcome::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub org_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: LeadStatus,
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

impl Lead {
    pub fn new(org_id: Uuid, title: impl Into<String>, value: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            customer_id: None,
            assignee_id: None,
            title: title.into(),
            description: None,
            status: LeadStatus::New,
            value,
            probability: 0,
            expected_revenue: 0.0,
            stage_id: None,
            stage_order: 0,
            stage_entered_at: None,
            expected_close_date: None,
            closed_at: None,
            lost_reason: None,
            converted_to_deal_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_converted(&self) -> bool {
        self.converted_to_deal_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: Uuid,
    pub org_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: DealStatus,
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

impl Deal {
    pub fn new(org_id: Uuid, title: impl Into<String>, value: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            customer_id: None,
            owner_id: None,
            lead_id: None,
            title: title.into(),
            description: None,
            status: DealStatus::Active,
            value,
            probability: 0,
            expected_revenue: 0.0,
            stage_id: None,
            stage_order: 0,
            stage_entered_at: None,
            expected_close_date: None,
            actual_close_date: None,
            won_at: None,
            lost_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Capability shared by everything that can sit on the board.
pub trait Stageable {
    fn kind(&self) -> ItemKind;
    fn id(&self) -> Uuid;
    fn org_id(&self) -> Uuid;
    fn title(&self) -> &str;
    fn value(&self) -> f64;
    fn stage_id(&self) -> Option<Uuid>;
    fn stage_order(&self) -> i32;
    fn probability(&self) -> i32;

    fn set_value(&mut self, value: f64);
    fn apply_forecast(&mut self, forecast: Forecast);
    fn place(&mut self, stage_id: Uuid, order: i32, entered_at: Option<DateTime<Utc>>);
    fn apply_outcome(&mut self, outcome: StageOutcome, at: DateTime<Utc>);
    fn touch(&mut self, at: DateTime<Utc>);
}

impl Stageable for Lead {
    fn kind(&self) -> ItemKind {
        ItemKind::Lead
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn org_id(&self) -> Uuid {
        self.org_id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn stage_id(&self) -> Option<Uuid> {
        self.stage_id
    }

    fn stage_order(&self) -> i32 {
        self.stage_order
    }

    fn probability(&self) -> i32 {
        self.probability
    }

    fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    fn apply_forecast(&mut self, forecast: Forecast) {
        self.probability = forecast.probability;
        self.expected_revenue = forecast.expected_revenue;
    }

    fn place(&mut self, stage_id: Uuid, order: i32, entered_at: Option<DateTime<Utc>>) {
        self.stage_id = Some(stage_id);
        self.stage_order = order;
        if entered_at.is_some() {
            self.stage_entered_at = entered_at;
        }
    }

    fn apply_outcome(&mut self, outcome: StageOutcome, at: DateTime<Utc>) {
        match outcome {
            StageOutcome::Won => {
                if self.status != LeadStatus::Won {
                    self.closed_at = Some(at);
                }
                self.status = LeadStatus::Won;
            }
            StageOutcome::Lost => {
                if self.status != LeadStatus::Lost {
                    self.closed_at = Some(at);
                }
                self.status = LeadStatus::Lost;
            }
            StageOutcome::Open => {
                if self.status.is_terminal() {
                    self.status = LeadStatus::New;
                }
                self.closed_at = None;
            }
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

impl Stageable for Deal {
    fn kind(&self) -> ItemKind {
        ItemKind::Deal
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn org_id(&self) -> Uuid {
        self.org_id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn stage_id(&self) -> Option<Uuid> {
        self.stage_id
    }

    fn stage_order(&self) -> i32 {
        self.stage_order
    }

    fn probability(&self) -> i32 {
        self.probability
    }

    fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    fn apply_forecast(&mut self, forecast: Forecast) {
        self.probability = forecast.probability;
        self.expected_revenue = forecast.expected_revenue;
    }

    fn place(&mut self, stage_id: Uuid, order: i32, entered_at: Option<DateTime<Utc>>) {
        self.stage_id = Some(stage_id);
        self.stage_order = order;
        if entered_at.is_some() {
            self.stage_entered_at = entered_at;
        }
    }

    fn apply_outcome(&mut self, outcome: StageOutcome, at: DateTime<Utc>) {
        match outcome {
            StageOutcome::Won => {
                if self.status != DealStatus::Won {
                    self.won_at = Some(at);
                    self.actual_close_date = Some(at);
                }
                self.status = DealStatus::Won;
                self.lost_at = None;
            }
            StageOutcome::Lost => {
                if self.status != DealStatus::Lost {
                    self.lost_at = Some(at);
                    self.actual_close_date = Some(at);
                }
                self.status = DealStatus::Lost;
                self.won_at = None;
            }
            StageOutcome::Open => {
                self.status = DealStatus::Active;
                self.won_at = None;
                self.lost_at = None;
                self.actual_close_date = None;
            }
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", rename_all = "lowercase")]
pub enum PipelineItem {
    Lead(Lead),
    Deal(Deal),
}

impl PipelineItem {
    pub fn as_stageable(&self) -> &dyn Stageable {
        match self {
            Self::Lead(lead) => lead,
            Self::Deal(deal) => deal,
        }
    }

    pub fn as_stageable_mut(&mut self) -> &mut dyn Stageable {
        match self {
            Self::Lead(lead) => lead,
            Self::Deal(deal) => deal,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.as_stageable().kind()
    }

    pub fn id(&self) -> Uuid {
        self.as_stageable().id()
    }

    pub fn stage_id(&self) -> Option<Uuid> {
        self.as_stageable().stage_id()
    }

    pub fn converted_to_deal_id(&self) -> Option<Uuid> {
        match self {
            Self::Lead(lead) => lead.converted_to_deal_id,
            Self::Deal(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHistoryEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    pub stage_id: Uuid,
    pub moved_by: Option<Uuid>,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(rename = "duration")]
    pub duration_minutes: Option<i64>,
}

impl StageHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    StageChanged,
    LeadWon,
    LeadLost,
    DealWon,
    DealLost,
    LeadConverted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageChanged => "stage_changed",
            Self::LeadWon => "lead_won",
            Self::LeadLost => "lead_lost",
            Self::DealWon => "deal_won",
            Self::DealLost => "deal_lost",
            Self::LeadConverted => "lead_converted",
        }
    }

    pub fn for_move(kind: ItemKind, outcome: StageOutcome) -> Self {
        match (kind, outcome) {
            (_, StageOutcome::Open) => Self::StageChanged,
            (ItemKind::Lead, StageOutcome::Won) => Self::LeadWon,
            (ItemKind::Lead, StageOutcome::Lost) => Self::LeadLost,
            (ItemKind::Deal, StageOutcome::Won) => Self::DealWon,
            (ItemKind::Deal, StageOutcome::Lost) => Self::DealLost,
        }
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage_changed" => Ok(Self::StageChanged),
            "lead_won" => Ok(Self::LeadWon),
            "lead_lost" => Ok(Self::LeadLost),
            "deal_won" => Ok(Self::DealWon),
            "deal_lost" => Ok(Self::DealLost),
            "lead_converted" => Ok(Self::LeadConverted),
            other => Err(format!("Unknown activity type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub activity_type: ActivityType,
    pub title: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub closed_stage_display_limit: i64,
    pub default_analytics_period_days: i64,
    pub track_deal_history: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            closed_stage_display_limit: 20,
            default_analytics_period_days: 30,
            track_deal_history: false,
        }
    }
}

/// Denormalized card for the Kanban board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCard {
    pub id: Uuid,
    pub entity_type: ItemKind,
    pub title: String,
    pub status: String,
    pub value: f64,
    pub probability: i32,
    pub expected_revenue: f64,
    pub stage_id: Option<Uuid>,
    pub stage_order: i32,
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub assignee_name: Option<String>,
    pub converted_to_deal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl BoardCard {
    pub fn from_lead(
        lead: &Lead,
        customer_name: Option<String>,
        assignee_name: Option<String>,
    ) -> Self {
        Self {
            id: lead.id,
            entity_type: ItemKind::Lead,
            title: lead.title.clone(),
            status: lead.status.as_str().to_string(),
            value: lead.value,
            probability: lead.probability,
            expected_revenue: lead.expected_revenue,
            stage_id: lead.stage_id,
            stage_order: lead.stage_order,
            stage_entered_at: lead.stage_entered_at,
            closed_at: lead.closed_at,
            customer_id: lead.customer_id,
            customer_name,
            assignee_id: lead.assignee_id,
            assignee_name,
            converted_to_deal_id: lead.converted_to_deal_id,
            created_at: lead.created_at,
        }
    }

    pub fn from_deal(
        deal: &Deal,
        customer_name: Option<String>,
        owner_name: Option<String>,
    ) -> Self {
        Self {
            id: deal.id,
            entity_type: ItemKind::Deal,
            title: deal.title.clone(),
            status: deal.status.as_str().to_string(),
            value: deal.value,
            probability: deal.probability,
            expected_revenue: deal.expected_revenue,
            stage_id: deal.stage_id,
            stage_order: deal.stage_order,
            stage_entered_at: deal.stage_entered_at,
            closed_at: deal.actual_close_date,
            customer_id: deal.customer_id,
            customer_name,
            assignee_id: deal.owner_id,
            assignee_name: owner_name,
            converted_to_deal_id: None,
            created_at: deal.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCounts {
    pub lead_count: i64,
    pub deal_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageWithCounts {
    #[serde(flatten)]
    pub stage: Stage,
    pub lead_count: i64,
    pub deal_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    #[serde(flatten)]
    pub stage: Stage,
    pub items: Vec<BoardCard>,
    pub item_count: usize,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub entity_type: ItemKind,
    pub stages: Vec<BoardColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovedItem {
    pub item: PipelineItem,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub deal: Deal,
    pub lead: Lead,
}

/// Lightweight projection the analytics aggregator works from.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFact {
    pub kind: ItemKind,
    pub stage_id: Option<Uuid>,
    pub value: f64,
    pub is_open: bool,
    pub is_won: bool,
    pub created_at: DateTime<Utc>,
    pub won_at: Option<DateTime<Utc>>,
}

impl ItemFact {
    pub fn from_lead(lead: &Lead) -> Self {
        Self {
            kind: ItemKind::Lead,
            stage_id: lead.stage_id,
            value: lead.value,
            is_open: !lead.status.is_terminal(),
            is_won: lead.status == LeadStatus::Won,
            created_at: lead.created_at,
            won_at: if lead.status == LeadStatus::Won {
                lead.closed_at
            } else {
                None
            },
        }
    }

    pub fn from_deal(deal: &Deal) -> Self {
        Self {
            kind: ItemKind::Deal,
            stage_id: deal.stage_id,
            value: deal.value,
            is_open: deal.status == DealStatus::Active,
            is_won: deal.status == DealStatus::Won,
            created_at: deal.created_at,
            won_at: deal.won_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetric {
    pub stage_id: Uuid,
    pub name: String,
    pub lead_count: i64,
    pub deal_count: i64,
    pub lead_value: f64,
    pub deal_value: f64,
    pub total_count: i64,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDwell {
    pub stage_id: Uuid,
    pub name: String,
    pub average_minutes: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAnalytics {
    pub period_days: i64,
    pub stages: Vec<StageMetric>,
    pub total_leads: i64,
    pub won_leads: i64,
    pub lead_conversion_rate: i64,
    pub total_deals: i64,
    pub won_deals: i64,
    pub deal_win_rate: i64,
    pub pipeline_value: f64,
    pub won_revenue: f64,
    pub avg_time_in_stage: Vec<StageDwell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStageRequest {
    pub name: String,
    pub color: Option<String>,
    pub order: Option<i32>,
    pub probability: Option<i32>,
    pub is_closed: Option<bool>,
    pub is_won: Option<bool>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStageRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    pub order: Option<i32>,
    pub probability: Option<i32>,
    pub is_closed: Option<bool>,
    pub is_won: Option<bool>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderStagesRequest {
    pub stage_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<ItemKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub entity_id: Option<Uuid>,
    pub entity_type: Option<ItemKind>,
    pub stage_id: Option<Uuid>,
    pub new_order: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderInStageRequest {
    pub stage_id: Option<Uuid>,
    pub entity_type: Option<ItemKind>,
    pub ordered_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChangeRequest {
    pub entity_id: Option<Uuid>,
    pub entity_type: Option<ItemKind>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub period: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub value: Option<f64>,
    pub expected_close_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderInStageResponse {
    pub stage_id: Uuid,
    pub entity_type: ItemKind,
    pub updated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(is_closed: bool, is_won: bool) -> Stage {
        let now = Utc::now();
        Stage {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "Stage".to_string(),
            color: None,
            order: 0,
            probability: 50,
            is_closed,
            is_won,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stage_outcome() {
        assert_eq!(stage(false, false).outcome(), StageOutcome::Open);
        assert_eq!(stage(false, true).outcome(), StageOutcome::Open);
        assert_eq!(stage(true, true).outcome(), StageOutcome::Won);
        assert_eq!(stage(true, false).outcome(), StageOutcome::Lost);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("won".parse::<LeadStatus>(), Ok(LeadStatus::Won));
        assert_eq!("NEGOTIATION".parse::<LeadStatus>(), Ok(LeadStatus::Negotiation));
        assert!("pending".parse::<LeadStatus>().is_err());
        assert_eq!("active".parse::<DealStatus>(), Ok(DealStatus::Active));
        assert_eq!("leads".parse::<ItemKind>(), Ok(ItemKind::Lead));
        assert_eq!("Deal".parse::<ItemKind>(), Ok(ItemKind::Deal));
    }

    #[test]
    fn test_item_kind_deserializes_board_aliases() {
        let kind: ItemKind = serde_json::from_str("\"leads\"").unwrap();
        assert_eq!(kind, ItemKind::Lead);
        let kind: ItemKind = serde_json::from_str("\"deal\"").unwrap();
        assert_eq!(kind, ItemKind::Deal);
    }

    #[test]
    fn test_deal_history_follows_settings() {
        let mut settings = PipelineSettings::default();
        assert!(ItemKind::Lead.is_historied(&settings));
        assert!(!ItemKind::Deal.is_historied(&settings));
        settings.track_deal_history = true;
        assert!(ItemKind::Deal.is_historied(&settings));
    }

    #[test]
    fn test_lead_outcome_transitions() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);
        let mut lead = Lead::new(Uuid::new_v4(), "Acme", 100.0, t0);
        lead.status = LeadStatus::Qualified;

        lead.apply_outcome(StageOutcome::Open, t0);
        assert_eq!(lead.status, LeadStatus::Qualified);

        lead.apply_outcome(StageOutcome::Won, t0);
        assert_eq!(lead.status, LeadStatus::Won);
        assert_eq!(lead.closed_at, Some(t0));

        // Re-entering a won stage keeps the original close time.
        lead.apply_outcome(StageOutcome::Won, t1);
        assert_eq!(lead.closed_at, Some(t0));

        lead.apply_outcome(StageOutcome::Open, t1);
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.closed_at, None);
    }

    #[test]
    fn test_deal_outcome_transitions() {
        let t0 = Utc::now();
        let mut deal = Deal::new(Uuid::new_v4(), "Acme", 100.0, t0);

        deal.apply_outcome(StageOutcome::Lost, t0);
        assert_eq!(deal.status, DealStatus::Lost);
        assert_eq!(deal.lost_at, Some(t0));
        assert_eq!(deal.actual_close_date, Some(t0));
        assert_eq!(deal.won_at, None);

        deal.apply_outcome(StageOutcome::Won, t0);
        assert_eq!(deal.status, DealStatus::Won);
        assert_eq!(deal.won_at, Some(t0));
        assert_eq!(deal.lost_at, None);

        deal.apply_outcome(StageOutcome::Open, t0);
        assert_eq!(deal.status, DealStatus::Active);
        assert_eq!(deal.won_at, None);
        assert_eq!(deal.actual_close_date, None);
    }

    #[test]
    fn test_pipeline_item_serializes_entity_type() {
        let lead = Lead::new(Uuid::new_v4(), "Acme", 10.0, Utc::now());
        let json = serde_json::to_value(PipelineItem::Lead(lead)).unwrap();
        assert_eq!(json["entityType"], "lead");
        assert_eq!(json["status"], "NEW");
        assert_eq!(json["stageOrder"], 0);
    }
}
