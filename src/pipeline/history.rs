//! Stage dwell ledger.
//!
//! Each time an item enters a stage a row is opened; leaving the stage closes it and
//! stamps the dwell time in whole minutes. The item's `stage_id` stays the source of
//! truth for "current stage", the ledger is derived from it.

use chrono::{DateTime, Utc};
use log::warn;
use uuid::Uuid;

use super::types::{ItemKind, PipelineSettings, StageHistoryEntry, Stageable};

/// Ledger changes that commit together with a stage move.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTransition {
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    pub previous_stage_id: Option<Uuid>,
    pub opened: StageHistoryEntry,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosedRows {
    pub primary: Option<Uuid>,
    pub strays: usize,
}

pub struct StageHistoryRecorder<'a> {
    settings: &'a PipelineSettings,
}

impl<'a> StageHistoryRecorder<'a> {
    pub fn new(settings: &'a PipelineSettings) -> Self {
        Self { settings }
    }

    /// Plans the close/open pair for a move. `None` when the stage does not change or
    /// the item kind keeps no ledger.
    pub fn transition(
        &self,
        item: &dyn Stageable,
        target_stage_id: Uuid,
        moved_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Option<HistoryTransition> {
        if !item.kind().is_historied(self.settings) {
            return None;
        }
        let previous_stage_id = item.stage_id();
        if previous_stage_id == Some(target_stage_id) {
            return None;
        }
        Some(HistoryTransition {
            item_kind: item.kind(),
            item_id: item.id(),
            previous_stage_id,
            opened: open_entry(
                item.org_id(),
                item.kind(),
                item.id(),
                target_stage_id,
                moved_by,
                at,
            ),
            at,
        })
    }
}

pub fn open_entry(
    org_id: Uuid,
    item_kind: ItemKind,
    item_id: Uuid,
    stage_id: Uuid,
    moved_by: Option<Uuid>,
    at: DateTime<Utc>,
) -> StageHistoryEntry {
    StageHistoryEntry {
        id: Uuid::new_v4(),
        org_id,
        item_kind,
        item_id,
        stage_id,
        moved_by,
        entered_at: at,
        exited_at: None,
        duration_minutes: None,
    }
}

/// Whole minutes between entry and exit, rounded half away from zero.
pub fn duration_minutes(entered_at: DateTime<Utc>, exited_at: DateTime<Utc>) -> i64 {
    let millis = (exited_at - entered_at).num_milliseconds();
    (millis as f64 / 60_000.0).round() as i64
}

/// Closes one row. Already-closed rows keep their original exit and duration.
pub fn close_entry(entry: &mut StageHistoryEntry, at: DateTime<Utc>) -> bool {
    if entry.exited_at.is_some() {
        return false;
    }
    entry.exited_at = Some(at);
    entry.duration_minutes = Some(duration_minutes(entry.entered_at, at));
    true
}

/// Closes the open rows of the moving item.
///
/// The row for the previous stage with the latest `entered_at` is the one the move
/// leaves. Any other open row is a leftover from a lost concurrent write and is closed
/// too so the item never ends up with two open rows. No open row is not an error.
pub fn close_open_rows(
    open_rows: &mut [StageHistoryEntry],
    transition: &HistoryTransition,
) -> ClosedRows {
    let primary = transition.previous_stage_id.and_then(|stage_id| {
        open_rows
            .iter()
            .filter(|row| row.is_open() && row.stage_id == stage_id)
            .max_by_key(|row| row.entered_at)
            .map(|row| row.id)
    });

    let mut strays = 0;
    for row in open_rows.iter_mut() {
        if row.item_id != transition.item_id || row.item_kind != transition.item_kind {
            continue;
        }
        if close_entry(row, transition.at) && Some(row.id) != primary {
            strays += 1;
        }
    }

    if strays > 0 {
        warn!(
            "Closed {} stray open stage history row(s) for {} {}",
            strays, transition.item_kind, transition.item_id
        );
    }

    ClosedRows { primary, strays }
}
