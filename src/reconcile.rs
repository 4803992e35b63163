//! Translates between the remote row shapes and the domain model, and folds change events into
//! the in-memory collection.
//!
//! This is the only place where remote rows become domain values. Whether a row arrives with the
//! initial load or later through the realtime feed, it goes through `report_from_row`, so the
//! defaulting rules (absent or null numbers are zero, absent lists are empty) are applied the same
//! way every time.

use crate::api::{ChangeEvent, EventType, RemoteData, Table};
use crate::error::Res;
use crate::model::{ensure_ids, AppData, CalculatorItem, Expense, Income, MonthlyReport};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// A row of the `monthly_reports` table. Numeric columns are nullable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyReportRow {
    #[serde(default)]
    pub user_id: String,
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub payday: Option<String>,
    #[serde(default)]
    pub balance: Option<crate::model::Amount>,
    #[serde(default)]
    pub salary: Option<crate::model::Amount>,
    #[serde(default)]
    pub salary_13: Option<crate::model::Amount>,
    #[serde(default)]
    pub salary_14: Option<crate::model::Amount>,
    #[serde(default)]
    pub incomes: Option<Vec<Income>>,
    #[serde(default)]
    pub expenses: Option<Vec<Expense>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A row of the `global_notes` table, one per user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalNotesRow {
    /// Assigned by the store. Its type depends on the schema, so it is kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A row of the `calculator_data` table, one per user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatorDataRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub items: Option<Vec<CalculatorItem>>,
}

/// What folding an event did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// The event was folded in.
    Applied,
    /// The event cannot be folded incrementally; the caller must reload everything.
    Reload,
    /// The event carried nothing usable.
    Ignored,
}

/// Maps a remote report row to a `MonthlyReport`. Lines without an id get one.
pub fn report_from_row(row: MonthlyReportRow) -> MonthlyReport {
    let mut report = MonthlyReport {
        year: row.year,
        month: row.month,
        payday: row.payday.unwrap_or_default(),
        balance: row.balance.unwrap_or_default(),
        salary: row.salary.unwrap_or_default(),
        salary13: row.salary_13.unwrap_or_default(),
        salary14: row.salary_14.unwrap_or_default(),
        incomes: row.incomes.unwrap_or_default(),
        expenses: row.expenses.unwrap_or_default(),
        notes: row.notes.unwrap_or_default(),
    };
    report.normalize();
    report
}

/// The items of a calculator row, with ids backfilled.
fn items_from_row(row: CalculatorDataRow) -> Option<Vec<CalculatorItem>> {
    let mut items = row.items?;
    ensure_ids(&mut items);
    Some(items)
}

/// Maps a `MonthlyReport` to the row written for `user_id`.
pub fn row_from_report(user_id: &str, report: &MonthlyReport) -> MonthlyReportRow {
    MonthlyReportRow {
        user_id: user_id.to_string(),
        year: report.year,
        month: report.month,
        payday: Some(report.payday.clone()),
        balance: Some(report.balance),
        salary: Some(report.salary),
        salary_13: Some(report.salary13),
        salary_14: Some(report.salary14),
        incomes: Some(report.incomes.clone()),
        expenses: Some(report.expenses.clone()),
        notes: Some(report.notes.clone()),
    }
}

/// Builds the full snapshot from the rows returned by a load. Missing singleton rows yield empty
/// defaults.
pub fn app_data_from_remote(remote: RemoteData) -> AppData {
    let mut data = AppData {
        reports: remote.reports.into_iter().map(report_from_row).collect(),
        global_notes: remote
            .global_notes
            .and_then(|row| row.notes)
            .unwrap_or_default(),
        calculator_items: remote
            .calculator
            .and_then(items_from_row)
            .unwrap_or_default(),
    };
    dedup_reports(&mut data);
    data
}

/// Builds the snapshot for a reload on top of `current`. Singletons the store could not read keep
/// their current value.
pub fn reload_from_remote(current: &AppData, remote: RemoteData) -> AppData {
    let unavailable = remote.unavailable.clone();
    let mut data = app_data_from_remote(remote);
    for table in unavailable {
        match table {
            Table::GlobalNotes => data.global_notes = current.global_notes.clone(),
            Table::CalculatorData => data.calculator_items = current.calculator_items.clone(),
            Table::MonthlyReports => {}
        }
    }
    data
}

/// Replaces the report with the same `(year, month)` or appends it, then re-sorts the whole
/// collection descending. This is a full-record replace; no field of the old report survives.
pub fn merge_report(data: &mut AppData, report: MonthlyReport) {
    match data
        .reports
        .iter_mut()
        .find(|r| r.year == report.year && r.month == report.month)
    {
        Some(existing) => *existing = report,
        None => data.reports.push(report),
    }
    data.sort_reports();
}

/// Folds one change event into `data`.
///
/// - Report inserts and updates are merged by key.
/// - Notes and calculator events replace the whole value.
/// - Deletes on any table are never applied as point removals. They return `Fold::Reload`.
/// - Rows that cannot be parsed are logged and ignored.
pub fn fold_event(data: &mut AppData, event: &ChangeEvent) -> Fold {
    if event.event_type == EventType::Delete {
        debug!("Delete on {} requires a full reload", event.table);
        return Fold::Reload;
    }
    let Some(new_row) = event.new_row.as_ref() else {
        trace!("{} event on {} has no new row", event.event_type, event.table);
        return Fold::Ignored;
    };
    let folded = match event.table {
        Table::MonthlyReports => fold_report(data, new_row),
        Table::GlobalNotes => fold_notes(data, new_row),
        Table::CalculatorData => fold_calculator(data, new_row),
    };
    match folded {
        Ok(fold) => fold,
        Err(e) => {
            warn!(
                "Ignoring malformed {} row from {} event: {e:#}",
                event.table, event.event_type
            );
            Fold::Ignored
        }
    }
}

fn fold_report(data: &mut AppData, row: &serde_json::Value) -> Res<Fold> {
    let row: MonthlyReportRow =
        serde_json::from_value(row.clone()).context("Unable to parse monthly report row")?;
    let report = report_from_row(row);
    report.key()?;
    trace!("Folding report {}-{:02}", report.year, report.month);
    merge_report(data, report);
    Ok(Fold::Applied)
}

fn fold_notes(data: &mut AppData, row: &serde_json::Value) -> Res<Fold> {
    let row: GlobalNotesRow =
        serde_json::from_value(row.clone()).context("Unable to parse global notes row")?;
    match row.notes {
        Some(notes) => {
            data.global_notes = notes;
            Ok(Fold::Applied)
        }
        None => Ok(Fold::Ignored),
    }
}

fn fold_calculator(data: &mut AppData, row: &serde_json::Value) -> Res<Fold> {
    let row: CalculatorDataRow =
        serde_json::from_value(row.clone()).context("Unable to parse calculator row")?;
    match items_from_row(row) {
        Some(items) => {
            data.calculator_items = items;
            Ok(Fold::Applied)
        }
        None => Ok(Fold::Ignored),
    }
}

/// Sorts and drops duplicate keys, keeping the first occurrence of each key in the incoming
/// order.
fn dedup_reports(data: &mut AppData) {
    let mut seen = std::collections::HashSet::new();
    data.reports.retain(|r| seen.insert((r.year, r.month)));
    data.sort_reports();
}
