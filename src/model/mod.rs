//! Types that represent the core data model, such as `MonthlyReport` and `AppData`.
mod amount;
mod calculator;
mod month;
mod report;
mod search;

pub use amount::{Amount, AmountError};
pub use calculator::{calculator_total, CalculatorItem};
pub(crate) use calculator::ensure_ids;
pub use month::YearMonth;
pub use report::{Expense, Income, MonthlyReport, ReportTotals};
pub use search::{EntryKind, SearchHit, SearchResults};
use serde::{Deserialize, Serialize};

/// The full snapshot of a user's data: this is both what the cache holds and what a backup file
/// contains.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    /// Sorted by `(year, month)`, most recent first, at most one per key.
    #[serde(default)]
    pub reports: Vec<MonthlyReport>,
    #[serde(default)]
    pub global_notes: String,
    #[serde(default)]
    pub calculator_items: Vec<CalculatorItem>,
}

impl AppData {
    /// Looks up the report for `(year, month)`.
    pub fn report(&self, year: i32, month: u32) -> Option<&MonthlyReport> {
        self.reports
            .iter()
            .find(|r| r.year == year && r.month == month)
    }

    /// Sorts `reports` descending by `(year, month)`.
    pub(crate) fn sort_reports(&mut self) {
        self.reports
            .sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
    }
}
