use crate::model::{AppData, Amount, YearMonth};
use serde::{Deserialize, Serialize};

/// Names the 13th month salary is found by.
const SALARY_13_NAMES: &[&str] = &["13esima", "tredicesima", "13th"];
/// Names the 14th month salary is found by.
const SALARY_14_NAMES: &[&str] = &["14esima", "quattordicesima", "14th"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Expense,
    Income,
}

serde_plain::derive_display_from_serialize!(EntryKind);

/// A line that matched a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub description: String,
    pub amount: Amount,
    pub year: i32,
    pub month: u32,
    pub kind: EntryKind,
}

/// All hits for a query, most recent month first, with the subtotals per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total_expenses: Amount,
    pub total_incomes: Amount,
}

impl AppData {
    /// Case-insensitive substring search over expense and income descriptions of every report.
    /// The 13th and 14th month salaries are found when the query is part of one of their names.
    /// A blank query finds nothing.
    pub fn search(&self, query: &str) -> SearchResults {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return SearchResults::default();
        }

        let mut hits = Vec::new();
        for report in &self.reports {
            let hit = |description: &str, amount: Amount, kind: EntryKind| SearchHit {
                description: description.to_string(),
                amount,
                year: report.year,
                month: report.month,
                kind,
            };
            for expense in &report.expenses {
                if expense.description.to_lowercase().contains(&query) {
                    hits.push(hit(&expense.description, expense.amount, EntryKind::Expense));
                }
            }
            for income in &report.incomes {
                if income.description.to_lowercase().contains(&query) {
                    hits.push(hit(&income.description, income.amount, EntryKind::Income));
                }
            }
            if report.salary13.is_positive() && names_match(SALARY_13_NAMES, &query) {
                hits.push(hit("13th month salary", report.salary13, EntryKind::Income));
            }
            if report.salary14.is_positive() && names_match(SALARY_14_NAMES, &query) {
                hits.push(hit("14th month salary", report.salary14, EntryKind::Income));
            }
        }

        // Stable, so lines within a month keep their display order.
        hits.sort_by(|a, b| hit_key(b).cmp(&hit_key(a)));

        let total = |kind: EntryKind| -> Amount {
            hits.iter()
                .filter(|h| h.kind == kind)
                .map(|h| h.amount)
                .sum()
        };
        SearchResults {
            total_expenses: total(EntryKind::Expense),
            total_incomes: total(EntryKind::Income),
            hits,
        }
    }
}

fn names_match(names: &[&str], query: &str) -> bool {
    names.iter().any(|name| name.contains(query))
}

fn hit_key(hit: &SearchHit) -> (i32, u32) {
    (hit.year, hit.month)
}

impl SearchHit {
    /// The month this hit belongs to, if its key is valid.
    pub fn year_month(&self) -> Option<YearMonth> {
        YearMonth::new(self.year, self.month).ok()
    }
}
