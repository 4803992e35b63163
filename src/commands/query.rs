//! Read-only commands: `show`, `next` and `search`.

use crate::commands::Out;
use crate::model::{MonthlyReport, ReportTotals, SearchResults, YearMonth};
use crate::session::Session;
use crate::{Error, ErrorType, Result};
use serde::Serialize;
use std::fmt::Write;

/// One month as displayed: the report (or the empty default when nothing is stored yet) and its
/// totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthView {
    pub month: YearMonth,
    /// False when no report is stored for this month and `report` is the empty default.
    pub exists: bool,
    pub report: MonthlyReport,
    pub totals: ReportTotals,
}

/// Handles `ledger show`: the report for `year`/`month`, defaulting to the current month.
pub fn show(session: &Session, year: Option<i32>, month: Option<u32>) -> Result<Out<MonthView>> {
    let current = YearMonth::current();
    let key = YearMonth::new(year.unwrap_or(current.year()), month.unwrap_or(current.month()))
        .map_err(|e| Error::new(ErrorType::InvalidData, e))?;
    let stored = session.cache().get_report(key.year(), key.month());
    let exists = stored.is_some();
    let report = stored.unwrap_or_else(|| MonthlyReport::empty(key.year(), key.month()));
    let totals = report.totals();

    let mut message = key.to_string();
    if !exists {
        message.push_str(" (no data yet)");
    }
    // Writing to a String cannot fail.
    let _ = write!(
        message,
        "\n  payday: {}\n  balance: {}\n  salary: {}\n  expenses: {} ({} lines, {} shared totalling {})\n  \
        extra incomes: {}",
        if report.payday.is_empty() { "-" } else { report.payday.as_str() },
        report.balance,
        totals.salary,
        totals.expenses,
        report.expenses.len(),
        totals.shared_count,
        totals.shared_total,
        totals.incomes,
    );
    if !report.notes.is_empty() {
        let _ = write!(message, "\n  notes: {}", report.notes);
    }

    Ok(Out::new(
        message,
        MonthView {
            month: key,
            exists,
            report,
            totals,
        },
    ))
}

/// Handles `ledger next`: the first month that still needs to be filled in.
pub fn next(session: &Session) -> Result<Out<YearMonth>> {
    let month = session.cache().first_incomplete_month();
    Ok(Out::new(format!("Next month to complete: {month}"), month))
}

/// Handles `ledger search`: every expense and income line whose description contains `query`.
pub fn search(session: &Session, query: &str) -> Result<Out<SearchResults>> {
    let results = session.cache().data().search(query);
    let mut message = format!("{} results for '{query}'", results.hits.len());
    for hit in &results.hits {
        let _ = write!(
            message,
            "\n  {:04}-{:02}  {:<8} {:>10}  {}",
            hit.year,
            hit.month,
            hit.kind.to_string(),
            hit.amount.to_string(),
            hit.description
        );
    }
    if !results.hits.is_empty() {
        let _ = write!(
            message,
            "\n  expenses: {}  incomes: {}",
            results.total_expenses, results.total_incomes
        );
    }
    Ok(Out::new(message, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryStore;
    use crate::model::Amount;
    use std::sync::Arc;

    async fn seeded_session() -> Session {
        Session::authenticated(Arc::new(MemoryStore::seeded("u1").await)).await
    }

    #[tokio::test]
    async fn test_show_existing_month() {
        let session = seeded_session().await;
        let out = show(&session, Some(2025), Some(9)).unwrap();
        let view = out.structure().unwrap();
        assert!(view.exists);
        assert_eq!(view.report.payday, "2025-09-26");
        assert_eq!(view.totals.expenses, Amount::from(943));
        assert_eq!(view.totals.shared_total, Amount::from(360));
        assert!(out.message().starts_with("2025-09"));
    }

    #[tokio::test]
    async fn test_show_missing_month_is_empty_default() {
        let session = seeded_session().await;
        let out = show(&session, Some(2001), Some(1)).unwrap();
        let view = out.structure().unwrap();
        assert!(!view.exists);
        assert_eq!(view.report, MonthlyReport::empty(2001, 1));
        assert!(out.message().contains("no data yet"));
    }

    #[tokio::test]
    async fn test_show_rejects_bad_month() {
        let session = seeded_session().await;
        let err = show(&session, Some(2024), Some(13)).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidData);
    }

    #[tokio::test]
    async fn test_search() {
        let session = seeded_session().await;
        let out = search(&session, "netflix").unwrap();
        let results = out.structure().unwrap();
        assert_eq!(results.hits.len(), 3);
        assert_eq!(results.total_expenses, Amount::from(39));
        assert_eq!(results.hits[0].month, 10);
    }

    #[tokio::test]
    async fn test_next_on_guest_session() {
        let session = Session::guest();
        let out = next(&session).unwrap();
        assert_eq!(*out.structure().unwrap(), YearMonth::current());
    }
}
