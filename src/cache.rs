//! The in-memory source of truth for a session.
//!
//! Reads never wait on the network: `snapshot()` hands back the last known `AppData`. Mutations
//! change the snapshot right away and then persist in the background. A failed background write is
//! logged and reported through the `PendingWrite` it returned, but the local change stays in place
//! until a later write or a realtime event overwrites it.

use crate::api::{ChangeEvent, GuestStore, RemoteStore, Singleton};
use crate::backup::BackupFile;
use crate::error::{IntoResult, Res};
use crate::model::{ensure_ids, AppData, CalculatorItem, MonthlyReport, YearMonth};
use crate::reconcile::{self, Fold};
use crate::{Error, ErrorType, Result};
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// A version of the cached data. `version` increases with every change.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: u64,
    pub data: Arc<AppData>,
}

/// What became of the remote write behind a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The remote store accepted the write.
    Persisted,
    /// The write failed. The local change was kept.
    Failed,
    /// Nothing was sent because this is a guest session.
    Skipped,
}

serde_plain::derive_display_from_serialize!(WriteOutcome);

/// A handle on a background write. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    outcome: Option<oneshot::Receiver<WriteOutcome>>,
}

impl PendingWrite {
    fn skipped() -> Self {
        Self { outcome: None }
    }

    /// Waits for the write to finish.
    pub async fn outcome(self) -> WriteOutcome {
        match self.outcome {
            None => WriteOutcome::Skipped,
            // The sender only goes away without sending if the write task was torn down with the
            // runtime.
            Some(rx) => rx.await.unwrap_or(WriteOutcome::Failed),
        }
    }
}

/// Counts from a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Reports merged into the cache.
    pub applied: usize,
    pub persisted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ImportSummary {
    fn record(&mut self, outcome: WriteOutcome) {
        self.applied += 1;
        match outcome {
            WriteOutcome::Persisted => self.persisted += 1,
            WriteOutcome::Failed => self.failed += 1,
            WriteOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// What a restore did with each section of the backup. `None` means the section was not written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub reports: ImportSummary,
    pub global_notes: Option<WriteOutcome>,
    pub calculator_items: Option<WriteOutcome>,
}

enum Write {
    Report(MonthlyReport),
    Singleton(Singleton),
}

impl Display for Write {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Write::Report(r) => write!(f, "report {}-{:02}", r.year, r.month),
            Write::Singleton(s) => write!(f, "{}", s.table()),
        }
    }
}

/// The owned cache for one session. Clones share the same state.
#[derive(Clone)]
pub struct Cache {
    state: Arc<watch::Sender<Snapshot>>,
    remote: Arc<dyn RemoteStore>,
}

impl Cache {
    /// An empty cache backed by `remote`.
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            state: Arc::new(state),
            remote,
        }
    }

    /// An empty cache whose writes go nowhere.
    pub fn guest() -> Self {
        Self::new(Arc::new(GuestStore))
    }

    pub fn is_guest(&self) -> bool {
        self.remote.is_guest()
    }

    /// The current data. This never waits on the network.
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    /// Shorthand for `snapshot().data`.
    pub fn data(&self) -> Arc<AppData> {
        self.state.borrow().data.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.borrow().version
    }

    /// A receiver that is notified after every change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    /// Looks up the report for `(year, month)`. A month that was never written is `None`, not an
    /// error.
    pub fn get_report(&self, year: i32, month: u32) -> Option<MonthlyReport> {
        self.state.borrow().data.report(year, month).cloned()
    }

    /// Merges `report` into the cache, replacing any report with the same key, and persists it in
    /// the background. Missing line ids are assigned and expense totals recomputed first.
    ///
    /// Must be called from within a Tokio runtime unless this is a guest cache.
    pub fn update_report(&self, mut report: MonthlyReport) -> PendingWrite {
        report.normalize();
        trace!("Updating report {}-{:02}", report.year, report.month);
        let persisted = report.clone();
        self.modify(|data| reconcile::merge_report(data, report));
        self.persist(Write::Report(persisted))
    }

    /// Replaces the notes pad and persists it in the background.
    pub fn update_global_notes(&self, notes: impl Into<String>) -> PendingWrite {
        let notes = notes.into();
        trace!("Updating global notes ({} bytes)", notes.len());
        let persisted = notes.clone();
        self.modify(|data| data.global_notes = notes);
        self.persist(Write::Singleton(Singleton::GlobalNotes(persisted)))
    }

    /// Replaces the calculator items, keeping their order, and persists them in the background.
    pub fn update_calculator_items(&self, mut items: Vec<CalculatorItem>) -> PendingWrite {
        ensure_ids(&mut items);
        trace!("Updating {} calculator items", items.len());
        let persisted = items.clone();
        self.modify(|data| data.calculator_items = items);
        self.persist(Write::Singleton(Singleton::CalculatorItems(persisted)))
    }

    /// Imports a batch of reports, for example partial reports produced from free-form text.
    ///
    /// The whole batch is checked first and an invalid report rejects the batch before anything
    /// changes. After that each report is applied and persisted on its own, in order. A failed
    /// write does not undo earlier reports and does not stop later ones.
    pub async fn import_data(&self, reports: Vec<MonthlyReport>) -> Result<ImportSummary> {
        validate_batch(&reports).pub_result(ErrorType::InvalidData)?;
        let total = reports.len();
        let mut summary = ImportSummary::default();
        for (i, report) in reports.into_iter().enumerate() {
            debug!(
                "Importing report {} of {total}: {}-{:02}",
                i + 1,
                report.year,
                report.month
            );
            let outcome = self.update_report(report).outcome().await;
            summary.record(outcome);
        }
        if summary.failed > 0 {
            warn!(
                "{} of {total} imported reports could not be saved remotely",
                summary.failed
            );
        }
        Ok(summary)
    }

    /// Applies a parsed backup: reports first, then the notes (when present and not empty), then
    /// the calculator items (when present). Each part is written independently.
    pub async fn restore_backup(&self, backup: BackupFile) -> Result<RestoreSummary> {
        let BackupFile {
            reports,
            global_notes,
            calculator_items,
        } = backup;
        let mut summary = RestoreSummary {
            reports: self.import_data(reports.unwrap_or_default()).await?,
            ..RestoreSummary::default()
        };
        if let Some(notes) = global_notes.filter(|n| !n.is_empty()) {
            summary.global_notes = Some(self.update_global_notes(notes).outcome().await);
        }
        if let Some(items) = calculator_items {
            summary.calculator_items = Some(self.update_calculator_items(items).outcome().await);
        }
        info!("Restored {} reports from backup", summary.reports.applied);
        Ok(summary)
    }

    /// Fetches everything from the remote store and replaces the cached data with it. Guest caches
    /// are left alone. On failure the cached data is kept, and so are the notes or calculator
    /// items when only those could not be read.
    pub async fn reload(&self) -> Result<()> {
        if self.is_guest() {
            trace!("Guest session, nothing to reload");
            return Ok(());
        }
        let rows = match self.remote.fetch_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Unable to load data from the remote store: {e:#}");
                return Err(Error::new(ErrorType::RemoteRead, e));
            }
        };
        self.state.send_modify(|snapshot| {
            let data = reconcile::reload_from_remote(&snapshot.data, rows);
            debug!("Reloaded {} reports", data.reports.len());
            snapshot.data = Arc::new(data);
            snapshot.version += 1;
        });
        Ok(())
    }

    /// Folds a change event into the cache. A `Fold::Reload` result is left to the caller.
    pub fn apply_event(&self, event: &ChangeEvent) -> Fold {
        let mut fold = Fold::Ignored;
        self.state.send_if_modified(|snapshot| {
            fold = reconcile::fold_event(Arc::make_mut(&mut snapshot.data), event);
            if fold == Fold::Applied {
                snapshot.version += 1;
                true
            } else {
                false
            }
        });
        trace!("{} event on {}: {fold:?}", event.event_type, event.table);
        fold
    }

    /// Resets the cache to empty data.
    pub fn clear(&self) {
        debug!("Clearing the cache");
        self.replace(AppData::default());
    }

    /// The month the user should fill in next, as of today.
    pub fn first_incomplete_month(&self) -> YearMonth {
        self.first_incomplete_month_at(chrono::Local::now().date_naive())
    }

    /// The month the user should fill in next, as of `today`:
    ///
    /// - If the current month has a report with a payday, it is the next month.
    /// - Otherwise it is the earliest month whose report has no payday.
    /// - Otherwise it is the current month.
    pub fn first_incomplete_month_at(&self, today: NaiveDate) -> YearMonth {
        let current = YearMonth::of(today);
        let data = self.data();
        let current_done = data
            .report(current.year(), current.month())
            .is_some_and(MonthlyReport::has_payday);
        if current_done {
            return current.next();
        }
        // Reports are sorted most recent first.
        data.reports
            .iter()
            .rev()
            .filter(|r| !r.has_payday())
            .find_map(|r| r.key().ok())
            .unwrap_or(current)
    }

    fn replace(&self, data: AppData) {
        self.state.send_modify(|snapshot| {
            snapshot.data = Arc::new(data);
            snapshot.version += 1;
        });
    }

    fn modify(&self, f: impl FnOnce(&mut AppData)) {
        self.state.send_modify(|snapshot| {
            f(Arc::make_mut(&mut snapshot.data));
            snapshot.version += 1;
        });
    }

    fn persist(&self, write: Write) -> PendingWrite {
        if self.is_guest() {
            return PendingWrite::skipped();
        }
        let remote = self.remote.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = match &write {
                Write::Report(report) => remote.upsert_report(report).await,
                Write::Singleton(singleton) => remote.upsert_singleton(singleton).await,
            };
            let outcome = match result {
                Ok(()) => {
                    debug!("Persisted {write}");
                    WriteOutcome::Persisted
                }
                Err(e) => {
                    warn!("Unable to persist {write}, keeping the local change: {e:#}");
                    WriteOutcome::Failed
                }
            };
            // Nobody may be waiting for the outcome.
            let _ = tx.send(outcome);
        });
        PendingWrite {
            outcome: Some(rx),
        }
    }
}

fn validate_batch(reports: &[MonthlyReport]) -> Res<()> {
    for (i, report) in reports.iter().enumerate() {
        report
            .validate()
            .with_context(|| format!("Report {} of the import is invalid", i + 1))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EventType, MemoryStore, Table};
    use crate::model::{Amount, Expense, Income};
    use std::collections::HashSet;

    fn memory_cache() -> (Cache, MemoryStore) {
        let store = MemoryStore::new("u1");
        (Cache::new(Arc::new(store.clone())), store)
    }

    fn keys(cache: &Cache) -> Vec<(i32, u32)> {
        cache
            .data()
            .reports
            .iter()
            .map(|r| (r.year, r.month))
            .collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn with_payday(year: i32, month: u32, payday: &str) -> MonthlyReport {
        let mut report = MonthlyReport::empty(year, month);
        report.payday = payday.to_string();
        report
    }

    #[tokio::test]
    async fn test_distinct_updates_end_sorted_and_unique() {
        let (cache, _) = memory_cache();
        for (y, m) in [(2024, 5), (2023, 1), (2025, 12), (2024, 11), (2024, 1)] {
            cache.update_report(MonthlyReport::empty(y, m));
        }
        assert_eq!(
            keys(&cache),
            vec![(2025, 12), (2024, 11), (2024, 5), (2024, 1), (2023, 1)]
        );
    }

    #[tokio::test]
    async fn test_second_update_replaces_whole_report() {
        let (cache, _) = memory_cache();
        let mut first = MonthlyReport::empty(2024, 4);
        first.notes = "first".to_string();
        first.salary = Amount::from(2000);
        first.expenses.push(Expense::new("Rent", Amount::from(700), false));
        cache.update_report(first);

        let mut second = MonthlyReport::empty(2024, 4);
        second.balance = Amount::from(10);
        cache.update_report(second.clone());

        assert_eq!(cache.data().reports.len(), 1);
        assert_eq!(cache.get_report(2024, 4), Some(second));
    }

    #[tokio::test]
    async fn test_scenario_update_then_get() {
        let (cache, store) = memory_cache();
        let report = MonthlyReport::empty(2024, 3);
        let pending = cache.update_report(report.clone());

        // Visible before the write has had a chance to run.
        assert_eq!(cache.get_report(2024, 3), Some(report));
        assert_eq!(cache.data().reports.len(), 1);

        assert_eq!(pending.outcome().await, WriteOutcome::Persisted);
        assert!(store.report_row(2024, 3).await.is_some());
    }

    #[tokio::test]
    async fn test_get_report_not_found() {
        let (cache, _) = memory_cache();
        cache.update_report(MonthlyReport::empty(2024, 3));
        assert!(cache.get_report(2024, 4).is_none());
        assert!(cache.get_report(2023, 3).is_none());
    }

    #[tokio::test]
    async fn test_import_same_key_matches_single_update() {
        let mut a = MonthlyReport::empty(2024, 6);
        a.notes = "a".to_string();
        a.salary = Amount::from(1);
        let mut b = MonthlyReport::empty(2024, 6);
        b.notes = "b".to_string();
        b.expenses.push(Expense::new("Gym", Amount::from(40), false));

        let (imported, _) = memory_cache();
        imported
            .import_data(vec![a.clone(), b.clone()])
            .await
            .unwrap();
        let (single, _) = memory_cache();
        single.update_report(b);

        assert_eq!(imported.data().reports, single.data().reports);
    }

    #[tokio::test]
    async fn test_import_backfills_ids_once() {
        let (cache, _) = memory_cache();
        let report: MonthlyReport = serde_json::from_str(
            r#"{"year": 2024, "month": 2, "expenses": [
                {"description": "Rent", "amount": 700},
                {"description": "Dinner", "amount": 30, "shared": true}
            ], "incomes": [{"description": "Refund", "amount": 12}]}"#,
        )
        .unwrap();
        let summary = cache.import_data(vec![report]).await.unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.persisted, 1);

        let imported = cache.get_report(2024, 2).unwrap();
        let ids: HashSet<&str> = imported.expenses.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(""));
        assert!(!imported.incomes[0].id.is_empty());
        assert_eq!(imported.expenses[1].total_amount, Some(Amount::from(60)));

        cache.import_data(vec![imported.clone()]).await.unwrap();
        assert_eq!(cache.get_report(2024, 2), Some(imported));
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_batch_before_any_change() {
        let (cache, store) = memory_cache();
        let mut negative = MonthlyReport::empty(2024, 2);
        negative.incomes.push(Income::new("Oops", Amount::from(-5)));
        let batch = vec![
            MonthlyReport::empty(2024, 1),
            negative,
            MonthlyReport::empty(2024, 13),
        ];
        let err = cache.import_data(batch).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidData);
        assert!(cache.data().reports.is_empty());
        assert_eq!(cache.version(), 0);
        assert_eq!(store.row_count(Table::MonthlyReports).await, 0);
    }

    #[tokio::test]
    async fn test_oversized_shared_expense() {
        let (cache, store) = memory_cache();
        let mut report = MonthlyReport::empty(2024, 5);
        report.expenses.push(Expense {
            id: String::new(),
            description: "Everything".to_string(),
            amount: Amount::new(rust_decimal::Decimal::MAX),
            shared: Some(true),
            total_amount: None,
        });

        let err = cache.import_data(vec![report.clone()]).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidData);
        assert!(cache.data().reports.is_empty());

        // A direct update is not validated and must not panic either.
        cache.update_report(report).outcome().await;
        let stored = cache.get_report(2024, 5).unwrap();
        assert_eq!(
            stored.expenses[0].total_amount,
            Some(Amount::new(rust_decimal::Decimal::MAX))
        );
        assert_eq!(store.row_count(Table::MonthlyReports).await, 1);
    }

    #[tokio::test]
    async fn test_failed_writes_keep_local_state() {
        let (cache, store) = memory_cache();
        store.set_fail_writes(true);
        let summary = cache
            .import_data(vec![
                MonthlyReport::empty(2024, 1),
                MonthlyReport::empty(2024, 2),
            ])
            .await
            .unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(keys(&cache), vec![(2024, 2), (2024, 1)]);

        let outcome = cache.update_global_notes("offline").outcome().await;
        assert_eq!(outcome, WriteOutcome::Failed);
        assert_eq!(cache.data().global_notes, "offline");
        assert_eq!(store.row_count(Table::MonthlyReports).await, 0);
    }

    #[tokio::test]
    async fn test_singletons_persist_in_place() {
        let (cache, store) = memory_cache();
        cache.update_global_notes("one").outcome().await;
        cache.update_global_notes("two").outcome().await;
        let item = CalculatorItem {
            id: String::new(),
            description: "Rent".to_string(),
            amount: Amount::from(700),
            color: Some("#6366f1".to_string()),
        };
        let outcome = cache.update_calculator_items(vec![item]).outcome().await;
        assert_eq!(outcome, WriteOutcome::Persisted);

        assert_eq!(store.row_count(Table::GlobalNotes).await, 1);
        assert_eq!(store.row_count(Table::CalculatorData).await, 1);
        let data = cache.data();
        assert_eq!(data.global_notes, "two");
        assert!(!data.calculator_items[0].id.is_empty());
        assert_eq!(store.load().await.unwrap(), *data);
    }

    #[tokio::test]
    async fn test_restore_backup_sections() {
        let (cache, store) = memory_cache();
        cache.update_global_notes("keep me").outcome().await;
        let backup = BackupFile {
            reports: Some(vec![with_payday(2024, 1, "2024-01-27")]),
            global_notes: Some(String::new()),
            calculator_items: Some(vec![CalculatorItem::new("Car", Amount::from(150))]),
        };
        let summary = cache.restore_backup(backup).await.unwrap();
        assert_eq!(summary.reports.persisted, 1);
        assert_eq!(summary.global_notes, None);
        assert_eq!(summary.calculator_items, Some(WriteOutcome::Persisted));

        let data = cache.data();
        assert_eq!(data.global_notes, "keep me");
        assert_eq!(data.calculator_items.len(), 1);
        assert_eq!(store.load().await.unwrap(), *data);
    }

    #[tokio::test]
    async fn test_guest_cache_never_writes() {
        let cache = Cache::guest();
        assert!(cache.is_guest());
        let outcome = cache
            .update_report(MonthlyReport::empty(2024, 1))
            .outcome()
            .await;
        assert_eq!(outcome, WriteOutcome::Skipped);
        cache.reload().await.unwrap();
        assert_eq!(keys(&cache), vec![(2024, 1)]);
    }

    #[tokio::test]
    async fn test_delete_event_means_reload() {
        let (cache, store) = memory_cache();
        for month in [1, 2] {
            cache
                .update_report(MonthlyReport::empty(2024, month))
                .outcome()
                .await;
        }
        assert!(store.delete_report(2024, 1).await);
        let event = ChangeEvent {
            table: Table::MonthlyReports,
            event_type: EventType::Delete,
            new_row: None,
            old_row: None,
        };
        let version = cache.version();
        assert_eq!(cache.apply_event(&event), Fold::Reload);
        assert_eq!(cache.version(), version);
        assert_eq!(keys(&cache), vec![(2024, 2), (2024, 1)]);

        let fetches = store.fetch_count();
        cache.reload().await.unwrap();
        assert_eq!(store.fetch_count(), fetches + 1);
        assert_eq!(keys(&cache), vec![(2024, 2)]);
    }

    #[tokio::test]
    async fn test_apply_event_notifies_watchers() {
        let (cache, _) = memory_cache();
        let mut rx = cache.watch();
        let event = ChangeEvent {
            table: Table::GlobalNotes,
            event_type: EventType::Update,
            new_row: Some(serde_json::json!({"id": "n1", "user_id": "u1", "notes": "remote"})),
            old_row: None,
        };
        assert_eq!(cache.apply_event(&event), Fold::Applied);
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.data.global_notes, "remote");
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _) = memory_cache();
        cache.update_report(MonthlyReport::empty(2024, 1));
        cache.update_global_notes("x");
        cache.clear();
        assert_eq!(*cache.data(), AppData::default());
    }

    #[tokio::test]
    async fn test_first_incomplete_month_scenario() {
        let cache = Cache::guest();
        cache.update_report(with_payday(2024, 1, "2024-01-27"));
        cache.update_report(with_payday(2024, 2, ""));
        assert_eq!(
            cache.first_incomplete_month_at(date(2026, 10, 16)).to_string(),
            "2024-02"
        );
    }

    #[tokio::test]
    async fn test_first_incomplete_month_picks_earliest() {
        let cache = Cache::guest();
        cache.update_report(with_payday(2024, 5, ""));
        cache.update_report(with_payday(2024, 3, ""));
        cache.update_report(with_payday(2024, 4, "2024-04-26"));
        assert_eq!(
            cache.first_incomplete_month_at(date(2024, 5, 2)).to_string(),
            "2024-03"
        );
    }

    #[tokio::test]
    async fn test_first_incomplete_month_current_done_is_next() {
        let cache = Cache::guest();
        cache.update_report(with_payday(2024, 11, ""));
        cache.update_report(with_payday(2024, 12, "2024-12-20"));
        assert_eq!(
            cache.first_incomplete_month_at(date(2024, 12, 21)).to_string(),
            "2025-01"
        );
    }

    #[tokio::test]
    async fn test_first_incomplete_month_defaults_to_current() {
        let cache = Cache::guest();
        assert_eq!(
            cache.first_incomplete_month_at(date(2024, 7, 1)).to_string(),
            "2024-07"
        );
        cache.update_report(with_payday(2024, 6, "2024-06-27"));
        assert_eq!(
            cache.first_incomplete_month_at(date(2024, 7, 1)).to_string(),
            "2024-07"
        );
    }
}
