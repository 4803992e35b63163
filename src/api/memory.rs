//! Implements the `RemoteStore` trait with in-memory tables for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without a remote database.

use crate::api::{
    ChangeEvent, EventType, Notice, RemoteData, RemoteStore, Singleton, Subscription, Table,
};
use crate::error::Res;
use crate::model::{Amount, Expense, Income, MonthlyReport};
use crate::reconcile::{self, CalculatorDataRow, GlobalNotesRow, MonthlyReportRow};
use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{trace, warn};

/// Capacity of the shared change feed.
const FEED_CAPACITY: usize = 256;

/// An in-process stand-in for the remote database. Handles created with `for_user` share the same
/// tables and change feed, so two handles behave like two devices (or two users) connected to the
/// same server.
#[derive(Clone)]
pub struct MemoryStore {
    user_id: String,
    shared: Arc<Shared>,
}

struct Shared {
    tables: Mutex<Tables>,
    feed: broadcast::Sender<Published>,
    fetches: AtomicUsize,
    fail_writes: AtomicBool,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Tables {
    reports: BTreeMap<(String, i32, u32), MonthlyReportRow>,
    global_notes: Vec<GlobalNotesRow>,
    calculator: Vec<CalculatorDataRow>,
}

/// An event together with the user whose row changed.
#[derive(Debug, Clone)]
struct Published {
    user_id: String,
    event: ChangeEvent,
}

impl MemoryStore {
    /// Creates an empty store and a handle on it for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            user_id: user_id.into(),
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                feed,
                fetches: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a store that already holds a few months of data for `user_id`.
    pub async fn seeded(user_id: &str) -> Self {
        let store = Self::new(user_id);
        for report in seed_reports() {
            // The feed has no subscribers yet and writes are not failing, so this cannot fail.
            if let Err(e) = store.upsert_report(&report).await {
                warn!("Unable to seed report {}-{}: {e:#}", report.year, report.month);
            }
        }
        store
    }

    /// Another handle on the same tables, acting for `user_id`.
    pub fn for_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            shared: self.shared.clone(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// How many times `fetch_rows` has been called on any handle of this store.
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    /// When `true`, every write fails as if the network were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Removes this user's report for `(year, month)` and publishes a `DELETE` event. Returns
    /// whether a row was removed.
    pub async fn delete_report(&self, year: i32, month: u32) -> bool {
        let removed = {
            let mut tables = self.shared.tables.lock().await;
            tables.reports.remove(&(self.user_id.clone(), year, month))
        };
        match removed {
            Some(row) => {
                let old = serde_json::to_value(&row).ok();
                self.publish(Table::MonthlyReports, EventType::Delete, None, old);
                true
            }
            None => false,
        }
    }

    /// The stored row for this user's `(year, month)`.
    pub async fn report_row(&self, year: i32, month: u32) -> Option<MonthlyReportRow> {
        let tables = self.shared.tables.lock().await;
        tables
            .reports
            .get(&(self.user_id.clone(), year, month))
            .cloned()
    }

    /// How many rows of `table` belong to this user.
    pub async fn row_count(&self, table: Table) -> usize {
        let tables = self.shared.tables.lock().await;
        match table {
            Table::MonthlyReports => tables
                .reports
                .keys()
                .filter(|(user, _, _)| user == &self.user_id)
                .count(),
            Table::GlobalNotes => tables
                .global_notes
                .iter()
                .filter(|r| r.user_id == self.user_id)
                .count(),
            Table::CalculatorData => tables
                .calculator
                .iter()
                .filter(|r| r.user_id == self.user_id)
                .count(),
        }
    }

    /// Publishes `event` to this user's subscribers without touching the tables, as if some other
    /// session had changed a row.
    pub fn inject(&self, event: ChangeEvent) {
        self.shared.send(Published {
            user_id: self.user_id.clone(),
            event,
        });
    }

    fn publish(
        &self,
        table: Table,
        event_type: EventType,
        new_row: Option<serde_json::Value>,
        old_row: Option<serde_json::Value>,
    ) {
        self.inject(ChangeEvent {
            table,
            event_type,
            new_row,
            old_row,
        })
    }

    fn check_writable(&self) -> Res<()> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            bail!("The in-memory store is configured to fail writes");
        }
        Ok(())
    }

    fn next_id(&self) -> serde_json::Value {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst).into()
    }
}

impl Shared {
    fn send(&self, published: Published) {
        // An error only means that nobody is subscribed right now.
        if self.feed.send(published).is_err() {
            trace!("No subscribers for change event");
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_rows(&self) -> Res<RemoteData> {
        self.shared.fetches.fetch_add(1, Ordering::SeqCst);
        let tables = self.shared.tables.lock().await;
        let mut reports: Vec<MonthlyReportRow> = tables
            .reports
            .iter()
            .filter(|((user, _, _), _)| user == &self.user_id)
            .map(|(_, row)| row.clone())
            .collect();
        reports.reverse();
        Ok(RemoteData {
            reports,
            global_notes: tables
                .global_notes
                .iter()
                .find(|r| r.user_id == self.user_id)
                .cloned(),
            calculator: tables
                .calculator
                .iter()
                .find(|r| r.user_id == self.user_id)
                .cloned(),
            unavailable: Vec::new(),
        })
    }

    async fn upsert_report(&self, report: &MonthlyReport) -> Res<()> {
        self.check_writable()
            .with_context(|| format!("Unable to upsert report {}-{}", report.year, report.month))?;
        let row = reconcile::row_from_report(&self.user_id, report);
        let value = serde_json::to_value(&row).context("Unable to serialize report row")?;
        let previous = {
            let mut tables = self.shared.tables.lock().await;
            tables
                .reports
                .insert((self.user_id.clone(), report.year, report.month), row)
        };
        let event_type = match previous {
            Some(_) => EventType::Update,
            None => EventType::Insert,
        };
        let old = previous.and_then(|row| serde_json::to_value(row).ok());
        self.publish(Table::MonthlyReports, event_type, Some(value), old);
        Ok(())
    }

    async fn upsert_singleton(&self, singleton: &Singleton) -> Res<()> {
        let table = singleton.table();
        self.check_writable()
            .with_context(|| format!("Unable to upsert {table}"))?;
        let (event_type, value) = {
            let mut tables = self.shared.tables.lock().await;
            match singleton {
                Singleton::GlobalNotes(notes) => {
                    let existing = tables
                        .global_notes
                        .iter()
                        .position(|r| r.user_id == self.user_id);
                    let (event_type, index) = match existing {
                        Some(index) => (EventType::Update, index),
                        None => {
                            tables.global_notes.push(GlobalNotesRow {
                                id: Some(self.next_id()),
                                user_id: self.user_id.clone(),
                                notes: None,
                            });
                            (EventType::Insert, tables.global_notes.len() - 1)
                        }
                    };
                    let row = &mut tables.global_notes[index];
                    row.notes = Some(notes.clone());
                    (event_type, serde_json::to_value(&*row)?)
                }
                Singleton::CalculatorItems(items) => {
                    let existing = tables
                        .calculator
                        .iter()
                        .position(|r| r.user_id == self.user_id);
                    let (event_type, index) = match existing {
                        Some(index) => (EventType::Update, index),
                        None => {
                            tables.calculator.push(CalculatorDataRow {
                                id: Some(self.next_id()),
                                user_id: self.user_id.clone(),
                                items: None,
                            });
                            (EventType::Insert, tables.calculator.len() - 1)
                        }
                    };
                    let row = &mut tables.calculator[index];
                    row.items = Some(items.clone());
                    (event_type, serde_json::to_value(&*row)?)
                }
            }
        };
        self.publish(table, event_type, Some(value), None);
        Ok(())
    }

    async fn subscribe(&self) -> Res<Option<Subscription>> {
        let mut feed = self.shared.feed.subscribe();
        let (tx, rx) = Subscription::channel();
        let user_id = self.user_id.clone();
        let task = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(published) if published.user_id == user_id => {
                        if tx.send(Notice::Change(published.event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscription for {user_id} missed {n} change events");
                        if tx.send(Notice::Resync).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            trace!("In-memory subscription for {user_id} ended");
        });
        Ok(Some(Subscription::new(rx, task)))
    }
}

/// Seed reports: two complete months and a third without a payday yet.
fn seed_reports() -> Vec<MonthlyReport> {
    let mut reports = Vec::new();
    for (year, month, payday) in [(2025, 8, "2025-08-27"), (2025, 9, "2025-09-26"), (2025, 10, "")] {
        let mut report = MonthlyReport::empty(year, month);
        report.payday = payday.to_string();
        report.balance = Amount::from(2450);
        report.salary = Amount::from(2100);
        report.expenses = vec![
            Expense::new("Rent", Amount::from(750), false),
            Expense::new("Groceries", Amount::from(180), true),
            Expense::new("Netflix", Amount::from(13), false),
        ];
        report.incomes = vec![Income::new("Refund", Amount::from(25))];
        reports.push(report);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SUBSCRIPTION_BUFFER;
    use crate::model::CalculatorItem;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_notice(subscription: &mut Subscription) -> Notice {
        timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("subscription ended")
    }

    async fn next(subscription: &mut Subscription) -> ChangeEvent {
        match next_notice(subscription).await {
            Notice::Change(event) => event,
            Notice::Resync => panic!("unexpected resync"),
        }
    }

    #[tokio::test]
    async fn test_upsert_report_last_write_wins() {
        let store = MemoryStore::new("u1");
        let mut report = MonthlyReport::empty(2024, 3);
        store.upsert_report(&report).await.unwrap();
        report.notes = "second".to_string();
        store.upsert_report(&report).await.unwrap();

        assert_eq!(store.row_count(Table::MonthlyReports).await, 1);
        let row = store.report_row(2024, 3).await.unwrap();
        assert_eq!(row.notes.as_deref(), Some("second"));
        assert_eq!(row.user_id, "u1");
    }

    #[tokio::test]
    async fn test_singletons_update_in_place() {
        let store = MemoryStore::new("u1");
        for text in ["one", "two", "three"] {
            store
                .upsert_singleton(&Singleton::GlobalNotes(text.to_string()))
                .await
                .unwrap();
        }
        store
            .upsert_singleton(&Singleton::CalculatorItems(vec![CalculatorItem::new(
                "Rent",
                Amount::from(700),
            )]))
            .await
            .unwrap();
        store
            .upsert_singleton(&Singleton::CalculatorItems(Vec::new()))
            .await
            .unwrap();

        assert_eq!(store.row_count(Table::GlobalNotes).await, 1);
        assert_eq!(store.row_count(Table::CalculatorData).await, 1);
        let rows = store.fetch_rows().await.unwrap();
        assert_eq!(rows.global_notes.unwrap().notes.as_deref(), Some("three"));
        assert_eq!(rows.calculator.unwrap().items, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_fetch_is_scoped_to_user() {
        let alice = MemoryStore::new("alice");
        let bob = alice.for_user("bob");
        alice
            .upsert_report(&MonthlyReport::empty(2024, 1))
            .await
            .unwrap();
        bob.upsert_report(&MonthlyReport::empty(2024, 2))
            .await
            .unwrap();
        alice
            .upsert_report(&MonthlyReport::empty(2023, 12))
            .await
            .unwrap();

        let rows = alice.fetch_rows().await.unwrap();
        let keys: Vec<(i32, u32)> = rows.reports.iter().map(|r| (r.year, r.month)).collect();
        assert_eq!(keys, vec![(2024, 1), (2023, 12)]);
        assert!(rows.global_notes.is_none());
        assert_eq!(alice.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_filters_by_user() {
        let alice = MemoryStore::new("alice");
        let bob = alice.for_user("bob");
        let mut subscription = alice.subscribe().await.unwrap().unwrap();

        bob.upsert_report(&MonthlyReport::empty(2024, 2))
            .await
            .unwrap();
        alice
            .upsert_report(&MonthlyReport::empty(2024, 1))
            .await
            .unwrap();

        let event = next(&mut subscription).await;
        assert_eq!(event.event_type, EventType::Insert);
        assert_eq!(event.new_row.unwrap()["month"], 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_told_to_resync() {
        let store = MemoryStore::new("u1");
        let mut subscription = store.subscribe().await.unwrap().unwrap();
        let writes = FEED_CAPACITY + SUBSCRIPTION_BUFFER + 10;
        for i in 0..writes {
            store
                .upsert_report(&MonthlyReport::empty(2000 + i as i32, 1))
                .await
                .unwrap();
        }

        let mut resynced = false;
        for _ in 0..writes {
            if next_notice(&mut subscription).await == Notice::Resync {
                resynced = true;
                break;
            }
        }
        assert!(resynced);
    }

    #[tokio::test]
    async fn test_delete_publishes_event() {
        let store = MemoryStore::new("u1");
        store
            .upsert_report(&MonthlyReport::empty(2024, 1))
            .await
            .unwrap();
        let mut subscription = store.subscribe().await.unwrap().unwrap();
        assert!(store.delete_report(2024, 1).await);
        assert!(!store.delete_report(2024, 1).await);

        let event = next(&mut subscription).await;
        assert_eq!(event.event_type, EventType::Delete);
        assert!(event.new_row.is_none());
        assert_eq!(event.old_row.unwrap()["year"], 2024);
        assert_eq!(store.row_count(Table::MonthlyReports).await, 0);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new("u1");
        store.set_fail_writes(true);
        assert!(store
            .upsert_report(&MonthlyReport::empty(2024, 1))
            .await
            .is_err());
        assert!(store
            .upsert_singleton(&Singleton::GlobalNotes("x".to_string()))
            .await
            .is_err());
        store.set_fail_writes(false);
        assert!(store
            .upsert_report(&MonthlyReport::empty(2024, 1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_seeded() {
        let store = MemoryStore::seeded("u1").await;
        let data = store.load().await.unwrap();
        assert_eq!(data.reports.len(), 3);
        assert_eq!((data.reports[0].year, data.reports[0].month), (2025, 10));
        assert!(!data.reports[0].has_payday());
        assert!(data.reports[1].has_payday());
    }
}
