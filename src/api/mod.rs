//! The remote side of the ledger: the `RemoteStore` trait, its change-event types, and the
//! implementations that talk to the hosted database, to an in-process store, or to nothing at all
//! (guest sessions).

mod guest;
mod memory;
mod rest;

use crate::config::Credentials;
use crate::error::{IntoResult, Res};
use crate::model::{AppData, CalculatorItem, MonthlyReport};
use crate::reconcile::{self, CalculatorDataRow, GlobalNotesRow, MonthlyReportRow};
use crate::{Config, ErrorType, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub use guest::GuestStore;
pub use memory::MemoryStore;
pub use rest::RestStore;

/// How many change events may be queued for a subscriber before the producer waits.
const SUBSCRIPTION_BUFFER: usize = 64;

/// The user id that the in-memory store is seeded for in test mode.
pub const TEST_USER_ID: &str = "00000000-0000-4000-8000-000000000001";

/// This allows for testing the program without a remote database. When
/// `LEDGER_SYNC_IN_TEST_MODE` is set and non-zero in length, the mode is `Mode::Test`, otherwise
/// it is `Mode::Remote`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Remote,
    Test,
}

serde_plain::derive_display_from_serialize!(Mode);

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var("LEDGER_SYNC_IN_TEST_MODE") {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Remote,
        }
    }
}

/// The three tables of the remote schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    MonthlyReports,
    GlobalNotes,
    CalculatorData,
}

serde_plain::derive_display_from_serialize!(Table);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

serde_plain::derive_display_from_serialize!(EventType);

/// A row-level change delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(rename = "new", default)]
    pub new_row: Option<serde_json::Value>,
    #[serde(rename = "old", default)]
    pub old_row: Option<serde_json::Value>,
}

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A row changed.
    Change(ChangeEvent),
    /// Events may have been missed, for example while the feed was reconnecting. The receiver has
    /// to reload everything.
    Resync,
}

/// Everything stored remotely for one user, as raw rows. The reconciler turns this into
/// `AppData`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteData {
    pub reports: Vec<MonthlyReportRow>,
    pub global_notes: Option<GlobalNotesRow>,
    pub calculator: Option<CalculatorDataRow>,
    /// Singleton tables that could not be read. Their `None` above means "unknown", not "absent".
    pub unavailable: Vec<Table>,
}

/// The payload of a write to one of the one-row-per-user tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Singleton {
    GlobalNotes(String),
    CalculatorItems(Vec<CalculatorItem>),
}

impl Singleton {
    pub fn table(&self) -> Table {
        match self {
            Singleton::GlobalNotes(_) => Table::GlobalNotes,
            Singleton::CalculatorItems(_) => Table::CalculatorData,
        }
    }

    /// The columns this payload writes, without `id` or `user_id`.
    pub(crate) fn columns(&self) -> Res<serde_json::Value> {
        Ok(match self {
            Singleton::GlobalNotes(notes) => serde_json::json!({ "notes": notes }),
            Singleton::CalculatorItems(items) => {
                serde_json::json!({ "items": serde_json::to_value(items)? })
            }
        })
    }
}

/// A live feed of change events for one user. Closing it, or dropping it, stops the task that
/// feeds it, which releases the underlying connection.
///
/// The feed is live once `subscribe` returns. Anything written after that is either delivered or
/// covered by a `Notice::Resync`.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<Notice>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Creates the channel a producer task writes to. Pass the receiver, together with the
    /// producer's handle, to `Subscription::new`.
    pub(crate) fn channel() -> (mpsc::Sender<Notice>, mpsc::Receiver<Notice>) {
        mpsc::channel(SUBSCRIPTION_BUFFER)
    }

    pub(crate) fn new(events: mpsc::Receiver<Notice>, task: JoinHandle<()>) -> Self {
        Self {
            events,
            task: Some(task),
        }
    }

    /// Waits for the next notice. Returns `None` once the subscription is closed or the producer
    /// has ended.
    pub async fn recv(&mut self) -> Option<Notice> {
        self.events.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Stops the producer and discards anything still queued.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Closing realtime subscription");
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Authenticated reads and writes against the store that holds a user's ledger, plus the
/// realtime feed of changes to it.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the rows of all three tables for the current user. Missing singleton rows are
    /// `None`, not an error. A store may list singleton tables it failed to read in
    /// `RemoteData::unavailable` instead of failing the whole fetch.
    async fn fetch_rows(&self) -> Res<RemoteData>;

    /// Inserts or replaces the report keyed by `(user, year, month)`. The last write wins.
    async fn upsert_report(&self, report: &MonthlyReport) -> Res<()>;

    /// Writes a singleton, updating the user's existing row in place when there is one.
    async fn upsert_singleton(&self, singleton: &Singleton) -> Res<()>;

    /// Opens the realtime feed for the current user. Stores without a feed return `None`.
    async fn subscribe(&self) -> Res<Option<Subscription>>;

    /// True when writes are suppressed and nothing is ever read back.
    fn is_guest(&self) -> bool {
        false
    }

    /// Fetches everything and maps it to the domain model.
    async fn load(&self) -> Res<AppData> {
        let rows = self.fetch_rows().await?;
        Ok(reconcile::app_data_from_remote(rows))
    }
}

/// Builds the store for an authenticated session: the HTTP store normally, or a seeded in-memory
/// store in test mode.
pub async fn remote_store(config: &Config, mode: Mode) -> Result<Arc<dyn RemoteStore>> {
    let credentials = config.load_credentials().await?;
    debug!("Creating {mode} remote store for user {}", credentials.user_id);
    match mode {
        Mode::Remote => {
            let store = RestStore::new(config.remote_url(), config.api_key(), credentials)
                .pub_result(ErrorType::Config)?;
            Ok(Arc::new(store))
        }
        Mode::Test => Ok(Arc::new(MemoryStore::seeded(&credentials.user_id).await)),
    }
}

/// Exchanges an email and password for session credentials.
pub async fn sign_in(
    config: &Config,
    mode: Mode,
    email: &str,
    password: &str,
) -> Result<Credentials> {
    match mode {
        Mode::Remote => RestStore::sign_in(config.remote_url(), config.api_key(), email, password)
            .await
            .pub_result(ErrorType::Session),
        Mode::Test => Ok(Credentials::new(TEST_USER_ID, format!("test-token-{email}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_event_wire_shape() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "table": "monthly_reports",
            "eventType": "DELETE",
            "old": {"user_id": "u1", "year": 2024, "month": 1}
        }))
        .unwrap();
        assert_eq!(event.table, Table::MonthlyReports);
        assert_eq!(event.event_type, EventType::Delete);
        assert!(event.new_row.is_none());
        assert_eq!(event.old_row.unwrap()["month"], 1);
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::MonthlyReports.to_string(), "monthly_reports");
        assert_eq!(Table::GlobalNotes.to_string(), "global_notes");
        assert_eq!(Table::CalculatorData.to_string(), "calculator_data");
        assert_eq!(EventType::Update.to_string(), "UPDATE");
    }

    #[test]
    fn test_singleton_columns() {
        let notes = Singleton::GlobalNotes("hello".to_string());
        assert_eq!(notes.table(), Table::GlobalNotes);
        assert_eq!(notes.columns().unwrap(), json!({"notes": "hello"}));

        let calc = Singleton::CalculatorItems(Vec::new());
        assert_eq!(calc.table(), Table::CalculatorData);
        assert_eq!(calc.columns().unwrap(), json!({"items": []}));
    }

    #[tokio::test]
    async fn test_subscription_close_stops_producer() {
        let (tx, rx) = Subscription::channel();
        let producer = tokio::spawn(async move {
            std::future::pending::<()>().await;
        });
        let mut subscription = Subscription::new(rx, producer);
        assert!(!subscription.is_closed());
        subscription.close();
        assert!(subscription.is_closed());
        assert!(tx.is_closed());
        assert!(subscription.recv().await.is_none());
    }
}
