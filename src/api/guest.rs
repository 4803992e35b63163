//! Implements the `RemoteStore` trait for guest sessions, where nothing leaves the process.

use crate::api::{RemoteData, RemoteStore, Singleton, Subscription};
use crate::error::Res;
use crate::model::MonthlyReport;
use tracing::trace;

/// Every write succeeds without doing anything, nothing is ever read back, and there is no
/// realtime feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuestStore;

#[async_trait::async_trait]
impl RemoteStore for GuestStore {
    async fn fetch_rows(&self) -> Res<RemoteData> {
        Ok(RemoteData::default())
    }

    async fn upsert_report(&self, report: &MonthlyReport) -> Res<()> {
        trace!(
            "Guest session, not persisting report {}-{:02}",
            report.year,
            report.month
        );
        Ok(())
    }

    async fn upsert_singleton(&self, singleton: &Singleton) -> Res<()> {
        trace!("Guest session, not persisting {}", singleton.table());
        Ok(())
    }

    async fn subscribe(&self) -> Res<Option<Subscription>> {
        Ok(None)
    }

    fn is_guest(&self) -> bool {
        true
    }
}
