//! A session ties a cache to a remote store for its whole lifetime.
//!
//! An authenticated session loads the user's data, opens the single realtime subscription and
//! runs a pump task that folds incoming change events into the cache. A guest session has the same
//! cache and mutation API, but nothing is loaded, persisted, or subscribed to. The mode is chosen
//! when the session is created and cannot change afterwards. Signing out tears everything down.

use crate::api::{Notice, RemoteStore, Subscription};
use crate::cache::Cache;
use crate::reconcile::Fold;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// The lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Authenticated,
    Guest,
    SignedOut,
}

serde_plain::derive_display_from_serialize!(SessionState);

pub struct Session {
    cache: Cache,
    state: SessionState,
    /// Owns the realtime subscription. Stopping it closes the subscription.
    pump: Option<JoinHandle<()>>,
}

impl Session {
    /// Starts an authenticated session on `remote`.
    ///
    /// A failed initial load is logged and leaves the cache empty. A failed subscription is logged
    /// and leaves the session without realtime updates. Neither is fatal.
    pub async fn authenticated(remote: Arc<dyn RemoteStore>) -> Self {
        let cache = Cache::new(remote.clone());

        // Subscribe before loading. Changes made during the load queue up and are folded on top
        // of it once the pump starts.
        let subscription = match remote.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Unable to open the realtime subscription: {e:#}");
                None
            }
        };
        if cache.reload().await.is_err() {
            warn!("Starting with an empty ledger because the initial load failed");
        }
        let pump = subscription.map(|subscription| tokio::spawn(pump(cache.clone(), subscription)));

        info!("Session started with {} reports", cache.data().reports.len());
        Self {
            cache,
            state: SessionState::Authenticated,
            pump,
        }
    }

    /// Starts a guest session. Its cache starts empty and lives only as long as the process.
    pub fn guest() -> Self {
        debug!("Starting a guest session");
        Self {
            cache: Cache::guest(),
            state: SessionState::Guest,
            pump: None,
        }
    }

    /// The session's cache. Clones are cheap and share state.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a realtime subscription is open.
    pub fn is_subscribed(&self) -> bool {
        self.pump.as_ref().is_some_and(|pump| !pump.is_finished())
    }

    /// Closes the realtime subscription, stops the pump and clears the cache.
    pub async fn sign_out(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            // Wait for the task to be dropped so the subscription is closed before returning.
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    warn!("The realtime pump failed: {e}");
                }
            }
        }
        self.cache.clear();
        self.state = SessionState::SignedOut;
        info!("Signed out");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Folds events into `cache` until the subscription ends. Deletes and missed events trigger a
/// full reload.
async fn pump(cache: Cache, mut subscription: Subscription) {
    while let Some(notice) = subscription.recv().await {
        match notice {
            Notice::Change(event) => {
                trace!("Received {} on {}", event.event_type, event.table);
                if cache.apply_event(&event) != Fold::Reload {
                    continue;
                }
                info!("Reloading after a remote delete on {}", event.table);
            }
            Notice::Resync => info!("Reloading after missed change events"),
        }
        // A failed reload is logged by the cache and the current data stays in place.
        let _ = cache.reload().await;
    }
    debug!("Realtime subscription ended");
}
