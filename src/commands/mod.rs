//! Command handlers for the ledger CLI.
//!
//! This module contains implementations for all CLI subcommands. Handlers that work on ledger data
//! take an already opened `Session`, so that the same handler serves authenticated and guest runs.

mod auth;
mod init;
mod query;
mod sync;
mod update;

use crate::api::{self, Mode};
use crate::session::Session;
use crate::{Config, Result};
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

pub use auth::{auth, logout, SignedIn};
pub use init::init;
pub use query::{next, search, show, MonthView};
pub use sync::{backup, pull, restore, watch, PullSummary, WatchSummary};
pub use update::{import, notes};

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
        }
    }

    /// Get the `message`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured data stored in `structure`.
    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// Print the message to `info!` and the structured data (if it exists) as JSON to `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
    }
}

/// Opens the session a command runs in: a guest session when `guest` is set, otherwise an
/// authenticated session for the stored credentials.
pub async fn open_session(config: &Config, mode: Mode, guest: bool) -> Result<Session> {
    if guest {
        return Ok(Session::guest());
    }
    let remote = api::remote_store(config, mode).await?;
    Ok(Session::authenticated(remote).await)
}
