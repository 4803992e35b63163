//! A local cache of a remotely stored personal finance ledger, kept in sync with other devices.
//!
//! Monthly reports, global notes and calculator items are loaded from a remote store into a
//! `Cache`. Edits apply to the cache immediately and are written back in the background. A
//! `Session` keeps the cache current by folding realtime change events from the remote store.

pub mod api;
pub mod args;
pub mod backup;
pub mod cache;
pub mod commands;
mod config;
mod error;
pub mod model;
pub mod reconcile;
pub mod session;
mod utils;


pub use api::Mode;
pub use cache::Cache;
pub use config::{Config, Credentials};
pub use error::{Error, ErrorType, Result};
pub use session::Session;
