//! Commands that move whole ledgers around: `pull`, `backup`, `restore` and `watch`.

use crate::backup::{self, MANUAL, PRE_RESTORE, PULL};
use crate::cache::RestoreSummary;
use crate::commands::Out;
use crate::session::Session;
use crate::{Config, Result};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub reports: usize,
    pub backup: PathBuf,
}

/// Handles `ledger pull`: the session has already loaded the remote data, so this saves it as a
/// local snapshot.
pub async fn pull(config: &Config, session: &Session) -> Result<Out<PullSummary>> {
    let data = session.cache().data();
    let backup = config.backup().save_json(PULL, &data).await?;
    debug!("Saved backup to {}", backup.display());
    Ok(Out::new(
        format!(
            "Pulled {} reports, snapshot saved to {}",
            data.reports.len(),
            backup.display()
        ),
        PullSummary {
            reports: data.reports.len(),
            backup,
        },
    ))
}

/// Handles `ledger backup`: writes the current data to a new backup file.
pub async fn backup(config: &Config, session: &Session) -> Result<Out<PathBuf>> {
    let path = config
        .backup()
        .save_json(MANUAL, &session.cache().data())
        .await?;
    Ok(Out::new(format!("Backup saved to {}", path.display()), path))
}

/// Handles `ledger restore`. The file is parsed and validated before anything changes. A snapshot
/// of the current data is saved next, then the backup is applied.
pub async fn restore(config: &Config, session: &Session, file: &Path) -> Result<Out<RestoreSummary>> {
    let parsed = backup::read_backup(file).await?;

    let pre_restore = config
        .backup()
        .save_json(PRE_RESTORE, &session.cache().data())
        .await?;
    info!("Saved the current data to {}", pre_restore.display());

    let summary = session.cache().restore_backup(parsed).await?;
    let mut message = format!(
        "Restored {} reports from {}",
        summary.reports.applied,
        file.display()
    );
    if summary.reports.failed > 0 {
        message.push_str(&format!(
            " ({} could not be saved remotely)",
            summary.reports.failed
        ));
    }
    Ok(Out::new(message, summary))
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSummary {
    /// Cache changes observed while watching.
    pub changes: usize,
    pub reports: usize,
}

/// Handles `ledger watch`: logs every change folded into the cache until `shutdown` resolves,
/// then signs out.
pub async fn watch<F>(session: &mut Session, shutdown: F) -> Result<Out<WatchSummary>>
where
    F: Future<Output = ()>,
{
    if !session.is_subscribed() {
        info!("No realtime subscription is open, waiting for shutdown only");
    }
    let mut observer = session.cache().watch();
    let mut changes = 0;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            changed = observer.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = observer.borrow_and_update().clone();
                changes += 1;
                info!(
                    "Version {}: {} reports, {} calculator items",
                    snapshot.version,
                    snapshot.data.reports.len(),
                    snapshot.data.calculator_items.len()
                );
            }
            _ = &mut shutdown => break,
        }
    }

    let reports = session.cache().data().reports.len();
    session.sign_out().await;
    Ok(Out::new(
        format!("Watched {changes} changes"),
        WatchSummary { changes, reports },
    ))
}
