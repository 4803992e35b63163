//! Commands that change ledger data: `import` and `notes`.

use crate::cache::{ImportSummary, WriteOutcome};
use crate::commands::Out;
use crate::error::{IntoResult, Res};
use crate::model::MonthlyReport;
use crate::session::Session;
use crate::{utils, ErrorType, Result};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// The accepted shapes of an import file: `{"reports": [...]}` or a bare array of reports.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Bare(Vec<MonthlyReport>),
    Wrapped { reports: Vec<MonthlyReport> },
}

/// Handles `ledger import`: merges the (possibly partial) reports in `file` into the ledger.
///
/// Typical input is the structured output of a text parser. Every report is validated before any
/// of them is applied.
///
/// # Errors
/// - `Filesystem` if the file cannot be read.
/// - `InvalidData` if it is not a list of reports or any report is invalid.
pub async fn import(session: &Session, file: &Path) -> Result<Out<ImportSummary>> {
    let text = utils::read(file).await.pub_result(ErrorType::Filesystem)?;
    let reports = parse_import(&text).pub_result(ErrorType::InvalidData)?;
    debug!("Read {} reports from {}", reports.len(), file.display());

    let summary = session.cache().import_data(reports).await?;
    let mut message = format!("Imported {} reports", summary.applied);
    if summary.failed > 0 {
        message.push_str(&format!(", {} could not be saved remotely", summary.failed));
    }
    if session.cache().is_guest() {
        message.push_str(" (guest session, nothing was saved)");
    }
    Ok(Out::new(message, summary))
}

fn parse_import(text: &str) -> Res<Vec<MonthlyReport>> {
    let file: ImportFile =
        serde_json::from_str(text).context("Expected a list of reports or {\"reports\": [...]}")?;
    Ok(match file {
        ImportFile::Bare(reports) | ImportFile::Wrapped { reports } => reports,
    })
}

/// Handles `ledger notes`: replaces the global notes and waits for the remote write.
pub async fn notes(session: &Session, text: &str) -> Result<Out<WriteOutcome>> {
    let outcome = session.cache().update_global_notes(text).outcome().await;
    let message = match outcome {
        WriteOutcome::Persisted => "Notes saved".to_string(),
        WriteOutcome::Failed => "Notes updated locally but could not be saved remotely".to_string(),
        WriteOutcome::Skipped => "Notes updated for this guest session only".to_string(),
    };
    Ok(Out::new(message, outcome))
}
