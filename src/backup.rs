//! Backup files: parsing a backup document before it is restored, and writing rotating local
//! snapshots of the cached data.

use crate::error::{IntoResult, Res};
use crate::model::{AppData, CalculatorItem, MonthlyReport};
use crate::{utils, Config, Error, ErrorType, Result};
use anyhow::{bail, Context};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix for snapshots taken after a pull.
pub const PULL: &str = "pull";

/// Prefix for snapshots taken right before a restore overwrites data.
pub const PRE_RESTORE: &str = "pre-restore";

/// Prefix for snapshots requested with `ledger backup`.
pub const MANUAL: &str = "backup";

/// The sections of a backup document. A section that is absent is left untouched on restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports: Option<Vec<MonthlyReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculator_items: Option<Vec<CalculatorItem>>,
}

impl From<&AppData> for BackupFile {
    fn from(data: &AppData) -> Self {
        Self {
            reports: Some(data.reports.clone()),
            global_notes: Some(data.global_notes.clone()),
            calculator_items: Some(data.calculator_items.clone()),
        }
    }
}

/// Parses and fully validates a backup document. Nothing is restored from a document that fails
/// here, so a bad file can never be applied halfway.
pub fn parse_backup(text: &str) -> Result<BackupFile> {
    parse(text).pub_result(ErrorType::MalformedBackup)
}

/// Reads a backup document from `path` and parses it with `parse_backup`.
pub async fn read_backup(path: &Path) -> Result<BackupFile> {
    let text = utils::read(path).await.pub_result(ErrorType::Filesystem)?;
    parse_backup(&text).map_err(|e| {
        Error::new(
            e.error_type(),
            anyhow::anyhow!("{} is not a valid backup: {e}", path.display()),
        )
    })
}

fn parse(text: &str) -> Res<BackupFile> {
    let value: serde_json::Value =
        serde_json::from_str(text).context("The backup is not valid JSON")?;
    let Some(root) = value.as_object() else {
        bail!("The backup must be a JSON object");
    };
    if !["reports", "globalNotes", "calculatorItems"]
        .iter()
        .any(|key| root.contains_key(*key))
    {
        bail!("The backup has none of 'reports', 'globalNotes' or 'calculatorItems'");
    }
    let backup: BackupFile =
        serde_json::from_value(value).context("The backup does not have the expected shape")?;
    for (i, report) in backup.reports.iter().flatten().enumerate() {
        report
            .validate()
            .with_context(|| format!("Report {} of the backup is invalid", i + 1))?;
    }
    Ok(backup)
}

/// Manages backup file creation and rotation.
///
/// The `Backup` struct is immutable and owns copies of the paths and settings it needs.
/// Create a new instance via `Config::backup()` or `Backup::new()`.
#[derive(Debug, Clone)]
pub struct Backup {
    backups_dir: PathBuf,
    backup_copies: u32,
}

impl Backup {
    /// Creates a new `Backup` instance from a `Config`.
    pub fn new(config: &Config) -> Self {
        Self {
            backups_dir: config.backups().to_path_buf(),
            backup_copies: config.backup_copies(),
        }
    }

    /// Saves `AppData` as a pretty-printed JSON backup file in the same shape `parse_backup`
    /// accepts.
    ///
    /// The filename format is `{prefix}.YYYY-MM-DD-NNN.json` where NNN is a sequence number.
    /// Automatically rotates old backups, keeping only `backup_copies` files.
    ///
    /// Returns the path to the created backup file.
    pub async fn save_json(&self, prefix: &str, data: &AppData) -> Result<PathBuf> {
        self.save(prefix, data)
            .await
            .pub_result(ErrorType::Filesystem)
    }

    async fn save(&self, prefix: &str, data: &AppData) -> Res<PathBuf> {
        let date = today();
        let seq = self.next_sequence_number(prefix, &date, "json").await?;
        let filename = format!("{prefix}.{date}-{seq:03}.json");
        let path = self.backups_dir.join(&filename);

        let json = serde_json::to_string_pretty(&BackupFile::from(data))
            .context("Failed to serialize the ledger data to JSON")?;
        utils::write(&path, json).await?;
        debug!("Wrote backup {}", path.display());

        self.rotate(prefix, "json").await?;

        Ok(path)
    }

    /// Scans the backups directory for existing files with the given prefix and date,
    /// and returns the next sequence number.
    async fn next_sequence_number(&self, prefix: &str, date: &str, extension: &str) -> Res<u32> {
        let pattern_start = format!("{prefix}.{date}-");
        let mut max_seq: u32 = 0;

        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();

            if name.starts_with(&pattern_start) {
                if let Some(seq) = parse_sequence_number(&name, prefix, date, extension) {
                    max_seq = max_seq.max(seq);
                }
            }
        }

        Ok(max_seq + 1)
    }

    /// Rotates old backup files, keeping only `backup_copies` files with the given prefix.
    async fn rotate(&self, prefix: &str, extension: &str) -> Res<()> {
        let mut files: Vec<(PathBuf, String)> = Vec::new();

        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy().to_string();

            if is_backup_file(&name, prefix, extension) {
                files.push((entry.path(), name));
            }
        }

        // Sort by filename (which sorts by date and sequence number due to format)
        files.sort_by(|a, b| a.1.cmp(&b.1));

        let to_delete = files.len().saturating_sub(self.backup_copies as usize);
        for (path, _) in files.into_iter().take(to_delete) {
            debug!("Rotating out {}", path.display());
            utils::remove(&path).await?;
        }

        Ok(())
    }
}

/// Returns today's date in YYYY-MM-DD format.
fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Parses the sequence number from a backup filename.
/// Returns None if the filename doesn't match the expected pattern.
fn parse_sequence_number(filename: &str, prefix: &str, date: &str, extension: &str) -> Option<u32> {
    // Pattern: {prefix}.{date}-{NNN}.{ext}
    let expected_start = format!("{prefix}.{date}-");
    let remainder = filename.strip_prefix(&expected_start)?;
    let expected_suffix = format!(".{extension}");
    remainder.strip_suffix(&expected_suffix)?.parse().ok()
}

/// Checks if a filename is a backup file with the given prefix and extension. The character after
/// the prefix's dot must be a digit so that `backup` does not claim `backup-old.*` files.
fn is_backup_file(filename: &str, prefix: &str, extension: &str) -> bool {
    let Some(rest) = filename.strip_prefix(&format!("{prefix}.")) else {
        return false;
    };
    rest.starts_with(|c: char| c.is_ascii_digit()) && rest.ends_with(&format!(".{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Expense};
    use tempfile::TempDir;

    fn backup_in(dir: &Path, copies: u32) -> Backup {
        Backup {
            backups_dir: dir.to_path_buf(),
            backup_copies: copies,
        }
    }

    async fn file_names(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        names
    }

    #[test]
    fn test_parse_backup_full_document() {
        let text = r##"{
            "reports": [{
                "year": 2024, "month": 3, "payday": "2024-03-27", "balance": 1520.4,
                "salary": 2100, "salary13": 0, "salary14": 0,
                "incomes": [{"description": "Refund", "amount": 20}],
                "expenses": [{"description": "Rent", "amount": 700, "shared": false}],
                "notes": ""
            }],
            "globalNotes": "remember the car tax",
            "calculatorItems": [{"id": "c1", "description": "Car", "amount": 150, "color": "#f00"}]
        }"##;
        let backup = parse_backup(text).unwrap();
        let reports = backup.reports.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].balance.to_string(), "1520.40");
        assert_eq!(reports[0].expenses[0].id, "");
        assert_eq!(backup.global_notes.as_deref(), Some("remember the car tax"));
        assert_eq!(backup.calculator_items.unwrap()[0].color.as_deref(), Some("#f00"));
    }

    #[test]
    fn test_parse_backup_partial_document() {
        let backup = parse_backup(r#"{"globalNotes": "only notes"}"#).unwrap();
        assert!(backup.reports.is_none());
        assert!(backup.calculator_items.is_none());
    }

    #[test]
    fn test_parse_backup_rejects_malformed() {
        let cases = [
            "not json",
            "[1, 2, 3]",
            r#"{"something": "else"}"#,
            r#"{"reports": "nope"}"#,
            r#"{"reports": [{"month": 3}]}"#,
            r#"{"reports": [{"year": 2024, "month": 0}]}"#,
            r#"{"reports": [{"year": 2024, "month": 1, "expenses": [{"amount": -3}]}]}"#,
            r#"{"calculatorItems": {"a": 1}}"#,
        ];
        for text in cases {
            let err = parse_backup(text).unwrap_err();
            assert_eq!(err.error_type(), ErrorType::MalformedBackup, "{text}");
        }
    }

    #[tokio::test]
    async fn test_read_backup_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_backup(&dir.path().join("nope.json")).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Filesystem);
    }

    #[tokio::test]
    async fn test_save_json_round_trips_and_rotates() {
        let dir = TempDir::new().unwrap();
        let backup = backup_in(dir.path(), 2);
        let mut report = MonthlyReport::empty(2024, 5);
        report
            .expenses
            .push(Expense::new("Dinner", Amount::from(30), true));
        let data = AppData {
            reports: vec![report],
            global_notes: "notes".to_string(),
            calculator_items: Vec::new(),
        };

        let first = backup.save_json(PULL, &data).await.unwrap();
        backup.save_json(PULL, &data).await.unwrap();
        let third = backup.save_json(PULL, &data).await.unwrap();
        backup.save_json(MANUAL, &data).await.unwrap();

        let names = file_names(dir.path()).await;
        assert_eq!(names.len(), 3);
        assert!(!first.exists());
        assert!(third.to_string_lossy().ends_with("-003.json"));

        let restored = read_backup(&third).await.unwrap();
        assert_eq!(restored, BackupFile::from(&data));
    }

    #[test]
    fn test_parse_sequence_number() {
        assert_eq!(
            parse_sequence_number("pull.2025-12-14-001.json", "pull", "2025-12-14", "json"),
            Some(1)
        );
        assert_eq!(
            parse_sequence_number("pull.2025-12-14-042.json", "pull", "2025-12-14", "json"),
            Some(42)
        );
        // Wrong prefix
        assert_eq!(
            parse_sequence_number(
                "pre-restore.2025-12-14-001.json",
                "pull",
                "2025-12-14",
                "json"
            ),
            None
        );
        // Wrong date
        assert_eq!(
            parse_sequence_number("pull.2025-12-13-001.json", "pull", "2025-12-14", "json"),
            None
        );
    }

    #[test]
    fn test_is_backup_file() {
        assert!(is_backup_file("pull.2025-12-14-001.json", "pull", "json"));
        assert!(is_backup_file(
            "pre-restore.2025-12-14-001.json",
            "pre-restore",
            "json"
        ));
        assert!(!is_backup_file(
            "pull.2025-12-14-001.json",
            "pre-restore",
            "json"
        ));
        assert!(!is_backup_file("backup.notes.json", "backup", "json"));
        assert!(!is_backup_file("pull.2025-12-14-001.txt", "pull", "json"));
    }
}
