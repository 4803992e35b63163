use crate::commands::Out;
use crate::{Config, Result};
use std::path::Path;

/// Creates the data directory, its subdirectories and an initial `config.json` file.
///
/// # Arguments
/// - `ledger_home` - The directory that will be the root of data directory, e.g. `$HOME/ledger`
/// - `remote_url` - The base URL of the remote store.
/// - `api_key` - The public key of the remote project.
///
/// # Errors
/// - Returns an error if the URL is invalid or any file operations fail.
pub async fn init(ledger_home: &Path, remote_url: &str, api_key: &str) -> Result<Out<()>> {
    let config = Config::create(ledger_home, remote_url, api_key).await?;
    Ok(format!(
        "Successfully created the ledger directory at {}. Run 'ledger auth' to sign in.",
        config.root().display()
    )
    .into())
}
