//! Authentication command handlers.
//!
//! This module implements the CLI commands for:
//! - `ledger auth` - Sign in and store the session credentials
//! - `ledger logout` - Remove the stored session credentials

use crate::api::{self, Mode};
use crate::commands::Out;
use crate::{Config, Result};
use serde::Serialize;
use tracing::debug;

/// Who is signed in, without the token.
#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub user_id: String,
}

/// Handles the `ledger auth` command: exchanges `email` and `password` for session credentials and
/// saves them to the session file. Later commands open their session with these credentials.
///
/// # Errors
/// Returns an error if sign-in is rejected or the session file cannot be written.
pub async fn auth(config: &Config, mode: Mode, email: &str, password: &str) -> Result<Out<SignedIn>> {
    let credentials = api::sign_in(config, mode, email, password).await?;
    config.save_credentials(&credentials).await?;
    debug!("Session saved to {}", config.session_path().display());
    Ok(Out::new(
        format!("Signed in as {email}"),
        SignedIn {
            user_id: credentials.user_id,
        },
    ))
}

/// Handles the `ledger logout` command: removes the stored session credentials.
pub async fn logout(config: &Config) -> Result<Out<()>> {
    if config.remove_credentials().await? {
        Ok("Signed out".into())
    } else {
        Ok("Not signed in".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_auth_then_logout() {
        let env = TestEnv::new().await;
        let config = env.config();

        let out = auth(&config, Mode::Test, "me@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(out.structure().unwrap().user_id, api::TEST_USER_ID);
        assert_eq!(
            config.load_credentials().await.unwrap().user_id,
            api::TEST_USER_ID
        );

        assert_eq!(logout(&config).await.unwrap().message(), "Signed out");
        assert_eq!(logout(&config).await.unwrap().message(), "Not signed in");
    }
}
