use clap::Parser;
use ledger_sync::args::{Args, Command};
use ledger_sync::{commands, Config, Mode, Result};
use std::process::ExitCode;
use tracing::{debug, error, trace, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().ledger_home().path();
    let guest = args.common().guest();

    // This allows for testing the program without a server. When LEDGER_SYNC_IN_TEST_MODE is set
    // and non-zero in length, then the mode will be Mode::Test, otherwise it will be Mode::Remote.
    let mode = Mode::from_env();

    // Route to appropriate command handler
    let _: () = match args.command() {
        Command::Init(init_args) => {
            commands::init(home, init_args.remote_url(), init_args.api_key())
                .await?
                .print()
        }

        Command::Auth(auth_args) => {
            let config = Config::load(home).await?;
            commands::auth(&config, mode, auth_args.email(), auth_args.password())
                .await?
                .print()
        }

        Command::Logout => commands::logout(&Config::load(home).await?).await?.print(),

        Command::Pull => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::pull(&config, &session).await?.print()
        }

        Command::Show(show_args) => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::show(&session, show_args.year(), show_args.month())?.print()
        }

        Command::Next => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::next(&session)?.print()
        }

        Command::Search(search_args) => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::search(&session, search_args.query())?.print()
        }

        Command::Import(file_args) => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::import(&session, file_args.file()).await?.print()
        }

        Command::Notes(notes_args) => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::notes(&session, notes_args.text()).await?.print()
        }

        Command::Backup => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::backup(&config, &session).await?.print()
        }

        Command::Restore(file_args) => {
            let config = Config::load(home).await?;
            let session = commands::open_session(&config, mode, guest).await?;
            commands::restore(&config, &session, file_args.file())
                .await?
                .print()
        }

        Command::Watch => {
            let config = Config::load(home).await?;
            let mut session = commands::open_session(&config, mode, guest).await?;
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Unable to listen for Ctrl-C: {e}");
                    std::future::pending::<()>().await;
                }
            };
            commands::watch(&mut session, shutdown).await?.print()
        }
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
