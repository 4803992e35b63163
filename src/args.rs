//! These structs provide the CLI interface for the ledger CLI.

use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// ledger: A command-line client for a personal finance ledger.
///
/// Each month has a report with a payday, a balance, the salary, extra incomes and expenses. The
/// data lives in a remote store and is shared live between all of your devices. This program
/// keeps a local view of it, lets you read and change it, and can watch changes made elsewhere as
/// they happen.
///
/// Pass --guest to any command to run it without signing in. Nothing is loaded from or written to
/// the remote store in that case.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration file.
    ///
    /// This is the first command you should run. Decide what directory you want to store data in
    /// and pass this as --ledger-home. By default, it will be $HOME/ledger.
    Init(InitArgs),
    /// Sign in and store the session in the data directory.
    Auth(AuthArgs),
    /// Remove the stored session.
    Logout,
    /// Load everything from the remote store and save a local snapshot of it.
    Pull,
    /// Show the report for one month.
    Show(ShowArgs),
    /// Print the first month that still needs to be filled in.
    Next,
    /// Search expense and income descriptions across all months.
    Search(SearchArgs),
    /// Merge (possibly partial) monthly reports from a JSON file.
    Import(FileArgs),
    /// Replace the global notes.
    Notes(NotesArgs),
    /// Save the current data to a new backup file.
    Backup,
    /// Restore reports, notes and calculator items from a backup file.
    Restore(FileArgs),
    /// Print changes as they arrive from other devices until Ctrl-C.
    Watch,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where ledger data and configuration is held. Defaults to ~/ledger
    #[arg(long, env = "LEDGER_HOME", default_value_t = default_ledger_home())]
    ledger_home: DisplayPath,

    /// Run without signing in. Changes stay in memory and are lost when the command exits.
    #[arg(long)]
    guest: bool,
}

impl Common {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn ledger_home(&self) -> &DisplayPath {
        &self.ledger_home
    }

    pub fn guest(&self) -> bool {
        self.guest
    }
}

/// (Not shown): Args for the `ledger init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The base URL of your remote store, e.g. https://abcd.example.co
    #[arg(long)]
    remote_url: String,

    /// The public API key of your remote project. It is sent with every request.
    #[arg(long)]
    api_key: String,
}

impl InitArgs {
    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// (Not shown): Args for the `ledger auth` command.
#[derive(Debug, Parser, Clone)]
pub struct AuthArgs {
    #[arg(long)]
    email: String,

    /// Your password. Prefer setting LEDGER_PASSWORD over passing it on the command line.
    #[arg(long, env = "LEDGER_PASSWORD", hide_env_values = true)]
    password: String,
}

impl AuthArgs {
    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// (Not shown): Args for the `ledger show` command.
#[derive(Debug, Parser, Clone)]
pub struct ShowArgs {
    /// Defaults to the current year.
    #[arg(long)]
    year: Option<i32>,

    /// 1 to 12. Defaults to the current month.
    #[arg(long)]
    month: Option<u32>,
}

impl ShowArgs {
    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn month(&self) -> Option<u32> {
        self.month
    }
}

/// (Not shown): Args for the `ledger search` command.
#[derive(Debug, Parser, Clone)]
pub struct SearchArgs {
    /// Case-insensitive text to look for in descriptions.
    query: String,
}

impl SearchArgs {
    pub fn query(&self) -> &str {
        &self.query
    }
}

/// (Not shown): Args for commands that read a JSON file.
#[derive(Debug, Parser, Clone)]
pub struct FileArgs {
    #[arg(long)]
    file: PathBuf,
}

impl FileArgs {
    pub fn file(&self) -> &Path {
        &self.file
    }
}

/// (Not shown): Args for the `ledger notes` command.
#[derive(Debug, Parser, Clone)]
pub struct NotesArgs {
    /// The new notes. They replace the old ones entirely.
    #[arg(long)]
    text: String,
}

impl NotesArgs {
    pub fn text(&self) -> &str {
        &self.text
    }
}

fn default_ledger_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("ledger"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --ledger-home or LEDGER_HOME instead of relying on the default \
                ledger home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("ledger")
        }
    })
}

/// A path that can be used as a clap default value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}
