//! Tunecache - inspect and clean the offline media cache.
//!
//! This is the composition root: it initialises logging, loads the
//! settings and runs a single command against the cache.

mod app;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tunecache_core::PassKind;
use tunecache_core::config::config_file_path;

use app::{Action, App};
use error::CliResult;
use logging::LoggingConfig;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Configuration file to use instead of the default one.
    #[clap(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[clap(long, global = true)]
    json: bool,

    /// Log debug output to the console.
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Do not write a log file.
    #[clap(long, global = true)]
    no_log_file: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Sweep stale partial files and evict the oldest files over budget.
    Clean,
    /// Evict only as much as needed to satisfy the budget and the free-space floor.
    CleanSpace,
    /// Delete playlist files of the active server not named here.
    CleanPlaylists {
        /// Names of the playlists the server still has.
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Show the cache footprint.
    Status,
    /// Store the cache in a granted document tree (`volume:relative/path`).
    SetLocation {
        /// Tree location.
        location: String,
    },
    /// Store the cache in the default directory again.
    ResetLocation,
    /// Change the default directory.
    SetDirectory {
        /// Absolute path of the new directory.
        path: PathBuf,
    },
}

impl From<Command> for Action {
    fn from(command: Command) -> Self {
        match command {
            Command::Clean => Self::Pass(PassKind::Clean, Vec::new()),
            Command::CleanSpace => Self::Pass(PassKind::CleanSpace, Vec::new()),
            Command::CleanPlaylists { names } => Self::Pass(PassKind::CleanPlaylists, names),
            Command::Status => Self::Status,
            Command::SetLocation { location } => Self::SetLocation(location),
            Command::ResetLocation => Self::ResetLocation,
            Command::SetDirectory { path } => Self::SetDirectory(path),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::for_command(cli.verbose);
    if cli.no_log_file {
        logging = logging.without_file();
    }
    // Keep the guard alive until exit so the file layer flushes.
    let _guard = match logging::init(&logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging to file is disabled: {e}");
            logging::init(&logging.without_file()).ok()
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let app = App::open(cli.config.unwrap_or_else(config_file_path))?;
    let outcome = app.execute(cli.command.into(), cli.json).await;
    for notice in app.notices() {
        eprintln!("{notice}");
    }
    println!("{}", outcome?);
    Ok(())
}
