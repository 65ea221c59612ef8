use crate::config::Config;
use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use historian_store::Store;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod environment;
mod line;

#[derive(Parser)]
#[command(author, version, about = "historian stores your shell history in a queryable database", long_about = None)]
struct Cli {
    /// Database file to use instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database
    Init {
        /// Location of the new database
        path: Option<PathBuf>,
    },
    /// Record the output of `history 1`
    Insert {
        line: String,
        /// Note to attach to the command
        #[arg(short, long)]
        annotate: Option<String>,
        /// Directory to file the command under (defaults to the current one)
        #[arg(short, long)]
        dir: Option<String>,
    },
    /// Most recent commands run in a directory
    Last {
        #[arg(default_value_t = 1)]
        count: usize,
        /// Only show commands matching this regex (repeatable)
        #[arg(short, long)]
        grep: Vec<String>,
        #[arg(short, long)]
        dir: Option<String>,
    },
    /// Commands anywhere matching every regex
    Search {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Commands run today in any directory
    Today,
    /// Commands run in a directory between two RFC 3339 timestamps
    Range {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        dir: Option<String>,
    },
    /// Print every stored command
    Dump,
    /// List directories with recorded history
    Partitions,
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("historian: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(environment::LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let flag = match &cli.command {
        Command::Init { path: Some(path) } => Some(path.clone()),
        _ => cli.db.clone(),
    };
    let path = config.database_path(flag.as_deref(), environment::database_from_env())?;
    debug!("using database {}", path.display());

    let mut stdout = std::io::stdout().lock();
    Store::session(&path, &config.store_options(), |store| {
        match cli.command {
            Command::Init { .. } => {
                writeln!(stdout, "initialised {}", store.path().display())?;
                Ok(())
            }
            Command::Insert {
                line,
                annotate,
                dir,
            } => {
                let dir = directory_or_cwd(dir)?;
                commands::insert(store, &line, &dir, annotate.as_deref(), Utc::now())?;
                Ok(())
            }
            Command::Last { count, grep, dir } => {
                let dir = directory_or_cwd(dir)?;
                commands::last(store, &dir, count, &grep, &mut stdout)
            }
            Command::Search { patterns } => commands::search(store, &patterns, &mut stdout),
            Command::Today => commands::today(store, Utc::now(), &mut stdout),
            Command::Range { from, to, dir } => {
                let dir = directory_or_cwd(dir)?;
                let from = commands::parse_time(&from)?;
                let to = commands::parse_time(&to)?;
                commands::range(store, &dir, from, to, &mut stdout)
            }
            Command::Dump => commands::dump(store, &mut stdout),
            Command::Partitions => commands::partitions(store, &mut stdout),
        }
    })
    .with_context(|| format!("history database {}", path.display()))
}

fn directory_or_cwd(dir: Option<String>) -> Result<String> {
    match dir {
        Some(dir) => Ok(dir),
        None => environment::current_directory(),
    }
}
