use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kanbin::errors::SyncError;
use kanbin_common::TaskStatus;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

mod cmd;

#[derive(Parser)]
#[command(name = "kanbin")]
#[command(version, about = "Disposable Kanban boards from the terminal")]
pub struct Cli {
    /// API root of the board service (overrides the config file)
    #[arg(long, global = true, env = "KANBIN_URL")]
    pub server: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format for diagnostics on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, view, watch or delete boards
    Board {
        #[command(subcommand)]
        command: BoardCommands,
    },
    /// Manage the tasks of a board
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum BoardCommands {
    /// Create a new board
    Create { title: String },
    /// Show a board and its columns
    View { key: String },
    /// Delete a board and all of its tasks
    Delete { key: String },
    /// Keep a board on screen, refreshing as it changes (Ctrl-C to stop)
    Watch {
        key: String,
        /// Polling interval in milliseconds (defaults to sync.poll_interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TaskCommands {
    /// Add a task to a board
    Add {
        title: String,
        #[arg(short, long)]
        board: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Column to start in: TODO, IN_PROGRESS or DONE
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },
    /// List the tasks of a board by column
    List {
        #[arg(short, long)]
        board: String,
    },
    /// Move a task as if dragged onto a column or onto another task
    Move {
        id: Uuid,
        #[arg(short, long)]
        board: String,
        /// A column (TODO, IN_PROGRESS, DONE) or the id of the task to drop onto
        #[arg(long)]
        to: String,
    },
    /// Change a task's title or description
    Edit {
        id: Uuid,
        #[arg(short, long)]
        board: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a task
    Delete {
        id: Uuid,
        #[arg(short, long)]
        board: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Print the config file location
    Path,
}

fn init_tracing(verbose: bool, log_format: LogFormat) -> Result<()> {
    let default_level = if verbose { "kanbin=debug" } else { "kanbin=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))?,
    }
    Ok(())
}

/// Process exit code for a failed command.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::ValidationFailed(_)) => 2,
        Some(SyncError::NotFound(_)) => 3,
        Some(SyncError::Expired(_)) => 4,
        _ => 1,
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Board { command } => cmd::cmd_board(cli, command.clone()).await,
        Commands::Task { command } => cmd::cmd_task(cli, command.clone()).await,
        Commands::Config { command } => cmd::cmd_config(cli, command.clone()),
    }
}

#[tokio::main]
async fn main() {
    // .env must be loaded before clap reads KANBIN_URL
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.verbose, cli.log_format).context("Failed to set up logging") {
        eprintln!("{} {:#}", console::style("Error:").red().bold(), err);
        std::process::exit(1);
    }

    if let Err(err) = run(&cli).await {
        eprintln!("{} {:#}", console::style("Error:").red().bold(), err);
        std::process::exit(exit_code(&err));
    }
}
