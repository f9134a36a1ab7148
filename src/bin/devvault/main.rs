//! DevVault CLI
//!
//! Local command-line interface against a SQLite store.

mod commands;
mod style;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use style::*;

#[derive(Parser)]
#[command(name = "devvault")]
#[command(version)]
#[command(about = "DevVault - claim GitHub issues, earn reward points", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        env = "DEVVAULT_CONFIG",
        default_value = "config.toml",
        global = true
    )]
    config: PathBuf,

    /// SQLite database file (overrides database.sqlite_path)
    #[arg(long, env = "DEVVAULT_DB", global = true)]
    db: Option<PathBuf>,

    /// Acting user id
    #[arg(short, long, env = "DEVVAULT_USER", global = true)]
    user: Option<i64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull new open issues from the configured repositories
    Sync,

    /// Search issues
    #[command(visible_alias = "ls")]
    Issues {
        /// Substring of title, description or repository
        term: Option<String>,

        /// EASY, MEDIUM or HARD
        #[arg(short, long)]
        difficulty: Option<String>,

        /// OPEN, CLAIMED, IN_PROGRESS, COMPLETED or CLOSED
        #[arg(short, long)]
        status: Option<String>,
    },

    /// List open, unclaimed issues
    #[command(visible_alias = "av")]
    Available,

    /// Show your profile and the issues you hold or completed
    Mine,

    /// Claim an open issue
    Claim { id: i64 },

    /// Give up a claimed issue
    Unclaim { id: i64 },

    /// Mark a claimed issue as in progress
    Start { id: i64 },

    /// Complete a claimed issue and collect its reward
    Complete { id: i64 },

    /// Show the difficulty and reward a set of labels maps to
    Classify {
        #[arg(required = true)]
        labels: Vec<String>,
    },

    /// Register a user
    Register {
        email: String,
        name: String,

        #[arg(long)]
        github: Option<String>,

        #[arg(long)]
        maintainer: bool,
    },

    /// Load demo users and issues into an empty database
    Seed,

    /// Show the GitHub API rate limit
    #[command(name = "rate-limit")]
    RateLimit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let result = run(cli).await;
    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Classify { labels } = &cli.command {
        commands::classify::run(labels);
        return Ok(());
    }

    let ctx = commands::Context::open(&cli.config, cli.db.clone(), cli.user)?;

    match cli.command {
        Commands::Sync => commands::sync::run(&ctx).await,
        Commands::Issues {
            term,
            difficulty,
            status,
        } => commands::issues::search(&ctx, term, difficulty, status).await,
        Commands::Available => commands::issues::available(&ctx).await,
        Commands::Mine => commands::issues::mine(&ctx).await,
        Commands::Claim { id } => commands::transition::claim(&ctx, id).await,
        Commands::Unclaim { id } => commands::transition::unclaim(&ctx, id).await,
        Commands::Start { id } => commands::transition::start(&ctx, id).await,
        Commands::Complete { id } => commands::transition::complete(&ctx, id).await,
        Commands::Register {
            email,
            name,
            github,
            maintainer,
        } => commands::users::register(&ctx, email, name, github, maintainer).await,
        Commands::Seed => commands::users::seed(&ctx).await,
        Commands::RateLimit => commands::sync::rate_limit(&ctx).await,
        Commands::Classify { .. } => Ok(()),
    }
}
