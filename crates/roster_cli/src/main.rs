//! Roster CLI - mirror community members and engagement into a local cache.

mod commands;
mod config;
mod progress;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::status::OutputFormat;
use crate::commands::sync::SyncAction;

#[derive(Parser)]
#[command(name = "roster")]
#[command(version)]
#[command(about = "Mirror large social-platform collections into a local cache")]
#[command(
    long_about = "Roster mirrors community member lists, dialog participants, content \
authors and engagement lists (likes, comments, reshares) into a local database. \
Fetches are split into chunks spread over a pool of rate-limited tokens; a run is \
only committed when enough of the collection was retrieved, and every committed \
member sync records who joined and who left."
)]
#[command(after_long_help = r#"EXAMPLES
    Mirror the members of a configured project:
        $ roster sync members acme

    Scan likes and comments of every post:
        $ roster sync engagement acme --kind likes --kind comments

    Show freshness counters and the last 20 joins/leaves:
        $ roster status acme --history 20

    Generate shell completions:
        $ roster completions bash > ~/.local/share/bash-completion/completions/roster

CONFIGURATION
    Roster reads configuration from:
      1. ~/.config/roster/config.toml (or $XDG_CONFIG_HOME/roster/config.toml)
      2. ./roster.toml
      3. Environment variables (ROSTER_* prefix, sections split by "__")
      4. .env file in current directory

ENVIRONMENT VARIABLES
    ROSTER_DATABASE__URL           Database connection string (default: ~/.local/state/roster/roster.db)
    ROSTER_API__BASE_URL           Method endpoint root
    ROSTER_API__REQUESTS_PER_SECOND  Per-token request budget
    ROSTER_SYNC__CHUNK_SIZE        Items per member-list chunk
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Sync one collection of a configured project
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Show freshness counters of a project
    Status {
        /// Project name
        project: String,

        /// Also list this many recent joins and leaves
        #[arg(long, default_value_t = 0)]
        history: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Interactive runs draw progress bars instead of log lines
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("roster=info,roster_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = config::Config::load();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        commands::meta::handle_completions(*shell)?;
        return Ok(());
    }

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database location; set database.url")?;
    ensure_sqlite_dir(&database_url)?;

    match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Sync { action } => {
            commands::sync::handle_sync(action, &config, &database_url).await?;
        }
        Commands::Status {
            project,
            history,
            output,
        } => {
            commands::status::handle_status(&project, history, output, &database_url).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Create the parent directory of a file-backed SQLite database.
fn ensure_sqlite_dir(database_url: &str) -> std::io::Result<()> {
    let Some(db_path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    // Strip query parameters (e.g., ?mode=rwc) before path operations
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    let db_path = std::path::Path::new(db_path);

    if db_path.is_relative() && !db_path.as_os_str().is_empty() {
        tracing::warn!(
            "Database path '{}' is relative - behavior depends on current directory.",
            db_path.display()
        );
    }

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
