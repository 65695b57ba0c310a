//! # Code Index CLI (`cidx`)
//!
//! ## Usage
//!
//! ```bash
//! cidx --config ./config/cidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx init` | Create the SQLite database and schema |
//! | `cidx project add <name> <root>` | Register a project, print its id |
//! | `cidx project list` | List projects and their status |
//! | `cidx index <id>` | Run one incremental indexing pass |
//! | `cidx status <id>` | Show per-file upload status |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use code_index::progress::ProgressMode;
use code_index::{config, ingest, logging, migrate, project, report};

/// Code Index CLI: incremental upload of a source tree into a remote
/// conversation context.
#[derive(Parser)]
#[command(
    name = "cidx",
    about = "Incrementally index a source tree into a remote conversation context",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage registered projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Index a project: scan, detect changes, chunk and upload.
    ///
    /// Only new, modified or previously failed files are uploaded. Ctrl-C
    /// stops the run after the current step; state stays consistent and
    /// the next run resumes.
    Index {
        /// Project id as printed by `project add`.
        project_id: String,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show the indexing status of a project.
    Status {
        project_id: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a project rooted at a local directory.
    Add {
        name: String,
        root: PathBuf,
    },
    /// List registered projects.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => match action {
            ProjectAction::Add { name, root } => {
                project::run_project_add(&cfg, &name, &root).await?;
            }
            ProjectAction::List => {
                project::run_project_list(&cfg).await?;
            }
        },
        Commands::Index {
            project_id,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_index(&cfg, &project_id, mode).await?;
        }
        Commands::Status { project_id, json } => {
            report::run_status(&cfg, &project_id, json).await?;
        }
    }

    Ok(())
}
