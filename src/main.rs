//! # Research Harness CLI (`rh`)
//!
//! The `rh` binary runs research and heatseek turns against the collection
//! store, lists collections, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! rh --config ./config/rh.toml [--collection <name>] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rh init` | Create the SQLite database and run schema migrations |
//! | `rh research new "<query>"` | Search, fetch and write the first report |
//! | `rh research more [n]` | Write new base reports from unused sources |
//! | `rh research iterate [n]` | Refine the active base report with new sources |
//! | `rh research combine [n]` | Merge two reports into a higher-level report |
//! | `rh research auto [n]` | Combine when possible, otherwise add a report |
//! | `rh research deeper` | Run auto steps until a new combination level exists |
//! | `rh research view [main\|base\|combined\|stats]` | Show reports |
//! | `rh heatseek ["<query>"]` | Start (with a query) or continue a heatseek |
//! | `rh collections` | List collections |
//! | `rh serve` | Start the HTTP server |
//! | `rh completions <shell>` | Print shell completions |
//!
//! Every command except `new` and a heatseek with a query acts on the
//! session in `--collection`.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use research_harness::config::{self, Config};
use research_harness::heatseek::HeatseekController;
use research_harness::migrate;
use research_harness::progress::ProgressMode;
use research_harness::research::ResearchController;
use research_harness::server;
use research_harness::services::{Reply, Services};
use research_harness::sqlite_store::SqliteCollectionStore;
use research_harness_core::command::{ResearchCommand, ViewTarget};
use research_harness_core::error::ResearchResult;
use research_harness_core::store::CollectionStore;

/// Research Harness CLI: iterative web research with LLM-written reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "rh",
    about = "Research Harness: iterative web research with LLM-written reports",
    version,
    long_about = "Research Harness searches the web, fetches sources and writes reports \
    with an LLM. Later turns add sources, refine reports and merge them into higher-level \
    reports. Heatseek mode hunts for one specific answer, grading sources one at a time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rh.toml")]
    config: PathBuf,

    /// Collection holding the session to act on.
    #[arg(long, short = 'c', global = true)]
    collection: Option<String>,

    /// Progress output on stderr: off, human or json.
    ///
    /// Defaults to human when stderr is a terminal, otherwise off.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Run a research-mode command.
    Research {
        #[command(subcommand)]
        action: ResearchAction,
    },

    /// Start a heatseek with QUERY, or continue the one in `--collection`.
    Heatseek {
        /// The question to find an answer for.
        query: Option<String>,
    },

    /// List collections and what kind of session each holds.
    Collections,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ResearchAction {
    /// Start a new research session.
    New {
        query: String,

        /// Report type, e.g. "comparison table"; planned by the LLM if omitted.
        #[arg(long)]
        report_type: Option<String>,
    },
    /// Write new base reports from unused sources.
    More {
        #[arg(default_value_t = 1)]
        num_iterations: usize,
    },
    /// Refine the active base report with new sources.
    Iterate {
        #[arg(default_value_t = 1)]
        num_iterations: usize,
    },
    /// Merge two reports into a higher-level report.
    Combine {
        #[arg(default_value_t = 1)]
        num_iterations: usize,
    },
    /// Combine when possible, otherwise add a base report.
    Auto {
        #[arg(default_value_t = 1)]
        num_iterations: usize,
    },
    /// Run auto steps until a new combination level exists.
    Deeper,
    /// Show reports: main, base, combined or stats.
    View {
        #[arg(default_value = "main")]
        target: String,
    },
    /// Replace the query used by later prompts.
    SetQuery { query: String },
    /// Replace the report type used by later prompts.
    SetReportType { report_type: String },
    /// Replace the search queries and queue their new result links.
    SetSearchQueries {
        #[arg(required = true)]
        queries: Vec<String>,
    },
}

impl ResearchAction {
    fn into_command(self) -> anyhow::Result<ResearchCommand> {
        Ok(match self {
            ResearchAction::New { query, report_type } => ResearchCommand::New { query, report_type },
            ResearchAction::More { num_iterations } => ResearchCommand::More { num_iterations },
            ResearchAction::Iterate { num_iterations } => ResearchCommand::Iterate { num_iterations },
            ResearchAction::Combine { num_iterations } => ResearchCommand::Combine { num_iterations },
            ResearchAction::Auto { num_iterations } => ResearchCommand::Auto { num_iterations },
            ResearchAction::Deeper => ResearchCommand::Deeper,
            ResearchAction::View { target } => ResearchCommand::View {
                target: target.parse::<ViewTarget>().map_err(anyhow::Error::msg)?,
            },
            ResearchAction::SetQuery { query } => ResearchCommand::SetQuery { query },
            ResearchAction::SetReportType { report_type } => {
                ResearchCommand::SetReportType { report_type }
            }
            ResearchAction::SetSearchQueries { queries } => {
                ResearchCommand::SetSearchQueries { queries }
            }
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "rh", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Research { action } => {
            let command = action.into_command()?;
            let services = turn_services(&cfg, cli.progress.as_deref()).await?;
            let controller = ResearchController::new(services, &cfg);
            let result = controller.handle(cli.collection.as_deref(), command).await;
            print_reply(result)?;
        }
        Commands::Heatseek { query } => {
            let services = turn_services(&cfg, cli.progress.as_deref()).await?;
            let controller = HeatseekController::new(services, &cfg);
            let result = controller.handle(cli.collection.as_deref(), query).await;
            print_reply(result)?;
        }
        Commands::Collections => {
            list_collections(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn turn_services(cfg: &Config, progress: Option<&str>) -> anyhow::Result<Services> {
    let mode = match progress {
        Some(flag) => ProgressMode::from_flag(flag)?,
        None => ProgressMode::default_for_tty(),
    };
    let services = Services::from_config(cfg).await?;
    Ok(services.with_progress(Arc::from(mode.reporter())))
}

/// Print the reply text on stdout and the collection on stderr. Recoverable
/// failures are shown as the apology text; fatal ones end the process.
fn print_reply(result: ResearchResult<Reply>) -> anyhow::Result<()> {
    match result {
        Ok(reply) => {
            println!("{}", reply.text);
            if let Some(collection) = &reply.collection {
                eprintln!("Collection: {}", collection);
            }
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            tracing::warn!(error = ?err, "turn failed");
            println!("{}", err.user_message());
            Ok(())
        }
    }
}

async fn list_collections(cfg: &Config) -> anyhow::Result<()> {
    let store = SqliteCollectionStore::open(cfg).await?;
    let collections = store.list().await?;
    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }

    println!("{:<40} {:<10} {:>8}  CREATED", "NAME", "KIND", "CHUNKS");
    for c in collections {
        let created = chrono::DateTime::from_timestamp(c.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| c.created_at.to_string());
        println!("{:<40} {:<10} {:>8}  {}", c.name, c.kind, c.num_chunks, created);
    }
    Ok(())
}
