//! sqlsentry CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use sqlsentry::{
    commands::{
        cmd_ask, cmd_init, cmd_search, cmd_seed, cmd_status, cmd_validate, print_ask_outcome,
        print_search_results, print_seed_stats, print_status, print_validation_result,
        AskOptions, AskOutcome,
    },
    config::Config,
    error::Result,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sqlsentry")]
#[command(version, about = "Natural-language analytics over Postgres with guarded SQL generation", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize sqlsentry configuration
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Seed the reference-document collection
    Seed {
        /// JSON file with an array of {doc_type, source, content} documents
        #[arg(long, conflicts_with = "demo")]
        file: Option<PathBuf>,

        /// Load the built-in demo document set
        #[arg(long)]
        demo: bool,
    },

    /// Ask a question against the analytics database
    Ask {
        /// The question to answer
        question: String,

        /// Conversation id for multi-turn context
        #[arg(long)]
        conversation: Option<String>,

        /// Caller role recorded with the run
        #[arg(long)]
        role: Option<String>,

        /// Store id scope
        #[arg(long)]
        store: Option<i64>,

        /// Allowed view (repeatable); defaults to the demo views
        #[arg(long = "view")]
        views: Vec<String>,

        /// Internal token; defaults to INTERNAL_TOKEN from the environment
        #[arg(long, env = "INTERNAL_TOKEN", default_value = "")]
        token: String,
    },

    /// Search the reference-document index
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Validate a SQL candidate offline
    Validate {
        /// SQL text to validate
        sql: String,

        /// Allowed view (repeatable)
        #[arg(long = "view")]
        views: Vec<String>,
    },

    /// Show connectivity status of all dependencies
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    if cli.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    // Init and completions run without an existing config.
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "sqlsentry", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Seed { file, demo } => {
            let stats = cmd_seed(&config, file.as_deref(), demo).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_seed_stats(&stats);
            }
        }

        Commands::Ask {
            question,
            conversation,
            role,
            store,
            views,
            token,
        } => {
            let options = AskOptions {
                conversation_id: conversation
                    .unwrap_or_else(|| format!("cli-{}", Uuid::new_v4())),
                role,
                store_id: store,
                views,
                token,
            };
            let outcome = cmd_ask(&config, &question, options).await?;
            print_ask_outcome(&outcome, cli.json)?;
            if matches!(outcome, AskOutcome::Failed { .. }) {
                std::process::exit(1);
            }
        }

        Commands::Search { query, limit } => {
            let results = cmd_search(&config, &query, limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_search_results(&results);
            }
        }

        Commands::Validate { sql, views } => {
            let views = if views.is_empty() {
                sqlsentry::commands::demo_user_context().allowed_views
            } else {
                views
            };
            match cmd_validate(&sql, &views) {
                Ok(result) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        print_validation_result(&result);
                    }
                }
                Err(e) => {
                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&sqlsentry::answer::failure_report(
                                e.error_code(),
                                &e.public_message(),
                                "validation",
                            ))?
                        );
                    } else {
                        eprintln!("✗ {}", e);
                    }
                    std::process::exit(1);
                }
            }
        }

        Commands::Status => {
            let status = cmd_status(&config).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    let base_dir = cli.config.and_then(|path| {
        if path.extension().map_or(false, |e| e == "toml") {
            path.parent().map(PathBuf::from)
        } else {
            Some(path)
        }
    });

    let config_path = base_dir
        .clone()
        .unwrap_or_else(Config::default_base_dir)
        .join("config.toml");
    cmd_init(base_dir, force).await?;

    println!("✓ sqlsentry initialized successfully");
    println!("  Config: {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Export OPENROUTER_API_KEY, DATABASE_URL, INTERNAL_TOKEN");
    println!("  2. Start Qdrant: docker run -p 6334:6334 qdrant/qdrant");
    println!("  3. Seed documents: sqlsentry seed --demo");
    println!("  4. Ask a question: sqlsentry ask \"top 10 customers\"");

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'sqlsentry init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
