//! Rowforge CLI
//!
//! Developer tool for authoring and previewing mapping configurations.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod project;

/// Rowforge - document field mapping and matching
#[derive(Parser)]
#[command(name = "rowforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project file path
    #[arg(short, long, default_value = "rowforge.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new Rowforge project
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Validate mapping configurations against the target schema
    Validate {
        /// Company to resolve for
        #[arg(long)]
        company: Option<String>,

        /// Document format to resolve for
        #[arg(long)]
        format: Option<String>,
    },

    /// Preview a matching run over the sample documents (nothing persisted)
    Preview {
        /// Documents file (JSONL) overriding the project's sample data
        #[arg(short, long)]
        documents: Option<String>,

        /// Company to resolve for
        #[arg(long)]
        company: Option<String>,

        /// Document format to resolve for
        #[arg(long)]
        format: Option<String>,
    },

    /// Manage lookup tables
    Lookup {
        #[command(subcommand)]
        command: LookupCommands,
    },
}

#[derive(Subcommand)]
enum LookupCommands {
    /// Import a CSV lookup table as a LOOKUP rule snippet
    Import {
        /// CSV file with key and value columns
        csv: String,

        /// Source field the rule reads from
        #[arg(short, long)]
        source: String,

        /// Target field the rule writes to
        #[arg(short, long)]
        target: String,

        /// Column holding lookup keys
        #[arg(long, default_value = "key")]
        key_column: String,

        /// Column holding lookup values
        #[arg(long, default_value = "value")]
        value_column: String,

        /// Match keys case-insensitively
        #[arg(long)]
        case_insensitive: bool,

        /// Fallback value for unmatched keys
        #[arg(long)]
        default: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
        Commands::Validate { company, format } => {
            commands::validate::run(&cli.config, company.as_deref(), format.as_deref()).await?;
        }
        Commands::Preview {
            documents,
            company,
            format,
        } => {
            commands::preview::run(
                &cli.config,
                documents.as_deref(),
                company.as_deref(),
                format.as_deref(),
            )
            .await?;
        }
        Commands::Lookup { command } => match command {
            LookupCommands::Import {
                csv,
                source,
                target,
                key_column,
                value_column,
                case_insensitive,
                default,
            } => {
                commands::lookup::import(
                    &csv,
                    &source,
                    &target,
                    &key_column,
                    &value_column,
                    case_insensitive,
                    default.as_deref(),
                )
                .await?;
            }
        },
    }

    Ok(())
}
