//! # blobl
//!
//! Command line runner for blobl mappings.
//!
//! `blobl check` parses a mapping and reports the first syntax error.
//! `blobl run` maps newline-delimited messages from a file or stdin and
//! writes one result per line to stdout. Logs go to stderr and are controlled
//! with `RUST_LOG`.

mod config;
mod run;

use anyhow::Context;
use blobl_mapping::{Executor, ParseConfig};
use clap::Parser;
use config::{ErrorPolicy, RunConfig};
use run::Runner;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blobl")]
#[command(about = "Parse and run blobl mappings")]
#[command(version)]
struct Cli {
    /// Path to a YAML run configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    /// Parse a mapping file and report syntax errors
    Check {
        /// Mapping file path
        mapping: PathBuf,
    },

    /// Map newline-delimited messages
    Run {
        /// Mapping file path
        #[arg(short, long)]
        mapping: Option<PathBuf>,

        /// Input file path; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Emit `{"content":..,"metadata":{..}}` lines
        #[arg(long)]
        with_metadata: bool,

        /// Deadline for each message in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// What to do with messages that fail to map
        #[arg(long, value_enum)]
        on_error: Option<ErrorPolicy>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    match cli.command {
        Commands::Check { mapping } => {
            let executor = load_mapping(&mapping)?;
            println!(
                "{}: ok ({} statements, {} maps)",
                mapping.display(),
                executor.statements().len(),
                executor.maps().len()
            );
        }
        Commands::Run {
            mapping,
            input,
            with_metadata,
            timeout_ms,
            on_error,
        } => {
            let mapping = mapping
                .or(config.mapping)
                .context("no mapping given: pass --mapping or set `mapping` in the config file")?;
            let executor = load_mapping(&mapping)?;
            tracing::info!(mapping = %mapping.display(), "running mapping");

            let runner = Runner::new(executor)
                .with_timeout(timeout_ms.or(config.timeout_ms).map(Duration::from_millis))
                .with_error_policy(on_error.unwrap_or(config.on_error))
                .with_metadata(with_metadata || config.with_metadata);

            let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("failed to open input '{}'", path.display()))?;
                    Box::new(BufReader::new(file))
                }
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };
            let mut stdout = tokio::io::stdout();
            let stats = runner.run(reader, &mut stdout).await?;
            tracing::info!(
                mapped = stats.mapped,
                skipped = stats.skipped,
                passed_through = stats.passed_through,
                "done"
            );
        }
    }

    Ok(())
}

fn load_mapping(path: &Path) -> anyhow::Result<Executor> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mapping '{}'", path.display()))?;
    let config = ParseConfig::new().with_filename(path.display().to_string());
    Ok(Executor::parse_with(&source, &config)?)
}
