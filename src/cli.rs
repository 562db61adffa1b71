//! Thin CLI wrapper over the harness core.
//!
//! Owns argument parsing and exit-status policy only; everything
//! behavioral lives in the library modules.

use crate::catalog::Catalog;
use crate::config::{load_configurations, Limits};
use crate::matrix::{run_matrix, MatrixOptions};
use crate::report::Report;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full snippet x configuration matrix
    Run {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run a filtered subset of the catalog by tag or identifier
    Select {
        #[command(flatten)]
        common: CommonArgs,
        /// Include snippets carrying this tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Include snippets with this identifier (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,
    },
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Path to the snippet catalog document (JSON)
    #[arg(long)]
    catalog: PathBuf,
    /// Path to the toolchain configuration descriptor (JSON)
    #[arg(long)]
    configurations: PathBuf,
    /// Maximum simultaneously running sandboxes
    #[arg(long, default_value_t = 4)]
    jobs: usize,
    /// Per-cell wall-clock timeout override, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Global deadline for the whole run, in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
    /// Write the JSONL report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let (common, tags, ids) = match cli.command {
        Commands::Run { common } => (common, Vec::new(), Vec::new()),
        Commands::Select { common, tags, ids } => {
            if tags.is_empty() && ids.is_empty() {
                bail!("select requires at least one --tag or --id");
            }
            (common, tags, ids)
        }
    };

    let catalog_text = fs::read_to_string(&common.catalog)
        .with_context(|| format!("reading catalog {}", common.catalog.display()))?;
    let catalog = Catalog::load_str(&catalog_text)?;

    let configurations_text = fs::read_to_string(&common.configurations)
        .with_context(|| format!("reading configurations {}", common.configurations.display()))?;
    let configurations = load_configurations(&configurations_text)
        .context("parsing configuration descriptor")?;

    let snippets = if tags.is_empty() && ids.is_empty() {
        catalog.snippets().to_vec()
    } else {
        catalog.filter(&tags, &ids)
    };

    let mut limits = Limits::default();
    if let Some(ms) = common.timeout_ms {
        limits.wall_time = Duration::from_millis(ms);
    }
    let options = MatrixOptions {
        concurrency: common.jobs,
        limits,
        deadline: common.deadline_secs.map(Duration::from_secs),
        ..MatrixOptions::default()
    };

    let results = run_matrix(&snippets, &configurations, &options)?;
    let report = Report::aggregate(results);

    match &common.output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("creating report {}", path.display()))?;
            report.write_jsonl(file)?;
        }
        None => report.write_jsonl(std::io::stdout().lock())?,
    }

    log::info!(
        "matrix complete: {} matched, {} diverged, {} inconclusive",
        report.totals.matched,
        report.totals.diverged,
        report.totals.inconclusive
    );

    if report.has_divergence() {
        std::process::exit(1);
    }
    Ok(())
}
