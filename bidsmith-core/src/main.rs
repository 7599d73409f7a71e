//! bidsmith - command-line entry point
//!
//! `classify` runs the full pipeline over a converter manifest and writes
//! the output document. `rules` prints the compiled rule table.
//! `init-config` writes a default configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bidsmith_common::config::{self, TomlConfig, CONFIG_ENV_VAR};
use bidsmith_common::files::write_json_file;
use bidsmith_common::logging::init_tracing;
use bidsmith_core::manifest::Manifest;
use bidsmith_core::reference::ReferenceIndex;
use bidsmith_core::rules::{Predicate, RuleTable};
use bidsmith_core::vocabulary::TaskVocabulary;
use bidsmith_core::Pipeline;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Command-line arguments for bidsmith
#[derive(Parser, Debug)]
#[command(name = "bidsmith")]
#[command(about = "Heuristic BIDS classification of converted neuroimaging series")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long, global = true, env = "BIDSMITH_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify every series in a converter manifest
    Classify {
        /// Manifest written by the converter (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Where to write the output document
        #[arg(short, long, default_value = "bidsmith.json")]
        output: PathBuf,

        /// Reviewed document from an earlier run
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Fetch task names from the configured vocabulary endpoint
        #[arg(long, env = "BIDSMITH_FETCH_TASKS")]
        fetch_tasks: bool,
    },
    /// Print the compiled rule table
    Rules,
    /// Write a default configuration file
    InitConfig {
        /// Target path (defaults to the user config directory)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, source) =
        config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_tracing(&config.logging).context("Failed to initialize logging")?;
    source.report();

    match cli.command {
        Command::Classify {
            manifest,
            output,
            reference,
            fetch_tasks,
        } => classify(config, &manifest, &output, reference.as_deref(), fetch_tasks).await,
        Command::Rules => {
            print_rules(&RuleTable::standard(&config.classification));
            Ok(())
        }
        Command::InitConfig { path } => init_config(path),
    }
}

async fn classify(
    config: TomlConfig,
    manifest_path: &Path,
    output: &Path,
    reference: Option<&Path>,
    fetch_tasks: bool,
) -> Result<()> {
    info!(manifest = %manifest_path.display(), "Starting classification");

    let mut vocabulary = TaskVocabulary::builtin();
    if fetch_tasks || config.tasks.fetch {
        match TaskVocabulary::fetch(&config.tasks.fetch_url).await {
            Ok(names) => vocabulary.extend(names),
            Err(e) => warn!(error = %e, "Task vocabulary fetch failed; using built-in task names"),
        }
    }

    let mut pipeline = Pipeline::new(config, vocabulary);
    if let Some(path) = reference {
        let index = ReferenceIndex::load(path).context("Failed to load reference document")?;
        pipeline = pipeline.with_reference(index);
    }

    let manifest = Manifest::load(manifest_path).context("Failed to load manifest")?;
    let document = pipeline.run(&manifest).context("Classification failed")?;

    write_json_file(&document, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let included = document.series.iter().filter(|s| s.include).count();
    info!(
        output = %output.display(),
        series = document.series.len(),
        included,
        "Wrote output document"
    );
    Ok(())
}

fn print_rules(table: &RuleTable) {
    let keys = |entities: &[bidsmith_core::bids::Entity]| {
        entities.iter().map(|e| e.key()).collect::<Vec<_>>().join(",")
    };
    for entry in table.entries() {
        println!("{}/{}", entry.datatype, entry.suffix);
        println!("  accepted:   {}", keys(entry.accepted));
        if !entry.required.is_empty() {
            println!("  required:   {}", keys(entry.required));
        }
        if !entry.search_terms.is_empty() {
            println!("  terms:      {}", entry.search_terms.join(", "));
        }
        if !entry.conditions.is_empty() {
            let conditions: Vec<String> = entry.conditions.iter().map(|c| c.describe()).collect();
            println!("  conditions: {}", conditions.join("; "));
        }
    }
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let target = match path {
        Some(path) => path,
        None => config::user_config_path().context("No user config directory on this platform")?,
    };
    config::init_default_config(&target)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    info!(path = %target.display(), "Wrote default configuration");
    Ok(())
}
