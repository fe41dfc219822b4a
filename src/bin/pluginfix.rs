//! Replace missing VST2 plugins in Ableton Live sets with their VST3 versions.
//!
//! ```bash
//! pluginfix --catalog plugins.json [--write] [--report run.json] Song.als ...
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use pluginfix_core::{fix_projects, write_report, DocumentOutcome, FixerConfig, PluginCatalog};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "pluginfix")]
#[command(about = "Repair Live sets that reference plugins which are no longer installed")]
struct Args {
    /// JSON configuration file; missing keys use the defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Plugin catalog exported by the host's scanner
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Compute changes without touching any project
    #[arg(long, conflicts_with = "write")]
    dry_run: bool,

    /// Rewrite projects in place (a verified backup is written first)
    #[arg(long)]
    write: bool,

    /// Minimum name similarity for a fuzzy match, 0 to 1
    #[arg(long, value_name = "X")]
    threshold: Option<f64>,

    /// Write the full run report as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Project files (.als)
    #[arg(required = true)]
    projects: Vec<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FixerConfig::from_json_file(path)
            .context(format!("Failed to load configuration: {:?}", path))?,
        None => FixerConfig::default(),
    };
    if args.dry_run {
        config.safety.dry_run = true;
    }
    if args.write {
        config.safety.dry_run = false;
    }
    if let Some(threshold) = args.threshold {
        config.matching.fuzzy_name_threshold = threshold;
    }
    if args.catalog.is_some() {
        config.catalog.path = args.catalog.clone();
    }
    config.validate().context("Invalid options")?;

    let Some(catalog_path) = config.catalog.path.clone() else {
        bail!("No plugin catalog given; pass --catalog or set catalog.path in the config");
    };
    let catalog = PluginCatalog::load(&catalog_path)?;
    tracing::info!(
        plugins = catalog.len(),
        projects = args.projects.len(),
        dry_run = config.safety.dry_run,
        "Starting run"
    );

    let run = fix_projects(&args.projects, &catalog, &config);

    for doc in &run.documents {
        let status = match &doc.outcome {
            DocumentOutcome::Committed => "committed".to_string(),
            DocumentOutcome::DryRun => "dry run".to_string(),
            DocumentOutcome::Unchanged => "unchanged".to_string(),
            DocumentOutcome::Failed { stage, reason } => format!("failed at {}: {}", stage, reason),
            DocumentOutcome::RolledBack { stage, reason } => {
                format!("rolled back at {}: {}", stage, reason)
            }
        };
        println!("{}: {}", doc.path.display(), status);
        for change in &doc.changes {
            println!("  {}", change.summary());
        }
        for missing in &doc.unresolved {
            println!("  {}: {} {} (no replacement)", missing.device, missing.format, missing.name);
        }
    }
    println!("{}", run.summary());

    if let Some(path) = &args.report {
        write_report(&run, path)?;
    }

    Ok(if run.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
