//! geocheck - Building registry enrichment CLI
//!
//! Reads a CSV table of buildings, looks every EGID up in the federal
//! building register, writes the enriched table and a JSON findings report.
//!
//! Configuration priority: command line → environment → TOML file →
//! built-in defaults (see `geocheck_common::config`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geocheck_common::config::{
    default_config_path, write_toml_config, ConfigResolver, LoggingConfig, TomlConfig,
};
use geocheck_common::logging::init_tracing;
use geocheck_enrich::services::ProgressCallback;
use geocheck_enrich::{detect_columns, ColumnMapping, EnrichmentPipeline, LogicalField, Table};
use tracing::{debug, info};

/// Command-line arguments for geocheck
#[derive(Parser, Debug)]
#[command(name = "geocheck")]
#[command(about = "Validate and enrich building data against the federal building register")]
#[command(version)]
struct Args {
    /// Config file (overrides GEOCHECK_CONFIG and the default location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich a CSV table with registry data and write findings
    Enrich {
        /// Input CSV with a header row
        input: PathBuf,

        /// Enriched CSV output (default: <input>_enriched.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON report with findings and summary
        #[arg(short, long)]
        findings: Option<PathBuf>,

        /// Column mapping entry, e.g. `--map postal_code=Postleitzahl`
        #[arg(short, long = "map", value_parser = parse_mapping_entry)]
        mappings: Vec<(LogicalField, String)>,

        /// Maximum simultaneous registry requests
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Look identifiers up one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Show the auto-detected column mapping for a CSV table
    Detect {
        /// Input CSV with a header row
        input: PathBuf,
    },

    /// Write a config file with default settings
    InitConfig {
        /// Target path (default: platform config directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Enrich {
            input,
            output,
            findings,
            mappings,
            max_concurrency,
            sequential,
        } => {
            let mut config = ConfigResolver::new(args.config)
                .resolve()
                .context("Failed to resolve configuration")?;
            if let Some(max) = max_concurrency {
                config.lookup.max_concurrency = max;
            }
            if sequential {
                config.lookup.sequential = true;
            }
            config.validate()?;
            init_tracing(&config.logging)?;
            log_startup();

            let mapping =
                ColumnMapping::from_entries(mappings).context("Invalid --map entries")?;
            let output = output.unwrap_or_else(|| default_output_path(&input));
            enrich(&config, &input, &output, findings.as_deref(), mapping)
        }
        Command::Detect { input } => {
            init_tracing(&LoggingConfig::default())?;
            detect(&input)
        }
        Command::InitConfig { path, force } => {
            init_tracing(&LoggingConfig::default())?;
            init_config(path, force)
        }
    }
}

fn log_startup() {
    info!(
        "Starting geocheck v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GEOCHECK_GIT_HASH"),
        env!("GEOCHECK_BUILD_TIMESTAMP"),
        env!("GEOCHECK_BUILD_PROFILE")
    );
}

fn enrich(
    config: &TomlConfig,
    input: &Path,
    output: &Path,
    findings_path: Option<&Path>,
    mapping: ColumnMapping,
) -> Result<()> {
    let table = Table::read_csv(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    info!(rows = table.len(), input = %input.display(), "Table loaded");

    let pipeline = EnrichmentPipeline::from_config(config)?;
    let progress: ProgressCallback = Arc::new(|done: usize, total: usize, egid: Option<&str>| {
        if done % 10 == 0 || done == total {
            info!(progress = format!("{}/{}", done, total), "Lookup progress");
        } else {
            debug!(done, total, egid = ?egid, "Lookup completed");
        }
    });

    let mapping = (!mapping.is_empty()).then_some(mapping);
    let report = pipeline.run(table, mapping, Some(progress))?;

    for warning in &report.setup_warnings {
        println!("warning: {}", warning);
    }

    report
        .table
        .write_csv(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(output = %output.display(), "Enriched table written");

    if let Some(path) = findings_path {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(findings = %path.display(), "Findings report written");
    }

    let summary = &report.summary;
    println!("Rows:       {}", summary.total_rows);
    println!(
        "Labels:     {} match, {} partial, {} mismatch, {} not found",
        summary.match_count, summary.partial_count, summary.mismatch_count, summary.not_found_count
    );
    println!(
        "Findings:   {} errors, {} warnings, {} info",
        summary.error_count, summary.warning_count, summary.info_count
    );
    match summary.success_rate() {
        Some(rate) => println!("Passed:     {} ({:.1}%)", summary.passed_rows, rate),
        None => println!("Passed:     0 (empty table)"),
    }
    println!("Output:     {}", output.display());

    Ok(())
}

fn detect(input: &Path) -> Result<()> {
    let table = Table::read_csv(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (mapping, warnings) = detect_columns(table.columns());

    for (field, column) in mapping.iter() {
        println!("{:<14} -> {}", field.key(), column);
    }
    for warning in &warnings {
        println!("warning: {}", warning);
    }
    if mapping.identifier().is_none() {
        bail!("No identifier column found; pass --map egid=<column> to enrich");
    }
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path.or_else(default_config_path) {
        Some(path) => path,
        None => bail!("No platform config directory; pass a target path"),
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    write_toml_config(&TomlConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// `<dir>/<stem>_enriched.csv` next to the input
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}_enriched.csv", stem))
}

/// Parse `logical=column`
fn parse_mapping_entry(raw: &str) -> std::result::Result<(LogicalField, String), String> {
    let (key, column) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected logical=column, got '{}'", raw))?;
    let field = LogicalField::from_key(key).ok_or_else(|| {
        let known: Vec<&str> = LogicalField::ALL.iter().map(|f| f.key()).collect();
        format!("unknown field '{}' (known: {})", key.trim(), known.join(", "))
    })?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("empty column name for '{}'", field));
    }
    Ok((field, column.to_string()))
}
