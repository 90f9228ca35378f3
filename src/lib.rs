pub mod cli;
pub mod compare;
pub mod config;
pub mod dataset;
pub mod error;
pub mod header;
pub mod io_utils;
pub mod keys;
pub mod loader;
pub mod normalize;
pub mod reconcile;
pub mod report;
pub mod resources;

use std::{env, fs::File, io::BufWriter, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::ReconcileConfig,
    loader::LoadOptions,
    reconcile::{ReconcileRequest, Reconciler, RunSummary, SourceSpec},
    report::FsSink,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compare(args) => handle_compare(&args),
        Commands::CompareMany(args) => handle_compare_many(&args),
        Commands::Inspect(args) => handle_inspect(&args),
        Commands::Config(args) => handle_config(&args),
    }
}

fn load_config(path: Option<&Path>) -> Result<ReconcileConfig> {
    match path {
        Some(path) => {
            let config = ReconcileConfig::load(path)
                .with_context(|| format!("Loading configuration from {path:?}"))?;
            debug!("Configuration loaded from {path:?}");
            Ok(config)
        }
        None => Ok(ReconcileConfig::default()),
    }
}

fn build_request(sources: Vec<SourceSpec>, run: &cli::RunArgs) -> ReconcileRequest {
    let mut request = ReconcileRequest::new(
        sources,
        run.analyses.iter().map(|analysis| (*analysis).into()).collect(),
    );
    request.key = run.key.strategy();
    request.scope = run.scope.into();
    request.output = run.output.clone();
    request.output_dir = run.output_dir.clone();
    request.chunk_rows = run.input.chunk_rows;
    request.delimiter = run.input.delimiter;
    request.encoding = run.input.input_encoding.clone();
    request
}

fn handle_compare(args: &cli::CompareArgs) -> Result<()> {
    let config = load_config(args.run.input.config.as_deref())?;
    let request = build_request(
        vec![
            SourceSpec::new(&args.source_a).with_sheet(args.sheet_a.clone()),
            SourceSpec::new(&args.source_b).with_sheet(args.sheet_b.clone()),
        ],
        &args.run,
    );
    info!(
        "Comparing {:?} against {:?} ({})",
        args.source_a,
        args.source_b,
        analysis_list(&request)
    );
    let summary = Reconciler::new(&config)
        .run(&request, &mut FsSink)
        .with_context(|| format!("Comparing {:?} with {:?}", args.source_a, args.source_b))?;
    report_written(&summary);
    if let Some(path) = &args.run.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("Writing run summary to {path:?}"))?;
        info!("Run summary written to {path:?}");
    }
    Ok(())
}

fn handle_compare_many(args: &cli::CompareManyArgs) -> Result<()> {
    let config = load_config(args.run.input.config.as_deref())?;
    let sources = args
        .inputs
        .iter()
        .map(|path| SourceSpec::new(path).with_sheet(args.sheet.clone()))
        .collect();
    let request = build_request(sources, &args.run);
    info!(
        "Comparing {:?} against {} other source(s) ({})",
        args.inputs.first(),
        args.inputs.len().saturating_sub(1),
        analysis_list(&request)
    );
    let outcomes = Reconciler::new(&config)
        .run_many(&request, &mut FsSink)
        .context("Running multi-source comparison")?;

    let mut summaries = Vec::new();
    let mut failed = Vec::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => {
                report_written(summary);
                summaries.push(summary);
            }
            Err(err) => failed.push(format!("{:?}: {err}", outcome.other)),
        }
    }
    if let Some(path) = &args.run.summary_json {
        let file =
            File::create(path).with_context(|| format!("Creating run summary {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summaries)
            .with_context(|| format!("Writing run summary to {path:?}"))?;
        info!("Run summary for {} pair(s) written to {path:?}", summaries.len());
    }
    if !failed.is_empty() {
        bail!(
            "{} of {} comparison(s) failed:\n  {}",
            failed.len(),
            outcomes.len(),
            failed.join("\n  ")
        );
    }
    Ok(())
}

fn handle_inspect(args: &cli::InspectArgs) -> Result<()> {
    let config = load_config(args.input_args.config.as_deref())?;
    if args.input_args.chunk_rows == Some(0) {
        bail!("chunk size must be positive");
    }
    let options = LoadOptions {
        sheet: args.sheet.clone(),
        chunk_rows: args.input_args.chunk_rows,
        delimiter: args.input_args.delimiter,
        encoding: args.input_args.input_encoding.clone(),
    };
    let mut loaded = loader::load_source(&args.input, &options, &config.ingest)
        .with_context(|| format!("Loading {:?}", args.input))?;
    let report = &loaded.report;
    if let Some(delimiter) = report.delimiter {
        info!("Delimiter: '{}'", printable_delimiter(delimiter as u8));
    }
    for sheet in &report.sheets {
        info!(
            "Header at row {} of {}: {} data row(s)",
            sheet.header_row + 1,
            sheet.sheet.as_deref().unwrap_or("text source"),
            sheet.rows
        );
    }
    for skipped in &report.skipped_sheets {
        info!("Skipped sheet '{skipped}' (no header row)");
    }
    if !report.chunk_sizes.is_empty() {
        info!("Read in {} chunk(s): {:?}", report.chunk_sizes.len(), report.chunk_sizes);
    }

    let dataset = &loaded.dataset;
    for (idx, name) in dataset.columns().iter().enumerate() {
        let stats = dataset.column_stats(idx);
        info!(
            "  {:>3}. {name}: {} non-null, {} distinct ({:.1}% unique)",
            idx + 1,
            stats.non_null,
            stats.distinct,
            stats.uniqueness() * 100.0
        );
    }
    if !report.categorical_columns.is_empty() {
        info!(
            "Shared-string columns: {}",
            report.categorical_columns.join(", ")
        );
    }
    let estimated = resources::check_memory(dataset, report.plan.available_memory);
    info!(
        "Estimated in-memory size: {:.2} MB",
        estimated as f64 / (1024.0 * 1024.0)
    );

    match keys::attach_key(&mut loaded.dataset, &args.key.strategy(), &config.keys) {
        Ok(resolution) => info!(
            "Key: {} via {:?} ({:.1}% unique)",
            resolution.columns.join(" + "),
            resolution.method,
            resolution.uniqueness * 100.0
        ),
        Err(err) => warn!("No key resolved: {err}"),
    }
    Ok(())
}

fn handle_config(args: &cli::ConfigArgs) -> Result<()> {
    ReconcileConfig::default()
        .save(&args.output)
        .with_context(|| format!("Writing default configuration to {:?}", args.output))?;
    info!("Default configuration written to {:?}", args.output);
    Ok(())
}

fn analysis_list(request: &ReconcileRequest) -> String {
    request
        .analyses
        .iter()
        .map(|analysis| analysis.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn report_written(summary: &RunSummary) {
    let report = &summary.report;
    if report.substituted {
        warn!(
            "{:?} was locked; report saved as {:?} instead",
            report.requested, report.path
        );
    }
    info!(
        "Report with {} sheet(s) written to {:?}",
        report.sheets.len(),
        report.path
    );
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
