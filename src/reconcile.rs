//! End-to-end reconciliation runs.
//!
//! A [`ReconcileRequest`] is the fully resolved description of one job: which
//! sources, which analyses, how to key them, and where the report goes. It is
//! validated once; after that the loader, key resolver, comparison engine, and
//! report writer run in sequence and the caller gets a [`RunSummary`] back.
//! Automatically detected keys are re-paired across the two sources when
//! either one is weak.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use log::{error, info};
use serde::Serialize;

use crate::{
    compare::{Analysis, Category, ComparisonEngine, Diagnostic, PrecisionStats, Side},
    config::ReconcileConfig,
    error::{ReconcileError, Result},
    keys::{self, KeyResolution, KeyStrategy},
    loader::{self, LoadOptions, LoadReport, LoadedSource, SheetSelector},
    report::{ReportOutcome, ReportSink, ReportSpec, ReportWriter, Scope},
    resources,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub sheet: SheetSelector,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sheet: SheetSelector::default(),
        }
    }

    pub fn with_sheet(mut self, sheet: SheetSelector) -> Self {
        self.sheet = sheet;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// The first source is the baseline; every other source is compared to it.
    pub sources: Vec<SourceSpec>,
    pub analyses: Vec<Analysis>,
    pub key: KeyStrategy,
    pub scope: Scope,
    /// Explicit report file. Relative paths are placed under `output_dir`.
    pub output: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub chunk_rows: Option<usize>,
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
}

impl ReconcileRequest {
    pub fn new(sources: Vec<SourceSpec>, analyses: Vec<Analysis>) -> Self {
        Self {
            sources,
            analyses,
            key: KeyStrategy::Auto,
            scope: Scope::default(),
            output: None,
            output_dir: None,
            chunk_rows: None,
            delimiter: None,
            encoding: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.len() < 2 {
            return Err(ReconcileError::InvalidRequest(format!(
                "at least two sources are required (got {})",
                self.sources.len()
            )));
        }
        if self.analyses.is_empty() {
            return Err(ReconcileError::InvalidRequest(
                "select at least one analysis".to_string(),
            ));
        }
        for source in &self.sources {
            if !source.path.is_file() {
                return Err(ReconcileError::InvalidRequest(format!(
                    "source {:?} does not exist or is not a file",
                    source.path
                )));
            }
        }
        if self.chunk_rows == Some(0) {
            return Err(ReconcileError::InvalidRequest(
                "chunk size must be positive".to_string(),
            ));
        }
        if let Some(dir) = &self.output_dir
            && !dir.is_dir()
        {
            return Err(ReconcileError::InvalidRequest(format!(
                "output directory {dir:?} does not exist"
            )));
        }
        if let KeyStrategy::Composite(columns) = &self.key
            && columns.is_empty()
        {
            return Err(ReconcileError::InvalidRequest(
                "a composite key needs at least one column".to_string(),
            ));
        }
        Ok(())
    }

    fn report_spec(&self) -> ReportSpec {
        ReportSpec {
            analyses: self.analyses.clone(),
            scope: self.scope,
        }
    }

    fn load_options(&self, source: &SourceSpec) -> LoadOptions {
        LoadOptions {
            sheet: source.sheet.clone(),
            chunk_rows: self.chunk_rows,
            delimiter: self.delimiter,
            encoding: self.encoding.clone(),
        }
    }

    /// Report path for the pair (`baseline`, `other`). Pairs beyond the first
    /// get the compared file's stem appended so reports do not overwrite each
    /// other.
    fn output_path(&self, other: &Path, many: bool) -> PathBuf {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let base = match &self.output {
            Some(path) if path.is_absolute() || self.output_dir.is_none() => path.clone(),
            Some(path) => dir.join(path),
            None => dir.join(self.report_spec().default_file_name()),
        };
        if !many {
            return base;
        }
        let stem = base
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "REPORT".to_string());
        let other_stem = other
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        base.with_file_name(format!("{stem}_{other_stem}.xlsx"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub path: PathBuf,
    pub origin: String,
    pub rows: usize,
    pub columns: usize,
    pub key: KeyResolution,
    pub load: LoadReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub a: usize,
    pub b: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub a: SourceSummary,
    pub b: SourceSummary,
    pub analyses: Vec<Analysis>,
    pub counts: Vec<CategoryCount>,
    pub precision: PrecisionStats,
    pub diagnostics: Vec<Diagnostic>,
    pub report: ReportOutcome,
}

impl RunSummary {
    pub fn count(&self, category: Category) -> Option<&CategoryCount> {
        self.counts.iter().find(|count| count.category == category)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| ReconcileError::FatalIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|err| {
            ReconcileError::FatalIo {
                path: path.to_path_buf(),
                source: err.into(),
            }
        })
    }

    fn log(&self) {
        let stats = &self.precision;
        info!(
            "{} vs {}: {} common key(s); {:.2}% of {} missing from {}, {:.2}% of {} missing from {}",
            self.a.origin,
            self.b.origin,
            stats.common,
            stats.percent_missing_in_b,
            self.a.origin,
            self.b.origin,
            stats.percent_missing_in_a,
            self.b.origin,
            self.a.origin
        );
        for count in &self.counts {
            info!("{:?}: {} / {}", count.category, count.a, count.b);
        }
        for diagnostic in &self.diagnostics {
            info!("CRITICAL {:?}: {}", diagnostic.category, diagnostic.observation);
        }
    }
}

/// Outcome of one baseline/other pair in a multi-source run.
#[derive(Debug)]
pub struct PairOutcome {
    pub baseline: PathBuf,
    pub other: PathBuf,
    pub result: Result<RunSummary>,
}

pub struct Reconciler<'a> {
    config: &'a ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ReconcileConfig) -> Self {
        Self { config }
    }

    /// Runs a two-source request. Requests naming more sources compare only
    /// the first two; use [`Reconciler::run_many`] for baseline-vs-each runs.
    pub fn run(&self, request: &ReconcileRequest, sink: &mut dyn ReportSink) -> Result<RunSummary> {
        request.validate()?;
        let output = request.output_path(&request.sources[1].path, false);
        self.run_pair(request, &request.sources[0], &request.sources[1], &output, sink)
    }

    /// Compares the first source against every other source in turn, one
    /// report per pair. A failing pair does not stop the remaining ones.
    pub fn run_many(
        &self,
        request: &ReconcileRequest,
        sink: &mut dyn ReportSink,
    ) -> Result<Vec<PairOutcome>> {
        request.validate()?;
        let baseline = &request.sources[0];
        let many = request.sources.len() > 2;
        let total = request.sources.len() - 1;
        let mut outcomes = Vec::with_capacity(total);
        for (idx, other) in request.sources.iter().skip(1).enumerate() {
            info!(
                "Pair {}/{total}: {:?} vs {:?}",
                idx + 1,
                baseline.path,
                other.path
            );
            let output = request.output_path(&other.path, many);
            let result = self.run_pair(request, baseline, other, &output, sink);
            if let Err(err) = &result {
                error!("{:?} vs {:?} failed: {err}", baseline.path, other.path);
            }
            outcomes.push(PairOutcome {
                baseline: baseline.path.clone(),
                other: other.path.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    fn load_keyed(
        &self,
        request: &ReconcileRequest,
        source: &SourceSpec,
    ) -> Result<(LoadedSource, KeyResolution)> {
        let mut loaded = loader::load_source(
            &source.path,
            &request.load_options(source),
            &self.config.ingest,
        )?;
        let key = keys::attach_key(&mut loaded.dataset, &request.key, &self.config.keys)?;
        resources::check_memory(&loaded.dataset, loaded.report.plan.available_memory);
        Ok((loaded, key))
    }

    fn run_pair(
        &self,
        request: &ReconcileRequest,
        a: &SourceSpec,
        b: &SourceSpec,
        output: &Path,
        sink: &mut dyn ReportSink,
    ) -> Result<RunSummary> {
        let (mut loaded_a, mut key_a) = self.load_keyed(request, a)?;
        let (mut loaded_b, mut key_b) = self.load_keyed(request, b)?;
        if request.key == KeyStrategy::Auto
            && let Some((paired_a, paired_b)) =
                keys::pair_keys(&mut loaded_a.dataset, &mut loaded_b.dataset, &self.config.keys)
        {
            key_a = paired_a;
            key_b = paired_b;
        }
        let (dataset_a, dataset_b) = (&loaded_a.dataset, &loaded_b.dataset);

        let engine = ComparisonEngine::new(&self.config.compare);
        let comparison = engine.compare(dataset_a, dataset_b, &request.analyses);
        let writer = ReportWriter::new(&self.config.report);
        let report = writer.write(
            &comparison,
            dataset_a,
            dataset_b,
            &request.report_spec(),
            output,
            sink,
        )?;

        let counts = comparison
            .results
            .iter()
            .map(|result| CategoryCount {
                category: result.category,
                a: result.rows_for(Side::A).len(),
                b: result.rows_for(Side::B).len(),
            })
            .collect();
        let summary = RunSummary {
            a: source_summary(a, loaded_a, key_a),
            b: source_summary(b, loaded_b, key_b),
            analyses: comparison.analyses.clone(),
            counts,
            precision: comparison.precision.clone(),
            diagnostics: comparison.diagnostics.clone(),
            report,
        };
        summary.log();
        Ok(summary)
    }
}

fn source_summary(spec: &SourceSpec, loaded: LoadedSource, key: KeyResolution) -> SourceSummary {
    SourceSummary {
        path: spec.path.clone(),
        origin: loaded.dataset.origin().to_string(),
        rows: loaded.dataset.len(),
        columns: loaded.dataset.columns().len(),
        key,
        load: loaded.report,
    }
}
