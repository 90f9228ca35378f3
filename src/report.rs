//! Workbook assembly and lock-resistant persistence.
//!
//! The writer turns a [`Comparison`] into one sheet per requested category and
//! scope, styles it, and serializes the workbook in memory. Persisting goes
//! through a [`ReportSink`]: the filesystem sink writes a sibling temporary file
//! and renames it into place, so a failed save never leaves a partial report.
//! When the target is locked (typically open in a spreadsheet application) the
//! writer retries under a timestamped alternate name and reports the
//! substitution instead of failing.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Local;
use log::{debug, info, warn};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use serde::Serialize;

use crate::{
    compare::{Analysis, Category, Comparison, NullityEntry, RowRef, Side},
    config::ReportConfig,
    dataset::{Dataset, Value},
    error::{ReconcileError, Result},
    normalize::{self, KeyForm},
    resources,
};

/// Rows per sheet supported by the xlsx format.
pub const SHEET_ROW_LIMIT: usize = 1_048_576;
const SHEET_NAME_LIMIT: usize = 31;
const HEADER_FILL: u32 = 0x366092;
const NULL_FILL: u32 = 0xFF0000;
const SOURCE_COLUMN: &str = "Source";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Consolidated,
    PerSource,
    #[default]
    Both,
}

impl Scope {
    fn consolidated(&self) -> bool {
        matches!(self, Scope::Consolidated | Scope::Both)
    }

    fn per_source(&self) -> bool {
        matches!(self, Scope::PerSource | Scope::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSpec {
    pub analyses: Vec<Analysis>,
    pub scope: Scope,
}

impl ReportSpec {
    /// `REPORT_<CATEGORY>.xlsx` for a single analysis, otherwise
    /// `REPORT_FULL_COMPARISON.xlsx`.
    pub fn default_file_name(&self) -> String {
        match self.analyses.as_slice() {
            [single] => format!("REPORT_{}.xlsx", single.as_str().to_uppercase()),
            _ => "REPORT_FULL_COMPARISON.xlsx".to_string(),
        }
    }
}

/// Where a serialized workbook ends up. Implementations must either write the
/// whole buffer to `target` or leave `target` untouched.
pub trait ReportSink {
    fn persist(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsSink;

impl ReportSink for FsSink {
    fn persist(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.xlsx".to_string());
        let temp = target.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
        if let Err(err) = fs::write(&temp, bytes) {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        if let Err(err) = fs::rename(&temp, target) {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub requested: PathBuf,
    pub path: PathBuf,
    pub substituted: bool,
    pub sheets: Vec<SheetSummary>,
    pub bytes: usize,
}

/// Windows `ERROR_SHARING_VIOLATION` and `ERROR_LOCK_VIOLATION`.
const SHARING_VIOLATION_CODES: [i32; 2] = [32, 33];

/// True for errors that mean "someone else holds the file".
pub fn is_lock_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
        || (cfg!(windows)
            && err
                .raw_os_error()
                .is_some_and(|code| SHARING_VIOLATION_CODES.contains(&code)))
}

/// `stem_YYYYMMDD_HHMMSS[_n].ext` next to `target`, never one of `tried`.
pub fn alternate_path(target: &Path, tried: &[PathBuf]) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let extension = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut candidate = target.with_file_name(format!("{stem}_{stamp}{extension}"));
    let mut counter = 1usize;
    while tried.contains(&candidate) || candidate.exists() {
        candidate = target.with_file_name(format!("{stem}_{stamp}_{counter}{extension}"));
        counter += 1;
    }
    candidate
}

/// Persists `bytes` at `target`, moving to alternate names while the target
/// is locked. Returns the path actually written. Once `max_attempts` names
/// have all been refused the last refusal is returned as `FatalIo`.
pub fn persist_with_fallback(
    sink: &mut dyn ReportSink,
    target: &Path,
    bytes: &[u8],
    max_attempts: usize,
) -> Result<PathBuf> {
    let attempts = max_attempts.max(1);
    let mut tried = Vec::with_capacity(attempts);
    let mut candidate = target.to_path_buf();
    let mut attempt = 1;
    loop {
        match sink.persist(&candidate, bytes) {
            Ok(()) => return Ok(candidate),
            Err(source) if is_lock_error(&source) && attempt < attempts => {
                warn!("{candidate:?} is locked or not writable (attempt {attempt}): {source}");
                tried.push(candidate);
                candidate = alternate_path(target, &tried);
                attempt += 1;
                info!("Retrying as {candidate:?}");
            }
            Err(source) => {
                if is_lock_error(&source) {
                    warn!("Giving up after {attempts} locked save attempt(s)");
                }
                return Err(ReconcileError::FatalIo {
                    path: candidate,
                    source,
                });
            }
        }
    }
}

/// Removes characters the format forbids, trims to 31 characters, and makes
/// the name unique (case-insensitively) among `taken`.
pub fn sanitize_sheet_name(raw: &str, taken: &HashSet<String>) -> String {
    let cleaned = raw
        .chars()
        .filter(|ch| !matches!(ch, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .collect::<String>();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let base = if cleaned.is_empty() { "Sheet" } else { cleaned };

    let mut candidate = truncate_chars(base, SHEET_NAME_LIMIT);
    let mut counter = 2usize;
    while taken.contains(&candidate.to_lowercase()) {
        let suffix = format!(" ({counter})");
        let room = SHEET_NAME_LIMIT - suffix.chars().count();
        candidate = format!("{}{suffix}", truncate_chars(base, room).trim_end());
        counter += 1;
    }
    candidate
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

enum SheetBody {
    Records { side: Option<Side>, rows: Vec<RowRef> },
    Nullity(Vec<NullityEntry>),
}

struct SheetPlan {
    name: String,
    title: String,
    body: SheetBody,
}

impl SheetPlan {
    fn rows(&self) -> usize {
        match &self.body {
            SheetBody::Records { rows, .. } => rows.len(),
            SheetBody::Nullity(entries) => entries.len(),
        }
    }
}

/// Every sheet carries a title row and a header row above its records.
fn check_row_limits(plans: &[SheetPlan], limit: usize) -> Result<()> {
    for plan in plans {
        let needed = plan.rows() + 2;
        if needed > limit {
            return Err(ReconcileError::SheetRowLimit {
                sheet: plan.name.clone(),
                rows: needed,
                limit,
            });
        }
    }
    Ok(())
}

struct Formats {
    title: Format,
    header: Format,
    cell: Format,
    null: Format,
}

impl Formats {
    fn new() -> Self {
        let header = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(HEADER_FILL))
            .set_border(FormatBorder::Thin)
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter)
            .set_text_wrap();
        Self {
            title: header.clone().set_font_size(14),
            header,
            cell: Format::new()
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            null: Format::new()
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center)
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(NULL_FILL)),
        }
    }
}

/// Output columns of a records sheet and, per side, where each one comes from.
struct ColumnLayout {
    headers: Vec<String>,
    sources: [Vec<Option<usize>>; 2],
    check_digit: [Vec<bool>; 2],
    with_source: bool,
}

pub struct ReportWriter<'a> {
    config: &'a ReportConfig,
}

impl<'a> ReportWriter<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    /// Builds the workbook and persists it through `sink`.
    pub fn write(
        &self,
        comparison: &Comparison,
        a: &Dataset,
        b: &Dataset,
        spec: &ReportSpec,
        target: &Path,
        sink: &mut dyn ReportSink,
    ) -> Result<ReportOutcome> {
        let plans = self.plan_sheets(comparison, a, b, spec);
        if plans.is_empty() {
            return Err(ReconcileError::EmptyResult);
        }
        check_row_limits(&plans, SHEET_ROW_LIMIT)?;

        let total_rows = plans.iter().map(SheetPlan::rows).sum::<usize>();
        let large = total_rows > self.config.large_report_rows;
        if large {
            let width = a.columns().len().max(b.columns().len()) + 1;
            info!(
                "Writing a large report: {total_rows} row(s) across {} sheet(s), ~{:.1} MB",
                plans.len(),
                resources::estimate_output_bytes(total_rows, width) as f64 / (1024.0 * 1024.0)
            );
        }

        let formats = Formats::new();
        let mut workbook = Workbook::new();
        let mut sheets = Vec::with_capacity(plans.len() + 1);
        for plan in &plans {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&plan.name)?;
            match &plan.body {
                SheetBody::Records { side, rows } => {
                    let layout = self.layout(a, b, *side);
                    self.write_records(worksheet, &plan.title, &layout, rows, a, b, &formats)?;
                }
                SheetBody::Nullity(entries) => {
                    self.write_nullity(worksheet, &plan.title, entries, a, b, &formats)?;
                }
            }
            if large {
                info!("Sheet '{}' written ({} row(s))", plan.name, plan.rows());
            } else {
                debug!("Sheet '{}' written ({} row(s))", plan.name, plan.rows());
            }
            sheets.push(SheetSummary {
                name: plan.name.clone(),
                rows: plan.rows(),
            });
        }

        if self.config.include_summary_sheet {
            let taken = plans
                .iter()
                .map(|plan| plan.name.to_lowercase())
                .collect::<HashSet<_>>();
            let name = sanitize_sheet_name("Summary", &taken);
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&name)?;
            let rows = self.write_summary(worksheet, comparison, a, b, &formats)?;
            sheets.push(SheetSummary { name, rows });
        }

        let bytes = workbook.save_to_buffer()?;
        let path = persist_with_fallback(sink, target, &bytes, self.config.max_save_attempts)?;
        let substituted = path != target;
        if substituted {
            warn!("Report saved as {path:?} because {target:?} was locked");
        }
        info!(
            "Report written to {path:?} ({} sheet(s), {:.2} MB)",
            sheets.len(),
            bytes.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(ReportOutcome {
            requested: target.to_path_buf(),
            path,
            substituted,
            sheets,
            bytes: bytes.len(),
        })
    }

    fn plan_sheets(
        &self,
        comparison: &Comparison,
        a: &Dataset,
        b: &Dataset,
        spec: &ReportSpec,
    ) -> Vec<SheetPlan> {
        let (name_a, name_b) = (a.origin(), b.origin());
        let mut taken = HashSet::new();
        let mut plans = Vec::new();
        let mut push = |raw_name: String, title: String, body: SheetBody| {
            let empty = match &body {
                SheetBody::Records { rows, .. } => rows.is_empty(),
                SheetBody::Nullity(entries) => entries.is_empty(),
            };
            if empty {
                debug!("Skipping empty sheet '{raw_name}'");
                return;
            }
            let name = sanitize_sheet_name(&raw_name, &taken);
            taken.insert(name.to_lowercase());
            plans.push(SheetPlan { name, title, body });
        };

        for analysis in &spec.analyses {
            if !comparison.analyses.contains(analysis) {
                continue;
            }
            match analysis {
                Analysis::Missing => {
                    let in_b = comparison.result(Category::MissingInB);
                    let in_a = comparison.result(Category::MissingInA);
                    if spec.scope.consolidated() {
                        let rows = in_b
                            .into_iter()
                            .chain(in_a)
                            .flat_map(|result| result.consolidated.iter().copied())
                            .collect();
                        push(
                            "Differences summary".to_string(),
                            "All records with differences".to_string(),
                            SheetBody::Records { side: None, rows },
                        );
                    }
                    if spec.scope.per_source() {
                        if let Some(result) = in_b {
                            push(
                                format!("Missing in {name_b}"),
                                format!("In {name_a} but not in {name_b}"),
                                SheetBody::Records {
                                    side: Some(Side::A),
                                    rows: result.consolidated.clone(),
                                },
                            );
                        }
                        if let Some(result) = in_a {
                            push(
                                format!("Missing in {name_a}"),
                                format!("In {name_b} but not in {name_a}"),
                                SheetBody::Records {
                                    side: Some(Side::B),
                                    rows: result.consolidated.clone(),
                                },
                            );
                        }
                    }
                }
                Analysis::Duplicates | Analysis::Incomplete => {
                    let (category, noun) = if *analysis == Analysis::Duplicates {
                        (Category::Duplicate, "Duplicates")
                    } else {
                        (Category::Incomplete, "Incomplete")
                    };
                    let Some(result) = comparison.result(category) else {
                        continue;
                    };
                    if spec.scope.consolidated() {
                        push(
                            format!("All {}", noun.to_lowercase()),
                            format!("All {} records", noun.to_lowercase()),
                            SheetBody::Records {
                                side: None,
                                rows: result.consolidated.clone(),
                            },
                        );
                    }
                    if spec.scope.per_source() {
                        for (side, origin) in [(Side::A, name_a), (Side::B, name_b)] {
                            let rows = result
                                .consolidated
                                .iter()
                                .copied()
                                .filter(|entry| entry.side == side)
                                .collect();
                            push(
                                format!("{noun} in {origin}"),
                                format!("{noun} in {origin}"),
                                SheetBody::Records {
                                    side: Some(side),
                                    rows,
                                },
                            );
                        }
                    }
                    if category == Category::Incomplete {
                        push(
                            "Missing fields".to_string(),
                            "Missing fields per record".to_string(),
                            SheetBody::Nullity(comparison.nullity_ranking.clone()),
                        );
                    }
                }
            }
        }
        plans
    }

    fn layout(&self, a: &Dataset, b: &Dataset, side: Option<Side>) -> ColumnLayout {
        let headers = match side {
            Some(Side::A) => a.columns().to_vec(),
            Some(Side::B) => b.columns().to_vec(),
            None => {
                let mut headers = a.columns().to_vec();
                for column in b.columns() {
                    if !headers.contains(column) {
                        headers.push(column.clone());
                    }
                }
                headers
            }
        };
        let map = |dataset: &Dataset| -> (Vec<Option<usize>>, Vec<bool>) {
            headers
                .iter()
                .map(|header| {
                    let idx = dataset.columns().iter().position(|column| column == header);
                    let check = idx.is_some_and(|idx| self.is_check_digit_column(dataset, idx));
                    (idx, check)
                })
                .unzip()
        };
        let (sources_a, check_a) = map(a);
        let (sources_b, check_b) = map(b);
        ColumnLayout {
            headers,
            sources: [sources_a, sources_b],
            check_digit: [check_a, check_b],
            with_source: side.is_none(),
        }
    }

    /// Split number and check-digit columns are written as they are.
    fn is_check_digit_column(&self, dataset: &Dataset, column: usize) -> bool {
        let split = dataset.key_form() == KeyForm::CheckDigitId && dataset.key_columns().len() > 1;
        !split && dataset.is_key_column(column) && {
            let name = dataset.columns()[column].trim();
            self.config
                .check_digit_columns
                .iter()
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(name))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_records(
        &self,
        worksheet: &mut Worksheet,
        title: &str,
        layout: &ColumnLayout,
        rows: &[RowRef],
        a: &Dataset,
        b: &Dataset,
        formats: &Formats,
    ) -> Result<()> {
        let mut headers = Vec::with_capacity(layout.headers.len() + 1);
        if layout.with_source {
            headers.push(SOURCE_COLUMN.to_string());
        }
        headers.extend(layout.headers.iter().cloned());
        let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
        self.write_title_and_headers(worksheet, title, &headers, formats)?;

        let offset = usize::from(layout.with_source);
        for (idx, entry) in rows.iter().enumerate() {
            let excel_row = (idx + 2) as u32;
            let (dataset, side_idx) = match entry.side {
                Side::A => (a, 0),
                Side::B => (b, 1),
            };
            if layout.with_source {
                let origin = dataset.origin();
                worksheet.write_string_with_format(excel_row, 0, origin, &formats.cell)?;
                widths[0] = widths[0].max(origin.chars().count());
            }
            let record = dataset.record(entry.row);
            for (column, source) in layout.sources[side_idx].iter().enumerate() {
                let value = source.map_or(&Value::Null, |source| record.value(source));
                let excel_col = (column + offset) as u16;
                let written = self.write_value(
                    worksheet,
                    excel_row,
                    excel_col,
                    value,
                    layout.check_digit[side_idx][column],
                    formats,
                )?;
                widths[column + offset] = widths[column + offset].max(written);
            }
        }
        self.apply_widths(worksheet, &widths)
    }

    /// Writes one cell and returns its display width.
    fn write_value(
        &self,
        worksheet: &mut Worksheet,
        row: u32,
        col: u16,
        value: &Value,
        check_digit: bool,
        formats: &Formats,
    ) -> Result<usize> {
        if value.is_null() {
            let placeholder = &self.config.null_placeholder;
            worksheet.write_string_with_format(row, col, placeholder, &formats.null)?;
            return Ok(placeholder.chars().count());
        }
        match value {
            Value::Number(number) if !check_digit => {
                worksheet.write_number_with_format(row, col, *number, &formats.cell)?;
                Ok(value.as_display().chars().count())
            }
            _ => {
                let text = if check_digit {
                    normalize::format_check_digit_id(&value.as_display())
                } else {
                    value.as_display()
                };
                worksheet.write_string_with_format(row, col, &text, &formats.cell)?;
                Ok(text.chars().count())
            }
        }
    }

    fn write_nullity(
        &self,
        worksheet: &mut Worksheet,
        title: &str,
        entries: &[NullityEntry],
        a: &Dataset,
        b: &Dataset,
        formats: &Formats,
    ) -> Result<()> {
        let headers = ["Source", "Key", "Missing fields", "Missing count"]
            .map(str::to_string)
            .to_vec();
        let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
        self.write_title_and_headers(worksheet, title, &headers, formats)?;
        for (idx, entry) in entries.iter().enumerate() {
            let row = (idx + 2) as u32;
            let dataset = match entry.side {
                Side::A => a,
                Side::B => b,
            };
            let record = dataset.record(entry.row);
            let key = record
                .values()
                .iter()
                .enumerate()
                .filter(|(column, _)| dataset.is_key_column(*column))
                .map(|(column, value)| {
                    if self.is_check_digit_column(dataset, column) {
                        normalize::format_check_digit_id(&value.as_display())
                    } else {
                        value.as_display()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            let fields = entry.null_columns.join(", ");
            let cells = [dataset.origin().to_string(), key, fields];
            for (col, text) in cells.iter().enumerate() {
                if text.trim().is_empty() {
                    self.write_value(worksheet, row, col as u16, &Value::Null, false, formats)?;
                } else {
                    worksheet.write_string_with_format(row, col as u16, text, &formats.cell)?;
                }
                widths[col] = widths[col].max(text.chars().count());
            }
            worksheet.write_number_with_format(
                row,
                3,
                entry.null_columns.len() as f64,
                &formats.cell,
            )?;
        }
        self.apply_widths(worksheet, &widths)
    }

    fn write_summary(
        &self,
        worksheet: &mut Worksheet,
        comparison: &Comparison,
        a: &Dataset,
        b: &Dataset,
        formats: &Formats,
    ) -> Result<usize> {
        let stats = &comparison.precision;
        let mut widths = vec![0usize; 6];
        let mut row = 0u32;
        worksheet.merge_range(0, 0, 0, 5, "Comparison summary", &formats.title)?;
        row += 1;

        let mut metrics: Vec<(String, String)> = vec![
            (format!("Rows in {}", a.origin()), stats.rows_a.to_string()),
            (format!("Rows in {}", b.origin()), stats.rows_b.to_string()),
            (
                format!("Key in {}", a.origin()),
                a.key_label().unwrap_or_default(),
            ),
            (
                format!("Key in {}", b.origin()),
                b.key_label().unwrap_or_default(),
            ),
            ("Common keys".to_string(), stats.common.to_string()),
        ];
        if comparison.analyses.contains(&Analysis::Missing) {
            metrics.push((
                format!("Missing in {}", b.origin()),
                format!("{} ({:.2}%)", stats.missing_in_b, stats.percent_missing_in_b),
            ));
            metrics.push((
                format!("Missing in {}", a.origin()),
                format!("{} ({:.2}%)", stats.missing_in_a, stats.percent_missing_in_a),
            ));
        }
        for result in &comparison.results {
            if matches!(result.category, Category::Duplicate | Category::Incomplete) {
                let label = if result.category == Category::Duplicate {
                    "Duplicate rows"
                } else {
                    "Incomplete rows"
                };
                metrics.push((
                    label.to_string(),
                    format!(
                        "{} / {}",
                        result.rows_for(Side::A).len(),
                        result.rows_for(Side::B).len()
                    ),
                ));
            }
        }
        for (label, value) in &metrics {
            worksheet.write_string_with_format(row, 0, label, &formats.header)?;
            worksheet.write_string_with_format(row, 1, value, &formats.cell)?;
            widths[0] = widths[0].max(label.chars().count());
            widths[1] = widths[1].max(value.chars().count());
            row += 1;
        }

        let top = [
            (a.origin(), &comparison.duplicate_keys_a),
            (b.origin(), &comparison.duplicate_keys_b),
        ];
        if top.iter().any(|(_, keys)| !keys.is_empty()) {
            row += 1;
            for (col, header) in ["Source", "Repeated key", "Occurrences"].iter().enumerate() {
                worksheet.write_string_with_format(row, col as u16, *header, &formats.header)?;
            }
            row += 1;
            for (origin, keys) in top {
                for frequency in keys {
                    let key = frequency.key.replace(normalize::COMPOSITE_SEPARATOR, " ");
                    worksheet.write_string_with_format(row, 0, origin, &formats.cell)?;
                    worksheet.write_string_with_format(row, 1, &key, &formats.cell)?;
                    worksheet.write_number_with_format(row, 2, frequency.count as f64, &formats.cell)?;
                    widths[0] = widths[0].max(origin.chars().count());
                    widths[1] = widths[1].max(key.chars().count());
                    row += 1;
                }
            }
        }

        let null_stats = [
            (a.origin(), &comparison.null_columns_a),
            (b.origin(), &comparison.null_columns_b),
        ];
        if null_stats.iter().any(|(_, stats)| !stats.is_empty()) {
            row += 1;
            for (col, header) in ["Source", "Column", "Nulls", "% nulls"].iter().enumerate() {
                worksheet.write_string_with_format(row, col as u16, *header, &formats.header)?;
            }
            row += 1;
            for (origin, stats) in null_stats {
                for stat in stats {
                    worksheet.write_string_with_format(row, 0, origin, &formats.cell)?;
                    worksheet.write_string_with_format(row, 1, &stat.column, &formats.cell)?;
                    worksheet.write_number_with_format(row, 2, stat.nulls as f64, &formats.cell)?;
                    worksheet.write_string_with_format(
                        row,
                        3,
                        format!("{:.2}%", stat.percent),
                        &formats.cell,
                    )?;
                    widths[1] = widths[1].max(stat.column.chars().count());
                    row += 1;
                }
            }
        }

        if !comparison.diagnostics.is_empty() {
            row += 1;
            let headers = ["Priority", "Category", "Source", "Share", "Count", "Observation"];
            for (col, header) in headers.iter().enumerate() {
                worksheet.write_string_with_format(row, col as u16, *header, &formats.header)?;
            }
            row += 1;
            for diagnostic in &comparison.diagnostics {
                let origin = match diagnostic.side {
                    Side::A => a.origin(),
                    Side::B => b.origin(),
                };
                let category = match diagnostic.category {
                    Category::MissingInA | Category::MissingInB => "Missing",
                    Category::Duplicate => "Duplicates",
                    Category::Incomplete => "Incomplete",
                };
                worksheet.write_string_with_format(row, 0, "CRITICAL", &formats.null)?;
                worksheet.write_string_with_format(row, 1, category, &formats.cell)?;
                worksheet.write_string_with_format(row, 2, origin, &formats.cell)?;
                worksheet.write_string_with_format(
                    row,
                    3,
                    format!("{:.1}%", diagnostic.percent),
                    &formats.cell,
                )?;
                worksheet.write_number_with_format(row, 4, diagnostic.count as f64, &formats.cell)?;
                worksheet.write_string_with_format(row, 5, &diagnostic.observation, &formats.cell)?;
                widths[5] = widths[5].max(diagnostic.observation.chars().count());
                row += 1;
            }
        }

        widths[2] = widths[2].max("Occurrences".len());
        widths[3] = widths[3].max("% nulls".len());
        self.apply_widths(worksheet, &widths)?;
        Ok(row as usize)
    }

    fn write_title_and_headers(
        &self,
        worksheet: &mut Worksheet,
        title: &str,
        headers: &[String],
        formats: &Formats,
    ) -> Result<()> {
        let last = headers.len().saturating_sub(1) as u16;
        if last == 0 {
            worksheet.write_string_with_format(0, 0, title, &formats.title)?;
        } else {
            worksheet.merge_range(0, 0, 0, last, title, &formats.title)?;
        }
        for (col, header) in headers.iter().enumerate() {
            worksheet.write_string_with_format(1, col as u16, header, &formats.header)?;
        }
        Ok(())
    }

    fn apply_widths(&self, worksheet: &mut Worksheet, widths: &[usize]) -> Result<()> {
        for (col, width) in widths.iter().enumerate() {
            let width = ((*width + 2) as f64).min(self.config.max_column_width);
            worksheet.set_column_width(col as u16, width)?;
        }
        Ok(())
    }
}
