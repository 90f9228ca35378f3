//! Source ingestion for delimited text and spreadsheet workbooks.
//!
//! A load finds the header row by density, cleans the column names, and appends
//! the data rows in order. Large delimited sources (or any source read with an
//! explicit chunk size) are appended chunk by chunk with periodic progress logs.
//! A final advisory pass re-encodes low-cardinality text columns as shared
//! strings; values are unchanged by it.

use std::{path::Path, str::FromStr};

use calamine::{Data, DataType, Range, Reader, open_workbook_auto};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    config::IngestConfig,
    dataset::{ColumnEncoding, Dataset, Value},
    error::{ReconcileError, Result},
    header, io_utils,
    io_utils::SourceFormat,
    resources::{self, ResourcePlan},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SheetSelector {
    #[default]
    First,
    /// A sheet name, or a 1-based position when no sheet carries that name.
    Named(String),
    All,
}

impl FromStr for SheetSelector {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("sheet selector cannot be empty".to_string());
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "all" => SheetSelector::All,
            "first" => SheetSelector::First,
            _ => SheetSelector::Named(trimmed.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub sheet: SheetSelector,
    /// Forces the chunked path at this many rows per chunk.
    pub chunk_rows: Option<usize>,
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetLoad {
    pub sheet: Option<String>,
    /// Zero-based row index of the detected header within the sheet.
    pub header_row: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub plan: ResourcePlan,
    pub delimiter: Option<char>,
    pub chunk_sizes: Vec<usize>,
    pub sheets: Vec<SheetLoad>,
    pub skipped_sheets: Vec<String>,
    pub categorical_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub dataset: Dataset,
    pub report: LoadReport,
}

pub fn load_source(path: &Path, options: &LoadOptions, config: &IngestConfig) -> Result<LoadedSource> {
    let format = io_utils::detect_format(path)?;
    let plan = ResourcePlan::for_source(path, config)?;
    let origin = origin_label(path);
    plan.log(&origin);

    let chunk_rows = options.chunk_rows.or(plan.recommended_chunk_rows);
    let mut report = LoadReport {
        plan,
        delimiter: None,
        chunk_sizes: Vec::new(),
        sheets: Vec::new(),
        skipped_sheets: Vec::new(),
        categorical_columns: Vec::new(),
    };

    let mut dataset = match format {
        SourceFormat::Delimited => {
            load_delimited(path, &origin, options, chunk_rows, config, &mut report)?
        }
        SourceFormat::Spreadsheet => {
            load_workbook(path, &origin, options, chunk_rows, config, &mut report)?
        }
    };

    report.categorical_columns = optimize_columns(&mut dataset, report.plan.large_source, config);
    info!(
        "Loaded {} row(s) x {} column(s) from {}",
        dataset.len(),
        dataset.columns().len(),
        origin
    );
    Ok(LoadedSource { dataset, report })
}

fn origin_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_delimited(
    path: &Path,
    origin: &str,
    options: &LoadOptions,
    chunk_rows: Option<usize>,
    config: &IngestConfig,
    report: &mut LoadReport,
) -> Result<Dataset> {
    let encoding = io_utils::resolve_encoding(options.encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter)?;
    report.delimiter = Some(delimiter as char);
    debug!(
        "Reading {origin} with delimiter '{}' and encoding {}",
        crate::printable_delimiter(delimiter),
        encoding.name()
    );

    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let mut rows = reader.byte_records().map(|record| {
        let record = record.map_err(|err| ReconcileError::corrupt(path, err))?;
        let fields = io_utils::decode_record(path, &record, encoding)?;
        Ok::<_, ReconcileError>(fields.into_iter().map(Value::from).collect::<Vec<_>>())
    });

    let mut sample = Vec::with_capacity(config.header_sample_rows);
    for row in rows.by_ref().take(config.header_sample_rows) {
        sample.push(row?);
    }
    let header_row =
        header::detect_header_row(&sample, config.header_sample_rows, config.header_density_threshold)
            .ok_or_else(|| ReconcileError::MalformedTable {
                path: path.to_path_buf(),
                sheet: None,
                window: config.header_sample_rows,
            })?;
    debug!("{origin}: header found at row {}", header_row + 1);

    let mut sample = sample.into_iter().skip(header_row);
    let names = sample
        .next()
        .map(|raw| header::clean_column_names(&raw))
        .unwrap_or_default();
    let mut dataset = Dataset::new(origin, names);
    let data_rows = sample.map(Ok).chain(rows);
    report.chunk_sizes = append_rows(&mut dataset, data_rows, chunk_rows, config)?;
    report.sheets.push(SheetLoad {
        sheet: None,
        header_row,
        rows: dataset.len(),
    });
    Ok(dataset)
}

/// Appends `rows` to `dataset`, in chunks when `chunk_rows` is set, and
/// returns the size of every chunk appended.
fn append_rows<I>(
    dataset: &mut Dataset,
    rows: I,
    chunk_rows: Option<usize>,
    config: &IngestConfig,
) -> Result<Vec<usize>>
where
    I: Iterator<Item = Result<Vec<Value>>>,
{
    let every = config.progress_every_rows.max(1);
    let Some(limit) = chunk_rows.map(|rows| rows.max(1)) else {
        for row in rows {
            dataset.push_row(row?);
            if dataset.len() % every == 0 {
                log_progress(dataset);
            }
        }
        return Ok(Vec::new());
    };

    let mut sizes = Vec::new();
    let mut chunk = Vec::with_capacity(limit.min(config.chunk_rows));
    let mut rows = rows.peekable();
    while rows.peek().is_some() {
        chunk.clear();
        for row in rows.by_ref().take(limit) {
            chunk.push(row?);
        }
        let before = dataset.len();
        sizes.push(chunk.len());
        for values in chunk.drain(..) {
            dataset.push_row(values);
        }
        debug!(
            "{}: chunk {} appended, {} row(s) total",
            dataset.origin(),
            sizes.len(),
            dataset.len()
        );
        if dataset.len() / every > before / every {
            log_progress(dataset);
        }
    }
    Ok(sizes)
}

fn log_progress(dataset: &Dataset) {
    info!("{}: {} row(s) read so far", dataset.origin(), dataset.len());
}

fn load_workbook(
    path: &Path,
    origin: &str,
    options: &LoadOptions,
    chunk_rows: Option<usize>,
    config: &IngestConfig,
    report: &mut LoadReport,
) -> Result<Dataset> {
    let mut workbook = open_workbook_auto(path).map_err(|err| ReconcileError::corrupt(path, err))?;
    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(ReconcileError::corrupt(path, "workbook has no sheets"));
    }

    let selected = match &options.sheet {
        SheetSelector::First => vec![sheet_names[0].clone()],
        SheetSelector::All => sheet_names.clone(),
        SheetSelector::Named(name) => vec![resolve_sheet_name(path, &sheet_names, name)?],
    };
    let multi = matches!(options.sheet, SheetSelector::All);
    if multi {
        info!("{origin}: reading {} sheet(s)", selected.len());
    }

    let mut combined: Option<Dataset> = None;
    for sheet in selected {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|err| ReconcileError::corrupt(path, format!("sheet '{sheet}': {err}")))?;
        let rows = range_rows(&range);
        let header_row = header::detect_header_row(
            &rows,
            config.header_sample_rows,
            config.header_density_threshold,
        );
        let Some(header_row) = header_row else {
            if multi {
                warn!("{origin}: sheet '{sheet}' has no detectable header; skipping it");
                report.skipped_sheets.push(sheet);
                continue;
            }
            return Err(ReconcileError::MalformedTable {
                path: path.to_path_buf(),
                sheet: Some(sheet),
                window: config.header_sample_rows,
            });
        };

        let mut rows = rows.into_iter().skip(header_row);
        let names = rows
            .next()
            .map(|raw| header::clean_column_names(&raw))
            .unwrap_or_default();
        let mut dataset = Dataset::new(origin, names);
        let mut sizes = append_rows(&mut dataset, rows.map(Ok), chunk_rows, config)?;
        report.chunk_sizes.append(&mut sizes);
        report.sheets.push(SheetLoad {
            sheet: Some(sheet.clone()),
            header_row,
            rows: dataset.len(),
        });

        combined = Some(match combined {
            None => dataset,
            Some(mut acc) => {
                acc.extend_from(dataset);
                acc
            }
        });
        if multi {
            let total = combined.as_ref().map_or(0, Dataset::len);
            info!(
                "{origin}: sheet '{sheet}' added, {total} row(s) accumulated"
            );
        }
    }

    combined.ok_or_else(|| ReconcileError::MalformedTable {
        path: path.to_path_buf(),
        sheet: None,
        window: config.header_sample_rows,
    })
}

fn resolve_sheet_name(path: &Path, sheet_names: &[String], wanted: &str) -> Result<String> {
    if let Some(name) = sheet_names
        .iter()
        .find(|name| name.as_str() == wanted || name.trim().eq_ignore_ascii_case(wanted))
    {
        return Ok(name.clone());
    }
    match wanted.parse::<usize>() {
        Ok(position) if (1..=sheet_names.len()).contains(&position) => {
            Ok(sheet_names[position - 1].clone())
        }
        _ => Err(ReconcileError::InvalidRequest(format!(
            "Sheet '{wanted}' not found in {path:?} (available: {})",
            sheet_names.join(", ")
        ))),
    }
}

fn range_rows(range: &Range<Data>) -> Vec<Vec<Value>> {
    range
        .rows()
        .map(|row| row.iter().map(cell_value).collect())
        .collect()
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(number) => Value::Number(*number as f64),
        Data::Float(number) => Value::Number(*number),
        Data::String(text) => Value::from(text.as_str()),
        Data::Bool(flag) => Value::text(if *flag { "TRUE" } else { "FALSE" }),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(stamp) if stamp.time() == chrono::NaiveTime::MIN => {
                Value::text(stamp.format("%Y-%m-%d").to_string())
            }
            Some(stamp) => Value::text(stamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Value::text(cell.to_string()),
        },
        Data::DateTimeIso(text) | Data::DurationIso(text) => Value::from(text.as_str()),
    }
}

/// Re-encodes eligible text columns as shared strings and returns their names.
fn optimize_columns(dataset: &mut Dataset, large_source: bool, config: &IngestConfig) -> Vec<String> {
    let mut encoded = Vec::new();
    for column in 0..dataset.columns().len() {
        let stats = dataset.column_stats(column);
        if resources::encoding_decision(&stats, large_source, config) == ColumnEncoding::Categorical {
            let distinct = dataset.intern_column(column);
            let name = dataset.columns()[column].clone();
            debug!("Column '{name}' stored as categorical ({distinct} distinct value(s))");
            encoded.push(name);
        }
    }
    if !encoded.is_empty() {
        info!(
            "{}: {} column(s) stored as categorical",
            dataset.origin(),
            encoded.len()
        );
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_selector_parses_keywords_and_names() {
        assert_eq!("ALL".parse::<SheetSelector>(), Ok(SheetSelector::All));
        assert_eq!("first".parse::<SheetSelector>(), Ok(SheetSelector::First));
        assert_eq!(
            " Hoja 2 ".parse::<SheetSelector>(),
            Ok(SheetSelector::Named("Hoja 2".to_string()))
        );
        assert!("".parse::<SheetSelector>().is_err());
    }

    #[test]
    fn sheet_names_resolve_by_name_then_position() {
        let names = vec!["Datos".to_string(), "2023".to_string()];
        let path = Path::new("book.xlsx");
        assert_eq!(resolve_sheet_name(path, &names, "datos").ok().as_deref(), Some("Datos"));
        assert_eq!(resolve_sheet_name(path, &names, "2023").ok().as_deref(), Some("2023"));
        assert_eq!(resolve_sheet_name(path, &names, "1").ok().as_deref(), Some("Datos"));
        assert!(matches!(
            resolve_sheet_name(path, &names, "9"),
            Err(ReconcileError::InvalidRequest(_))
        ));
    }

    #[test]
    fn append_rows_reports_chunk_sizes() {
        let config = IngestConfig::default();
        let mut dataset = Dataset::new("t", vec!["id".to_string()]);
        let rows = (0..7).map(|idx| Ok(vec![Value::text(idx.to_string())]));
        let sizes = append_rows(&mut dataset, rows, Some(3), &config).expect("append");
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(dataset.len(), 7);
        assert_eq!(dataset.record(6).value(0).as_display(), "6");
    }

    #[test]
    fn unchunked_reads_report_no_chunks() {
        let config = IngestConfig::default();
        let mut dataset = Dataset::new("t", vec!["id".to_string()]);
        let rows = (0..5).map(|idx| Ok(vec![Value::text(idx.to_string())]));
        let sizes = append_rows(&mut dataset, rows, None, &config).expect("append");
        assert!(sizes.is_empty());
        assert_eq!(dataset.len(), 5);
    }

    #[test]
    fn cells_map_to_values() {
        assert_eq!(cell_value(&Data::Empty), Value::Null);
        assert_eq!(cell_value(&Data::Int(7)), Value::Number(7.0));
        assert_eq!(cell_value(&Data::String(String::new())), Value::Null);
        assert_eq!(cell_value(&Data::Bool(true)), Value::text("TRUE"));
    }
}
