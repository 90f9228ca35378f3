//! I/O helpers for source detection, delimiter and encoding resolution.
//!
//! Every source the loader opens passes through this module:
//!
//! - **Format detection**: the extension decides between delimited text and a
//!   spreadsheet workbook; anything else is rejected up front.
//! - **Delimiter resolution**: an explicit delimiter wins, then a sniff of the
//!   first lines, then the extension default (`.tsv` → tab, otherwise comma).
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use itertools::Itertools;

use crate::error::{ReconcileError, Result};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const SNIFF_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 10;

const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
}

pub fn detect_format(path: &Path) -> Result<SourceFormat> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if DELIMITED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(SourceFormat::Delimited)
    } else if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
        Ok(SourceFormat::Spreadsheet)
    } else {
        Err(ReconcileError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        })
    }
}

pub fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|err| ReconcileError::corrupt(path, err))
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| ReconcileError::InvalidRequest(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn default_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> Result<u8> {
    if let Some(delimiter) = provided {
        return Ok(delimiter);
    }
    let file = File::open(path).map_err(|err| ReconcileError::corrupt(path, err))?;
    let mut sample = Vec::new();
    let mut reader = BufReader::new(file);
    for _ in 0..SNIFF_LINES {
        let read = reader
            .read_until(b'\n', &mut sample)
            .map_err(|err| ReconcileError::corrupt(path, err))?;
        if read == 0 {
            break;
        }
    }
    Ok(sniff_delimiter(&sample).unwrap_or_else(|| default_delimiter(path)))
}

/// Picks the candidate delimiter that splits the most sampled lines into the
/// same number of fields. For each candidate the most common non-zero per-line
/// count is its field layout; lines without the candidate (titles, notes) do
/// not count against it. Ties go to the wider layout. Quoted sections are
/// ignored.
pub fn sniff_delimiter(sample: &[u8]) -> Option<u8> {
    let lines = sample
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .collect::<Vec<_>>();

    let mut best: Option<(u8, usize, usize)> = None;
    for candidate in SNIFF_CANDIDATES {
        let Some((count, lines_sharing)) = lines
            .iter()
            .map(|line| count_unquoted(line, candidate))
            .filter(|count| *count > 0)
            .counts()
            .into_iter()
            .max_by_key(|(count, lines_sharing)| (*lines_sharing, *count))
        else {
            continue;
        };
        let better = best.is_none_or(|(_, best_sharing, best_count)| {
            (lines_sharing, count) > (best_sharing, best_count)
        });
        if better {
            best = Some((candidate, lines_sharing, count));
        }
    }
    best.map(|(delimiter, _, _)| delimiter)
}

fn count_unquoted(line: &[u8], delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for byte in line {
        if *byte == b'"' {
            in_quotes = !in_quotes;
        } else if *byte == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Delimited sources are read headerless and flexible: the header is found by
/// density detection and ragged rows are padded later.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).map_err(|err| ReconcileError::corrupt(path, err))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let bytes = if encoding == UTF_8 {
        bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
    } else {
        bytes
    };
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    (!had_errors).then(|| text.into_owned())
}

pub fn decode_record(
    path: &Path,
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| {
            decode_bytes(field, encoding).ok_or_else(|| {
                ReconcileError::corrupt(
                    path,
                    format!(
                        "line {}: failed to decode text with encoding {}",
                        record.position().map_or(0, |pos| pos.line()),
                        encoding.name()
                    ),
                )
            })
        })
        .collect()
}
