//! Header row detection and column name cleanup.
//!
//! Exported spreadsheets often carry a title block or blank rows above the real
//! header. The header is the first sampled row whose share of non-null cells
//! exceeds the configured density threshold.

use std::collections::HashSet;

use crate::dataset::Value;

/// Returns the index of the header row within `rows`, searching at most
/// `window` rows. `None` means no row is dense enough.
pub fn detect_header_row(rows: &[Vec<Value>], window: usize, threshold: f64) -> Option<usize> {
    let sample = &rows[..rows.len().min(window)];
    let width = sample.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return None;
    }
    sample.iter().position(|row| {
        let filled = row.iter().filter(|value| !value.is_null()).count();
        filled as f64 / width as f64 > threshold
    })
}

/// Turns a raw header row into unique column names. Names are trimmed, blank
/// names become `Column_{n}` (1-based), and repeats get a `_{k}` suffix.
pub fn clean_column_names(raw: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(raw.len());
    for (idx, value) in raw.iter().enumerate() {
        let trimmed = value.as_display().trim().to_string();
        let base = if trimmed.is_empty() {
            format!("Column_{}", idx + 1)
        } else {
            trimmed
        };
        let mut candidate = base.clone();
        let mut k = 2usize;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{base}_{k}");
            k += 1;
        }
        names.push(candidate);
    }
    names
}
