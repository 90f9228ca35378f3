//! Set-based comparison of two keyed datasets.
//!
//! Every operation here is linear in the number of rows (plus the sort needed
//! for duplicate listings) and deterministic: the same inputs produce the same
//! rows in the same order. Rows with an invalid key never take part in the
//! key-based sets.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use itertools::Itertools;
use log::{debug, info};
use serde::Serialize;

use crate::{
    config::{CompareConfig, InvalidKeyPolicy},
    dataset::Dataset,
    normalize::CanonicalKey,
};

/// A comparison the caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Analysis {
    Duplicates,
    Missing,
    Incomplete,
}

impl Analysis {
    pub const ALL: [Analysis; 3] = [Analysis::Duplicates, Analysis::Missing, Analysis::Incomplete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Analysis::Duplicates => "duplicates",
            Analysis::Missing => "missing",
            Analysis::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MissingInA,
    MissingInB,
    Duplicate,
    Incomplete,
}

impl Category {
    pub fn analysis(&self) -> Analysis {
        match self {
            Category::MissingInA | Category::MissingInB => Analysis::Missing,
            Category::Duplicate => Analysis::Duplicates,
            Category::Incomplete => Analysis::Incomplete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowRef {
    pub side: Side,
    pub row: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub category: Category,
    /// Cross-source sequence: rows of A first, then rows of B.
    pub consolidated: Vec<RowRef>,
}

impl ComparisonResult {
    fn from_sides(category: Category, a: Vec<usize>, b: Vec<usize>) -> Self {
        let consolidated = a
            .into_iter()
            .map(|row| RowRef { side: Side::A, row })
            .chain(b.into_iter().map(|row| RowRef { side: Side::B, row }))
            .collect();
        Self {
            category,
            consolidated,
        }
    }

    /// Per-source breakdown, in consolidated order.
    pub fn rows_for(&self, side: Side) -> Vec<usize> {
        self.consolidated
            .iter()
            .filter(|entry| entry.side == side)
            .map(|entry| entry.row)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.consolidated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consolidated.is_empty()
    }
}

/// An incomplete row with the names of the fields it lacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullityEntry {
    pub side: Side,
    pub row: usize,
    pub null_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullColumnStat {
    pub column: String,
    pub nulls: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyFrequency {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrecisionStats {
    pub rows_a: usize,
    pub rows_b: usize,
    pub missing_in_a: usize,
    pub missing_in_b: usize,
    pub percent_missing_in_a: f64,
    pub percent_missing_in_b: f64,
    pub common: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub category: Category,
    pub side: Side,
    pub count: usize,
    pub reference: usize,
    pub percent: f64,
    pub observation: String,
}

/// Everything a comparison produced for one pair of datasets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Comparison {
    pub analyses: Vec<Analysis>,
    pub results: Vec<ComparisonResult>,
    pub nullity_ranking: Vec<NullityEntry>,
    pub null_columns_a: Vec<NullColumnStat>,
    pub null_columns_b: Vec<NullColumnStat>,
    pub duplicate_keys_a: Vec<KeyFrequency>,
    pub duplicate_keys_b: Vec<KeyFrequency>,
    pub precision: PrecisionStats,
    pub diagnostics: Vec<Diagnostic>,
}

impl Comparison {
    pub fn result(&self, category: Category) -> Option<&ComparisonResult> {
        self.results.iter().find(|result| result.category == category)
    }

    pub fn total_rows(&self) -> usize {
        self.results.iter().map(ComparisonResult::len).sum()
    }
}

pub struct ComparisonEngine<'a> {
    config: &'a CompareConfig,
}

impl<'a> ComparisonEngine<'a> {
    pub fn new(config: &'a CompareConfig) -> Self {
        Self { config }
    }

    pub fn compare(&self, a: &Dataset, b: &Dataset, analyses: &[Analysis]) -> Comparison {
        let analyses = analyses.iter().copied().sorted().dedup().collect::<Vec<_>>();
        let mut comparison = Comparison {
            precision: precision_stats(a, b),
            ..Comparison::default()
        };
        let skip_a = self.skipped_columns(a);
        let skip_b = self.skipped_columns(b);

        for analysis in &analyses {
            match analysis {
                Analysis::Missing => {
                    let in_b = missing_rows(a, b);
                    let in_a = missing_rows(b, a);
                    info!(
                        "{} row(s) of {} missing from {}; {} row(s) of {} missing from {}",
                        in_b.len(),
                        a.origin(),
                        b.origin(),
                        in_a.len(),
                        b.origin(),
                        a.origin()
                    );
                    comparison
                        .results
                        .push(ComparisonResult::from_sides(Category::MissingInB, in_b, Vec::new()));
                    comparison
                        .results
                        .push(ComparisonResult::from_sides(Category::MissingInA, Vec::new(), in_a));
                }
                Analysis::Duplicates => {
                    let dup_a = duplicate_rows(a);
                    let dup_b = duplicate_rows(b);
                    info!(
                        "Duplicates: {} row(s) in {}, {} row(s) in {}",
                        dup_a.len(),
                        a.origin(),
                        dup_b.len(),
                        b.origin()
                    );
                    comparison.duplicate_keys_a =
                        duplicate_key_frequency(a, self.config.duplicate_summary_top);
                    comparison.duplicate_keys_b =
                        duplicate_key_frequency(b, self.config.duplicate_summary_top);
                    comparison
                        .results
                        .push(ComparisonResult::from_sides(Category::Duplicate, dup_a, dup_b));
                }
                Analysis::Incomplete => {
                    let policy = self.config.invalid_key_rows;
                    let inc_a = incomplete_rows(a, &skip_a, policy);
                    let inc_b = incomplete_rows(b, &skip_b, policy);
                    info!(
                        "Incomplete: {} row(s) in {}, {} row(s) in {}",
                        inc_a.len(),
                        a.origin(),
                        inc_b.len(),
                        b.origin()
                    );
                    comparison.nullity_ranking = nullity_ranking(
                        [(Side::A, a, &skip_a, &inc_a), (Side::B, b, &skip_b, &inc_b)],
                    );
                    comparison
                        .results
                        .push(ComparisonResult::from_sides(Category::Incomplete, inc_a, inc_b));
                }
            }
        }

        comparison.null_columns_a = null_column_stats(a, &skip_a);
        comparison.null_columns_b = null_column_stats(b, &skip_b);
        comparison.diagnostics = self.diagnostics(a, b, &comparison.results);
        comparison.analyses = analyses;
        comparison
    }

    /// Key columns plus the configured technical columns present in `dataset`.
    fn skipped_columns(&self, dataset: &Dataset) -> Vec<usize> {
        let mut skip = dataset.key_columns().to_vec();
        for name in &self.config.technical_columns {
            match dataset.column_index(name) {
                Some(idx) if !skip.contains(&idx) => skip.push(idx),
                Some(_) => {}
                None => debug!("{}: technical column '{name}' not present", dataset.origin()),
            }
        }
        skip
    }

    fn diagnostics(&self, a: &Dataset, b: &Dataset, results: &[ComparisonResult]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for result in results {
            for (side, dataset, other) in [(Side::A, a, b), (Side::B, b, a)] {
                let count = result.consolidated.iter().filter(|entry| entry.side == side).count();
                let reference = dataset.len();
                let percent = percent(count, reference);
                if count == 0 || percent <= self.config.critical_percent {
                    continue;
                }
                let observation = match result.category {
                    Category::MissingInB | Category::MissingInA => format!(
                        "{percent:.1}% of {} is absent from {}; check that both sources use the same key",
                        dataset.origin(),
                        other.origin()
                    ),
                    Category::Duplicate => format!(
                        "{percent:.1}% of {} shares its key with another row; the key may not identify records",
                        dataset.origin()
                    ),
                    Category::Incomplete => format!(
                        "{percent:.1}% of {} lacks at least one field; review the export for empty columns",
                        dataset.origin()
                    ),
                };
                diagnostics.push(Diagnostic {
                    category: result.category,
                    side,
                    count,
                    reference,
                    percent,
                    observation,
                });
            }
        }
        diagnostics
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn valid_keys(dataset: &Dataset) -> HashSet<&str> {
    dataset
        .records()
        .iter()
        .map(|record| record.key())
        .filter(|key| key.is_valid())
        .map(CanonicalKey::as_str)
        .collect()
}

/// Rows of `source` whose valid key does not occur in `other`, in source order.
pub fn missing_rows(source: &Dataset, other: &Dataset) -> Vec<usize> {
    let other_keys = valid_keys(other);
    source
        .records()
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            let key = record.key();
            key.is_valid() && !other_keys.contains(key.as_str())
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Number of distinct valid keys present on both sides.
pub fn common_keys(a: &Dataset, b: &Dataset) -> usize {
    let keys_a = valid_keys(a);
    let keys_b = valid_keys(b);
    keys_a.intersection(&keys_b).count()
}

pub fn precision_stats(a: &Dataset, b: &Dataset) -> PrecisionStats {
    let missing_in_b = missing_rows(a, b).len();
    let missing_in_a = missing_rows(b, a).len();
    PrecisionStats {
        rows_a: a.len(),
        rows_b: b.len(),
        missing_in_a,
        missing_in_b,
        percent_missing_in_a: percent(missing_in_a, b.len()),
        percent_missing_in_b: percent(missing_in_b, a.len()),
        common: common_keys(a, b),
    }
}

fn key_counts(dataset: &Dataset) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for record in dataset.records() {
        if record.key().is_valid() {
            *counts.entry(record.key().as_str()).or_insert(0) += 1;
        }
    }
    counts
}

/// Every row whose key occurs more than once, sorted by key and stable on
/// source order within a key.
pub fn duplicate_rows(dataset: &Dataset) -> Vec<usize> {
    let counts = key_counts(dataset);
    let records = dataset.records();
    let mut rows = records
        .iter()
        .enumerate()
        .filter(|(_, record)| counts.get(record.key().as_str()).is_some_and(|count| *count > 1))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    rows.sort_by(|left, right| records[*left].key().cmp(records[*right].key()));
    rows
}

/// The `top` most repeated keys, largest groups first and ties by key.
pub fn duplicate_key_frequency(dataset: &Dataset, top: usize) -> Vec<KeyFrequency> {
    key_counts(dataset)
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .sorted_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(right.0)))
        .take(top)
        .map(|(key, count)| KeyFrequency {
            key: key.to_string(),
            count,
        })
        .collect()
}

fn null_fields(dataset: &Dataset, row: usize, skip: &[usize]) -> Vec<usize> {
    let record = dataset.record(row);
    (0..dataset.columns().len())
        .filter(|idx| !skip.contains(idx) && record.value(*idx).is_null())
        .collect()
}

/// Rows with at least one null field outside `skip`, in source order. Rows
/// without a valid key follow `policy`.
pub fn incomplete_rows(dataset: &Dataset, skip: &[usize], policy: InvalidKeyPolicy) -> Vec<usize> {
    dataset
        .records()
        .iter()
        .enumerate()
        .filter(|(idx, record)| {
            if !record.key().is_valid() && !dataset.key_columns().is_empty() {
                match policy {
                    InvalidKeyPolicy::Flag => return true,
                    InvalidKeyPolicy::Exclude => return false,
                    InvalidKeyPolicy::Scan => {}
                }
            }
            !null_fields(dataset, *idx, skip).is_empty()
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Incomplete rows across sources ranked by descending null-field count,
/// stable on the input order. Key columns count as null fields for rows
/// whose key is invalid.
pub fn nullity_ranking<'a, I>(sources: I) -> Vec<NullityEntry>
where
    I: IntoIterator<Item = (Side, &'a Dataset, &'a Vec<usize>, &'a Vec<usize>)>,
{
    let mut entries = Vec::new();
    for (side, dataset, skip, rows) in sources {
        for row in rows {
            let mut nulls = null_fields(dataset, *row, skip);
            if !dataset.record(*row).key().is_valid() {
                nulls.extend(dataset.key_columns().iter().copied());
                nulls.sort_unstable();
                nulls.dedup();
            }
            entries.push(NullityEntry {
                side,
                row: *row,
                null_columns: nulls
                    .into_iter()
                    .map(|idx| dataset.columns()[idx].clone())
                    .collect(),
            });
        }
    }
    entries.sort_by(|left, right| right.null_columns.len().cmp(&left.null_columns.len()));
    entries
}

/// Null counts for every scanned column that has at least one null, highest
/// percentage first.
pub fn null_column_stats(dataset: &Dataset, skip: &[usize]) -> Vec<NullColumnStat> {
    let total = dataset.len();
    (0..dataset.columns().len())
        .filter(|idx| !skip.contains(idx))
        .filter_map(|idx| {
            let nulls = dataset
                .records()
                .iter()
                .filter(|record| record.value(idx).is_null())
                .count();
            (nulls > 0).then(|| NullColumnStat {
                column: dataset.columns()[idx].clone(),
                nulls,
                percent: percent(nulls, total),
            })
        })
        .sorted_by(|left, right| right.percent.total_cmp(&left.percent))
        .collect()
}
