//! Key column resolution.
//!
//! `Auto` looks for a well-known identifier column by name priority and falls
//! back to the most unique column. Callers can also name the key column, pick
//! several columns for a composite key, ask for a person-name key built from
//! given-name and surname columns, or key on an identifier with a check digit
//! that may be split across a number column and a check-digit column.
//!
//! Once both sources are keyed, [`pair_keys`] may swap weak automatic keys for
//! a better pair of same-named columns.

use log::{info, warn};
use serde::Serialize;

use crate::{
    config::KeyConfig,
    dataset::Dataset,
    error::{ReconcileError, Result},
    normalize::KeyForm,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyStrategy {
    #[default]
    Auto,
    Column(String),
    Composite(Vec<String>),
    PersonName,
    /// Identifier number, plus a separate check-digit column when present.
    CheckDigitId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMethod {
    NamePriority,
    Uniqueness,
    Explicit,
    Composite,
    PersonName,
    CheckDigitId,
    /// Replaced by a same-named column pair shared with the other source.
    Paired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyResolution {
    pub columns: Vec<String>,
    pub method: KeyMethod,
    /// Share of distinct keys among rows with a valid key, after attachment.
    pub uniqueness: f64,
}

/// Resolves the key columns without touching the dataset.
pub fn resolve_key_columns(
    dataset: &Dataset,
    strategy: &KeyStrategy,
    config: &KeyConfig,
) -> Result<(Vec<usize>, KeyMethod)> {
    match strategy {
        KeyStrategy::Auto => auto_detect(dataset, config),
        KeyStrategy::Column(name) => Ok((vec![require_column(dataset, name)?], KeyMethod::Explicit)),
        KeyStrategy::Composite(names) => {
            if names.is_empty() {
                return Err(ReconcileError::InvalidRequest(
                    "a composite key needs at least one column".to_string(),
                ));
            }
            let columns = names
                .iter()
                .map(|name| require_column(dataset, name))
                .collect::<Result<Vec<_>>>()?;
            Ok((columns, KeyMethod::Composite))
        }
        KeyStrategy::PersonName => person_name_columns(dataset, config)
            .map(|columns| (columns, KeyMethod::PersonName))
            .ok_or_else(|| ReconcileError::NoKeyColumn {
                origin: dataset.origin().to_string(),
            }),
        KeyStrategy::CheckDigitId => check_digit_id_columns(dataset, config)
            .map(|columns| (columns, KeyMethod::CheckDigitId))
            .ok_or_else(|| ReconcileError::NoKeyColumn {
                origin: dataset.origin().to_string(),
            }),
    }
}

/// Resolves the key and attaches the canonical key to every record.
pub fn attach_key(
    dataset: &mut Dataset,
    strategy: &KeyStrategy,
    config: &KeyConfig,
) -> Result<KeyResolution> {
    let (columns, method) = resolve_key_columns(dataset, strategy, config)?;
    let form = match method {
        KeyMethod::CheckDigitId => KeyForm::CheckDigitId,
        _ => KeyForm::Canonical,
    };
    dataset.attach_keys_as(columns, form);
    Ok(resolution(dataset, method, config))
}

/// Logs the attached key and describes it.
fn resolution(dataset: &Dataset, method: KeyMethod, config: &KeyConfig) -> KeyResolution {
    let stats = dataset.key_stats();
    let uniqueness = stats.uniqueness();
    let label = dataset.key_label().unwrap_or_default();
    info!(
        "{}: key '{label}' ({:?}), {} distinct of {} valid key(s)",
        dataset.origin(),
        method,
        stats.distinct,
        stats.non_null
    );
    if uniqueness < config.warn_uniqueness {
        warn!(
            "{}: key '{label}' is only {:.1}% unique; results may group unrelated rows",
            dataset.origin(),
            uniqueness * 100.0
        );
    }
    KeyResolution {
        columns: dataset
            .key_columns()
            .iter()
            .map(|idx| dataset.columns()[*idx].clone())
            .collect(),
        method,
        uniqueness,
    }
}

/// Re-pairs automatically resolved keys across two sources.
///
/// When either current key is at most `pair_uniqueness` unique, every pair of
/// same-named columns among the first `pair_search_columns` of each source is
/// scored by the sum of both columns' uniqueness. The best pair replaces both
/// keys if it beats the current pair's score. Returns the new resolutions, or
/// `None` when the keys stay as they are.
pub fn pair_keys(
    a: &mut Dataset,
    b: &mut Dataset,
    config: &KeyConfig,
) -> Option<(KeyResolution, KeyResolution)> {
    let current_a = a.key_stats().uniqueness();
    let current_b = b.key_stats().uniqueness();
    if current_a > config.pair_uniqueness && current_b > config.pair_uniqueness {
        return None;
    }

    let candidates_b = b
        .columns()
        .iter()
        .take(config.pair_search_columns)
        .enumerate()
        .map(|(idx, name)| (idx, normalized_header(name)))
        .collect::<Vec<_>>();
    let mut best: Option<(usize, usize, f64)> = None;
    for (idx_a, name) in a.columns().iter().take(config.pair_search_columns).enumerate() {
        let name = normalized_header(name);
        let Some(idx_b) = candidates_b
            .iter()
            .find(|(_, other)| *other == name)
            .map(|(idx, _)| *idx)
        else {
            continue;
        };
        let score = a.column_stats(idx_a).uniqueness() + b.column_stats(idx_b).uniqueness();
        if best.is_none_or(|(_, _, best_score)| score > best_score) {
            best = Some((idx_a, idx_b, score));
        }
    }

    let (idx_a, idx_b, score) = best?;
    let unchanged = a.key_columns() == [idx_a] && b.key_columns() == [idx_b];
    if unchanged || score <= current_a + current_b {
        return None;
    }
    info!(
        "Key uniqueness {:.1}% / {:.1}% is low; pairing '{}' with '{}' ({:.1}% combined)",
        current_a * 100.0,
        current_b * 100.0,
        a.columns()[idx_a],
        b.columns()[idx_b],
        score * 50.0
    );
    a.attach_keys(vec![idx_a]);
    b.attach_keys(vec![idx_b]);
    Some((
        resolution(a, KeyMethod::Paired, config),
        resolution(b, KeyMethod::Paired, config),
    ))
}

fn require_column(dataset: &Dataset, name: &str) -> Result<usize> {
    dataset
        .column_index(name)
        .ok_or_else(|| ReconcileError::UnknownColumn {
            origin: dataset.origin().to_string(),
            column: name.to_string(),
        })
}

fn auto_detect(dataset: &Dataset, config: &KeyConfig) -> Result<(Vec<usize>, KeyMethod)> {
    for wanted in &config.priority {
        let wanted = wanted.trim();
        if let Some(idx) = dataset
            .columns()
            .iter()
            .position(|column| column.trim().eq_ignore_ascii_case(wanted))
        {
            return Ok((vec![idx], KeyMethod::NamePriority));
        }
    }

    let mut best: Option<(usize, f64)> = None;
    for idx in 0..dataset.columns().len() {
        let uniqueness = dataset.column_stats(idx).uniqueness();
        if best.is_none_or(|(_, score)| uniqueness > score) {
            best = Some((idx, uniqueness));
        }
    }
    match best {
        Some((idx, score)) if score > config.min_uniqueness => {
            Ok((vec![idx], KeyMethod::Uniqueness))
        }
        _ => Err(ReconcileError::NoKeyColumn {
            origin: dataset.origin().to_string(),
        }),
    }
}

/// Given name + paternal (+ maternal) surname when available, otherwise a
/// single full-name column.
fn person_name_columns(dataset: &Dataset, config: &KeyConfig) -> Option<Vec<usize>> {
    let mut taken = Vec::new();
    let given = find_by_variants(dataset, &config.given_name_variants, &taken);
    taken.extend(given);
    let paternal = find_by_variants(dataset, &config.paternal_variants, &taken);
    taken.extend(paternal);
    let maternal = find_by_variants(dataset, &config.maternal_variants, &taken);

    if let (Some(given), Some(paternal)) = (given, paternal) {
        let mut columns = vec![given, paternal];
        columns.extend(maternal);
        if maternal.is_none() {
            warn!(
                "{}: no maternal surname column; using given name + paternal surname",
                dataset.origin()
            );
        }
        return Some(columns);
    }
    find_by_variants(dataset, &config.full_name_variants, &[]).map(|idx| vec![idx])
}

/// The identifier number column, followed by its check-digit column when the
/// source keeps the check digit separately.
fn check_digit_id_columns(dataset: &Dataset, config: &KeyConfig) -> Option<Vec<usize>> {
    let number = find_by_variants(dataset, &config.id_number_variants, &[])?;
    let mut columns = vec![number];
    columns.extend(find_by_variants(dataset, &config.check_digit_variants, &[number]));
    Some(columns)
}

fn normalized_header(name: &str) -> String {
    name.trim().to_lowercase().replace('_', " ")
}

/// Exact matches across all variants win over partial ones; a variant longer
/// than four characters may also match as a substring of the column name.
fn find_by_variants(dataset: &Dataset, variants: &[String], taken: &[usize]) -> Option<usize> {
    let headers = dataset
        .columns()
        .iter()
        .map(|name| normalized_header(name))
        .collect::<Vec<_>>();
    let variants = variants
        .iter()
        .map(|variant| normalized_header(variant))
        .collect::<Vec<_>>();
    let free = |idx: &usize| !taken.contains(idx);

    variants
        .iter()
        .find_map(|variant| {
            (0..headers.len())
                .filter(free)
                .find(|idx| headers[*idx] == *variant)
        })
        .or_else(|| {
            variants.iter().filter(|variant| variant.len() > 4).find_map(|variant| {
                (0..headers.len())
                    .filter(free)
                    .find(|idx| headers[*idx].contains(variant.as_str()))
            })
        })
}
