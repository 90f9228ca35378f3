//! Key canonicalization.
//!
//! Raw identifiers arrive with inconsistent case, stray whitespace and, when a
//! spreadsheet stored them as floats, a trailing `.0`. [`canonicalize`] folds all
//! of these into one comparable form. Empty input produces an invalid key, which
//! the comparison engine keeps out of every key-based set.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::dataset::Value;

/// Separator between the parts of a composite key.
pub const COMPOSITE_SEPARATOR: &str = "|";

static ZERO_FRACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?\d+)\.0+$").expect("ZERO_FRACTION is a valid regex pattern")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn invalid() -> Self {
        CanonicalKey(String::new())
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical text of a single raw value: trimmed, zero fraction dropped,
/// uppercased. Null yields the empty string.
pub fn canonical_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let integral = match ZERO_FRACTION.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    };
    integral.to_uppercase()
}

pub fn canonicalize(raw: &Value) -> CanonicalKey {
    match raw {
        Value::Null => CanonicalKey::invalid(),
        other => CanonicalKey(canonical_text(&other.as_display())),
    }
}

/// Builds a key from one or more parts. A single part is the plain canonical
/// value; several parts are joined with [`COMPOSITE_SEPARATOR`] and the result
/// is invalid only when every part is empty.
pub fn canonicalize_parts<'a, I>(parts: I) -> CanonicalKey
where
    I: IntoIterator<Item = &'a Value>,
{
    let texts = parts
        .into_iter()
        .map(|value| canonicalize(value).0)
        .collect::<Vec<_>>();
    if texts.iter().all(String::is_empty) {
        return CanonicalKey::invalid();
    }
    CanonicalKey(texts.join(COMPOSITE_SEPARATOR))
}

/// How the key columns of a dataset are folded into a [`CanonicalKey`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyForm {
    /// [`canonicalize_parts`].
    #[default]
    Canonical,
    /// [`canonicalize_check_digit_id`].
    CheckDigitId,
}

impl KeyForm {
    pub fn key_of<'a, I>(self, parts: I) -> CanonicalKey
    where
        I: IntoIterator<Item = &'a Value>,
    {
        match self {
            KeyForm::Canonical => canonicalize_parts(parts),
            KeyForm::CheckDigitId => canonicalize_check_digit_id(parts),
        }
    }
}

/// Key of an identifier with a check digit, given either as one column or
/// split into number and check-digit columns. Parts are concatenated without
/// a separator and only digits and `K` are kept, so `11.111.111-1` and the
/// pair (`11111111`, `1`) produce the same key.
pub fn canonicalize_check_digit_id<'a, I>(parts: I) -> CanonicalKey
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut key = String::new();
    for part in parts {
        key.extend(
            canonicalize(part)
                .0
                .chars()
                .filter(|ch| ch.is_ascii_digit() || *ch == 'K'),
        );
    }
    CanonicalKey(key)
}

/// Renders a national identifier with a trailing check digit in grouped form,
/// e.g. `163456789` becomes `16.345.678-9`. Values that do not look like such
/// an identifier are returned unchanged.
pub fn format_check_digit_id(value: &str) -> String {
    let trimmed = value.trim();
    let mut cleaned = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        match ch {
            '0'..='9' => cleaned.push(ch),
            'k' | 'K' => cleaned.push('K'),
            '.' | '-' | ' ' => {}
            _ => return value.to_string(),
        }
    }
    if cleaned.len() < 2 {
        return value.to_string();
    }
    let (body, check) = cleaned.split_at(cleaned.len() - 1);
    if !body.chars().all(|ch| ch.is_ascii_digit()) {
        return value.to_string();
    }

    let mut grouped = String::with_capacity(body.len() + body.len() / 3 + 2);
    for (idx, ch) in body.chars().enumerate() {
        if idx > 0 && (body.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{grouped}-{check}")
}
