//! In-memory tabular model shared by the loader, the key resolver, the
//! comparison engine, and the report writer.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Serialize;

use crate::normalize::{CanonicalKey, KeyForm};

/// A raw cell value. Text is reference counted so that low-cardinality columns
/// can share one allocation per distinct value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(Arc<str>),
    Number(f64),
}

impl Value {
    pub fn text(value: impl AsRef<str>) -> Self {
        Value::Text(Arc::from(value.as_ref()))
    }

    /// Null and blank text both count as missing data.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.trim().is_empty(),
            Value::Number(number) => number.is_nan(),
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(text) => text.to_string(),
            Value::Number(number) => format_number(*number),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Value::Null
        } else {
            Value::text(value)
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::from(value.as_str())
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
    key: CanonicalKey,
}

impl Record {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, column: usize) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnEncoding {
    Text,
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnStats {
    pub rows: usize,
    pub non_null: usize,
    pub distinct: usize,
}

impl ColumnStats {
    pub fn distinct_ratio(&self) -> f64 {
        if self.rows == 0 {
            1.0
        } else {
            self.distinct as f64 / self.rows as f64
        }
    }

    pub fn uniqueness(&self) -> f64 {
        if self.non_null == 0 {
            0.0
        } else {
            self.distinct as f64 / self.non_null as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    origin: String,
    columns: Vec<String>,
    records: Vec<Record>,
    key_columns: Vec<usize>,
    key_form: KeyForm,
}

impl Dataset {
    pub fn new(origin: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            origin: origin.into(),
            columns,
            records: Vec::new(),
            key_columns: Vec::new(),
            key_form: KeyForm::default(),
        }
    }

    /// Builds a dataset from string rows, mostly useful for tests and callers
    /// that already hold parsed data. Empty strings become nulls.
    pub fn from_rows<S: AsRef<str>>(origin: &str, columns: &[S], rows: &[Vec<&str>]) -> Self {
        let mut dataset = Dataset::new(
            origin,
            columns.iter().map(|c| c.as_ref().to_string()).collect(),
        );
        for row in rows {
            dataset.push_row(row.iter().map(|value| Value::from(*value)).collect());
        }
        dataset
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, row: usize) -> &Record {
        &self.records[row]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact match first, then a case-insensitive, whitespace-trimmed match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column == name)
            .or_else(|| {
                let wanted = name.trim();
                self.columns
                    .iter()
                    .position(|column| column.trim().eq_ignore_ascii_case(wanted))
            })
    }

    /// Appends a row. Rows shorter than the header are padded with nulls; rows
    /// wider than the header grow the column list instead of losing cells.
    pub fn push_row(&mut self, mut values: Vec<Value>) {
        if values.len() > self.columns.len() {
            for idx in self.columns.len()..values.len() {
                self.columns.push(unique_column_name(&self.columns, idx));
            }
            let width = self.columns.len();
            for record in &mut self.records {
                record.values.resize(width, Value::Null);
            }
        }
        values.resize(self.columns.len(), Value::Null);
        let key = if self.key_columns.is_empty() {
            CanonicalKey::invalid()
        } else {
            self.key_form
                .key_of(self.key_columns.iter().map(|idx| &values[*idx]))
        };
        self.records.push(Record { values, key });
    }

    /// Appends every record of `other`, aligning columns by name. Columns that
    /// only exist in `other` are added at the end; missing cells become nulls.
    pub fn extend_from(&mut self, other: Dataset) {
        let mapping = other
            .columns
            .iter()
            .map(|name| match self.columns.iter().position(|c| c == name) {
                Some(idx) => idx,
                None => {
                    self.columns.push(name.clone());
                    self.columns.len() - 1
                }
            })
            .collect::<Vec<_>>();
        let width = self.columns.len();
        for record in &mut self.records {
            record.values.resize(width, Value::Null);
        }
        self.records.reserve(other.records.len());
        for record in other.records {
            let mut values = vec![Value::Null; width];
            for (source_idx, value) in record.values.into_iter().enumerate() {
                values[mapping[source_idx]] = value;
            }
            self.push_row(values);
        }
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    /// Human-readable name of the resolved key (joined with `+` when composite).
    pub fn key_label(&self) -> Option<String> {
        if self.key_columns.is_empty() {
            return None;
        }
        Some(
            self.key_columns
                .iter()
                .map(|idx| self.columns[*idx].as_str())
                .collect::<Vec<_>>()
                .join(" + "),
        )
    }

    pub fn is_key_column(&self, column: usize) -> bool {
        self.key_columns.contains(&column)
    }

    pub fn key_form(&self) -> KeyForm {
        self.key_form
    }

    /// Derives the canonical key of every record from `columns`. Field values
    /// are left untouched.
    pub fn attach_keys(&mut self, columns: Vec<usize>) {
        self.attach_keys_as(columns, KeyForm::Canonical);
    }

    pub fn attach_keys_as(&mut self, columns: Vec<usize>, form: KeyForm) {
        for record in &mut self.records {
            record.key = form.key_of(columns.iter().map(|idx| record.value(*idx)));
        }
        self.key_columns = columns;
        self.key_form = form;
    }

    pub fn key_stats(&self) -> ColumnStats {
        let mut distinct = HashSet::new();
        let mut non_null = 0usize;
        for record in &self.records {
            if record.key.is_valid() {
                non_null += 1;
                distinct.insert(record.key.as_str());
            }
        }
        ColumnStats {
            rows: self.records.len(),
            non_null,
            distinct: distinct.len(),
        }
    }

    pub fn column_stats(&self, column: usize) -> ColumnStats {
        let mut distinct = HashSet::new();
        let mut non_null = 0usize;
        for record in &self.records {
            let value = record.value(column);
            if value.is_null() {
                continue;
            }
            non_null += 1;
            distinct.insert(value.as_display());
        }
        ColumnStats {
            rows: self.records.len(),
            non_null,
            distinct: distinct.len(),
        }
    }

    /// Re-encodes a text column so that equal values share one allocation.
    /// Returns the number of distinct values kept.
    pub fn intern_column(&mut self, column: usize) -> usize {
        let mut pool: HashSet<Arc<str>> = HashSet::new();
        for record in &mut self.records {
            if let Some(Value::Text(text)) = record.values.get_mut(column) {
                match pool.get(&**text) {
                    Some(shared) => *text = Arc::clone(shared),
                    None => {
                        pool.insert(Arc::clone(text));
                    }
                }
            }
        }
        pool.len()
    }

    /// Rough heap footprint of the loaded values, used for memory advice.
    pub fn estimated_bytes(&self) -> u64 {
        let mut shared = HashSet::new();
        let mut bytes = 0u64;
        for record in &self.records {
            bytes += (record.values.len() * std::mem::size_of::<Value>()) as u64;
            bytes += record.key.as_str().len() as u64;
            for value in &record.values {
                if let Value::Text(text) = value
                    && shared.insert(Arc::as_ptr(text) as *const u8 as usize)
                {
                    bytes += text.len() as u64;
                }
            }
        }
        bytes
    }
}

fn unique_column_name(existing: &[String], idx: usize) -> String {
    let mut candidate = format!("Column_{}", idx + 1);
    let mut counter = 2usize;
    while existing.iter().any(|name| name == &candidate) {
        candidate = format!("Column_{}_{counter}", idx + 1);
        counter += 1;
    }
    candidate
}
