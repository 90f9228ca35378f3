//! Run configuration with documented defaults.
//!
//! Every threshold the pipeline consults lives on [`ReconcileConfig`]. Values are
//! injected explicitly into each component; nothing reads process-wide state. A
//! config file only needs to mention the fields it overrides, since every field
//! falls back to its default.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

pub const DEFAULT_KEY_PRIORITY: &[&str] = &[
    "ID_RUT",
    "RUT",
    "RUN",
    "ID",
    "ID_USUARIO",
    "USUARIO_ID",
    "DOCUMENTO",
    "DOC",
    "CEDULA",
    "FICHA",
    "FOLIO",
    "CASO",
    "N_SOLICITUD",
    "IDENTIFICADOR",
];

pub const DEFAULT_CHECK_DIGIT_COLUMNS: &[&str] =
    &["RUT", "RUN", "ID_RUT", "DOCUMENTO", "CEDULA", "DOC"];

const ID_NUMBER_VARIANTS: &[&str] = &[
    "rut",
    "run",
    "identificador",
    "cedula",
    "numero tipo identificacion",
    "rut fonasa",
    "rut rayen",
];
const CHECK_DIGIT_VARIANTS: &[&str] = &["dv", "digito", "digito verificador"];

const GIVEN_NAME_VARIANTS: &[&str] = &[
    "nombres",
    "nombre",
    "nombres paciente",
    "nombre paciente",
    "nombres_beneficiario",
    "first_name",
    "given_name",
];
const PATERNAL_VARIANTS: &[&str] = &[
    "apellido paterno",
    "paterno",
    "apellidopaterno",
    "primer apellido",
    "apellido 1",
    "apellido_paterno",
    "last_name",
];
const MATERNAL_VARIANTS: &[&str] = &[
    "apellido materno",
    "materno",
    "apellidomaterno",
    "segundo apellido",
    "apellido 2",
    "apellido_materno",
];
const FULL_NAME_VARIANTS: &[&str] = &[
    "nombre completo",
    "nombre y apellido",
    "apellidos y nombres",
    "nombre_completo",
    "paciente",
    "nombre beneficiario",
    "full_name",
];

/// How rows without a usable key are treated by the incompleteness scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidKeyPolicy {
    /// Always report the row as incomplete: its identifier is missing.
    #[default]
    Flag,
    /// Never report the row as incomplete.
    Exclude,
    /// Scan the row like any other, ignoring the key column.
    Scan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Rows sampled when searching for the header row.
    pub header_sample_rows: usize,
    /// A row becomes the header once its non-null fraction exceeds this value.
    pub header_density_threshold: f64,
    /// Sources above this size take the chunked path.
    pub large_file_bytes: u64,
    pub chunk_rows: usize,
    pub progress_every_rows: usize,
    /// Row count above which a source counts as medium-sized for categorical encoding.
    pub medium_dataset_rows: usize,
    pub large_categorical_ratio: f64,
    pub medium_categorical_ratio: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            header_sample_rows: 20,
            header_density_threshold: 0.5,
            large_file_bytes: 8 * 1024 * 1024,
            chunk_rows: 30_000,
            progress_every_rows: 150_000,
            medium_dataset_rows: 10_000,
            large_categorical_ratio: 0.4,
            medium_categorical_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Candidate key column names, matched case-insensitively in order.
    pub priority: Vec<String>,
    pub min_uniqueness: f64,
    /// Below this key uniqueness a warning is logged after key attachment.
    pub warn_uniqueness: f64,
    /// Automatically detected keys at or below this uniqueness on either side
    /// are re-paired across both sources. Zero disables re-pairing.
    pub pair_uniqueness: f64,
    /// Leading columns of each source considered when re-pairing keys.
    pub pair_search_columns: usize,
    /// Identifier number columns for check-digit keys, matched in order.
    pub id_number_variants: Vec<String>,
    /// Separate check-digit columns that complete an identifier number.
    pub check_digit_variants: Vec<String>,
    pub given_name_variants: Vec<String>,
    pub paternal_variants: Vec<String>,
    pub maternal_variants: Vec<String>,
    pub full_name_variants: Vec<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            priority: to_owned(DEFAULT_KEY_PRIORITY),
            min_uniqueness: 0.8,
            warn_uniqueness: 0.8,
            pair_uniqueness: 0.9,
            pair_search_columns: 10,
            id_number_variants: to_owned(ID_NUMBER_VARIANTS),
            check_digit_variants: to_owned(CHECK_DIGIT_VARIANTS),
            given_name_variants: to_owned(GIVEN_NAME_VARIANTS),
            paternal_variants: to_owned(PATERNAL_VARIANTS),
            maternal_variants: to_owned(MATERNAL_VARIANTS),
            full_name_variants: to_owned(FULL_NAME_VARIANTS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    pub invalid_key_rows: InvalidKeyPolicy,
    /// Columns skipped by the incompleteness scan in addition to the key column.
    pub technical_columns: Vec<String>,
    pub duplicate_summary_top: usize,
    /// Percentage above which a category is flagged as a critical diagnostic.
    pub critical_percent: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            invalid_key_rows: InvalidKeyPolicy::default(),
            technical_columns: Vec::new(),
            duplicate_summary_top: 20,
            critical_percent: 85.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub null_placeholder: String,
    pub max_column_width: f64,
    /// Key columns whose values render in grouped check-digit form.
    pub check_digit_columns: Vec<String>,
    pub include_summary_sheet: bool,
    pub large_report_rows: usize,
    pub max_save_attempts: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            null_placeholder: "-".to_string(),
            max_column_width: 50.0,
            check_digit_columns: to_owned(DEFAULT_CHECK_DIGIT_COLUMNS),
            include_summary_sheet: true,
            large_report_rows: 50_000,
            max_save_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub ingest: IngestConfig,
    pub keys: KeyConfig,
    pub compare: CompareConfig,
    pub report: ReportConfig,
}

impl ReconcileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            ReconcileError::Config(format!("Opening config file {path:?}: {err}"))
        })?;
        let config: ReconcileConfig = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| ReconcileError::Config(format!("Parsing {path:?}: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| ReconcileError::FatalIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::to_writer(BufWriter::new(file), self)
            .map_err(|err| ReconcileError::Config(format!("Writing {path:?}: {err}")))
    }

    pub fn validate(&self) -> Result<()> {
        let ratio_fields = [
            ("ingest.header_density_threshold", self.ingest.header_density_threshold),
            ("ingest.large_categorical_ratio", self.ingest.large_categorical_ratio),
            ("ingest.medium_categorical_ratio", self.ingest.medium_categorical_ratio),
            ("keys.min_uniqueness", self.keys.min_uniqueness),
            ("keys.warn_uniqueness", self.keys.warn_uniqueness),
            ("keys.pair_uniqueness", self.keys.pair_uniqueness),
        ];
        for (name, value) in ratio_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReconcileError::Config(format!(
                    "{name} must be between 0 and 1 (got {value})"
                )));
            }
        }
        if self.ingest.header_sample_rows == 0 {
            return Err(ReconcileError::Config(
                "ingest.header_sample_rows must be positive".to_string(),
            ));
        }
        if self.ingest.chunk_rows == 0 {
            return Err(ReconcileError::Config(
                "ingest.chunk_rows must be positive".to_string(),
            ));
        }
        if self.report.max_save_attempts == 0 {
            return Err(ReconcileError::Config(
                "report.max_save_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
