use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{compare::Analysis, keys::KeyStrategy, loader::SheetSelector, report::Scope};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile CSV and spreadsheet datasets by key and report the differences",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compare two sources and write a formatted .xlsx report
    Compare(CompareArgs),
    /// Compare a baseline source against each of several others, one report per pair
    CompareMany(CompareManyArgs),
    /// Load a source and log its detected header, columns, key, and resource advice
    Inspect(InspectArgs),
    /// Write the default configuration as YAML
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Baseline source (csv, tsv, txt, xlsx, xlsm, xlsb, xls, ods)
    #[arg(short = 'a', long = "source-a")]
    pub source_a: PathBuf,
    /// Source compared against the baseline
    #[arg(short = 'b', long = "source-b")]
    pub source_b: PathBuf,
    /// Sheet of the baseline workbook: a name, a 1-based position, `first`, or `all`
    #[arg(long = "sheet-a", default_value = "first")]
    pub sheet_a: SheetSelector,
    /// Sheet of the second workbook: a name, a 1-based position, `first`, or `all`
    #[arg(long = "sheet-b", default_value = "first")]
    pub sheet_b: SheetSelector,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Args)]
pub struct CompareManyArgs {
    /// Sources to compare; the first one is the baseline
    #[arg(short = 'i', long = "input", action = clap::ArgAction::Append, required = true)]
    pub inputs: Vec<PathBuf>,
    /// Sheet selector applied to every workbook input
    #[arg(long, default_value = "first")]
    pub sheet: SheetSelector,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Analyses to run, comma separated
    #[arg(
        long = "analysis",
        value_enum,
        value_delimiter = ',',
        default_values_t = [AnalysisArg::Duplicates, AnalysisArg::Missing, AnalysisArg::Incomplete]
    )]
    pub analyses: Vec<AnalysisArg>,
    #[command(flatten)]
    pub key: KeyArgs,
    /// Which sheets to emit: one consolidated sheet per category, one per source, or both
    #[arg(long, value_enum, default_value = "both")]
    pub scope: ScopeArg,
    /// Report file (defaults to REPORT_<ANALYSIS>.xlsx or REPORT_FULL_COMPARISON.xlsx)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Directory for the report (defaults to the current directory)
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,
    /// Write the run summary as JSON to this path
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Key column to use instead of automatic detection
    #[arg(long, conflicts_with_all = ["key_columns", "person_key", "id_key"])]
    pub key: Option<String>,
    /// Build a composite key from these columns, comma separated
    #[arg(
        long = "key-columns",
        value_delimiter = ',',
        conflicts_with_all = ["person_key", "id_key"]
    )]
    pub key_columns: Vec<String>,
    /// Identify people by given name and surnames instead of an ID column
    #[arg(long = "person-key", conflicts_with = "id_key")]
    pub person_key: bool,
    /// Key on an identifier with a check digit (RUT/RUN), joining a separate
    /// check-digit column (DV) when the source has one
    #[arg(long = "id-key")]
    pub id_key: bool,
}

impl KeyArgs {
    pub fn strategy(&self) -> KeyStrategy {
        if let Some(column) = &self.key {
            KeyStrategy::Column(column.trim().to_string())
        } else if !self.key_columns.is_empty() {
            KeyStrategy::Composite(
                self.key_columns
                    .iter()
                    .map(|column| column.trim().to_string())
                    .filter(|column| !column.is_empty())
                    .collect(),
            )
        } else if self.person_key {
            KeyStrategy::PersonName
        } else if self.id_key {
            KeyStrategy::CheckDigitId
        } else {
            KeyStrategy::Auto
        }
    }
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// YAML configuration overriding the default thresholds
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Read sources in chunks of this many rows
    #[arg(long = "chunk-rows")]
    pub chunk_rows: Option<usize>,
    /// Delimiter for text sources (supports ',', 'tab', ';', '|'); sniffed when omitted
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of text sources (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Source to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Sheet selector: a name, a 1-based position, `first`, or `all`
    #[arg(long, default_value = "first")]
    pub sheet: SheetSelector,
    #[command(flatten)]
    pub key: KeyArgs,
    #[command(flatten)]
    pub input_args: InputArgs,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Destination YAML file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum AnalysisArg {
    Duplicates,
    Missing,
    Incomplete,
}

impl From<AnalysisArg> for Analysis {
    fn from(value: AnalysisArg) -> Self {
        match value {
            AnalysisArg::Duplicates => Analysis::Duplicates,
            AnalysisArg::Missing => Analysis::Missing,
            AnalysisArg::Incomplete => Analysis::Incomplete,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum ScopeArg {
    Consolidated,
    PerSource,
    Both,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Consolidated => Scope::Consolidated,
            ScopeArg::PerSource => Scope::PerSource,
            ScopeArg::Both => Scope::Both,
        }
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_args_parse_analyses_and_key_choice() {
        let cli = Cli::try_parse_from([
            "csv-reconcile",
            "compare",
            "-a",
            "a.csv",
            "-b",
            "b.xlsx",
            "--sheet-b",
            "all",
            "--analysis",
            "missing,duplicates",
            "--key-columns",
            "nombre, paterno",
        ])
        .expect("parse compare");
        let Commands::Compare(args) = cli.command else {
            panic!("expected compare");
        };
        assert_eq!(args.sheet_b, SheetSelector::All);
        assert_eq!(
            args.run.analyses,
            vec![AnalysisArg::Missing, AnalysisArg::Duplicates]
        );
        assert_eq!(
            args.run.key.strategy(),
            KeyStrategy::Composite(vec!["nombre".to_string(), "paterno".to_string()])
        );
    }

    #[test]
    fn key_options_conflict() {
        let result = Cli::try_parse_from([
            "csv-reconcile",
            "compare",
            "-a",
            "a.csv",
            "-b",
            "b.csv",
            "--key",
            "RUT",
            "--person-key",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn id_key_selects_check_digit_strategy() {
        let cli = Cli::try_parse_from(["csv-reconcile", "inspect", "-i", "a.csv", "--id-key"])
            .expect("parse inspect");
        let Commands::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(args.key.strategy(), KeyStrategy::CheckDigitId);

        let result = Cli::try_parse_from([
            "csv-reconcile",
            "inspect",
            "-i",
            "a.csv",
            "--id-key",
            "--person-key",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn delimiter_names_resolve() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert!(parse_delimiter("::").is_err());
    }
}
