//! Advisory resource estimation. Nothing here changes what a run computes; it
//! only decides read strategy, categorical encoding, and what gets logged.

use std::{fs, path::Path};

use log::{info, warn};
use serde::Serialize;

use crate::{
    config::IngestConfig,
    dataset::{ColumnEncoding, ColumnStats, Dataset},
    error::Result,
    io_utils,
};

const MIB: u64 = 1024 * 1024;
const LOW_MEMORY_ESTIMATE: u64 = 500 * MIB;
const LOW_MEMORY_AVAILABLE: u64 = 2 * 1024 * MIB;
/// Rough bytes per written cell in a styled xlsx sheet.
const OUTPUT_BYTES_PER_CELL: u64 = 12;

#[derive(Debug, Clone, Serialize)]
pub struct ResourcePlan {
    pub file_size: u64,
    pub available_memory: Option<u64>,
    pub large_source: bool,
    pub recommended_chunk_rows: Option<usize>,
}

impl ResourcePlan {
    pub fn for_source(path: &Path, config: &IngestConfig) -> Result<Self> {
        let file_size = io_utils::file_size(path)?;
        Ok(Self::from_size(file_size, available_memory(), config))
    }

    pub fn from_size(file_size: u64, available_memory: Option<u64>, config: &IngestConfig) -> Self {
        let large_source = file_size > config.large_file_bytes;
        Self {
            file_size,
            available_memory,
            large_source,
            recommended_chunk_rows: large_source.then_some(config.chunk_rows),
        }
    }

    pub fn log(&self, origin: &str) {
        info!(
            "{origin}: {:.2} MB on disk{}",
            self.file_size as f64 / MIB as f64,
            if self.large_source {
                " (large source, chunked read)"
            } else {
                ""
            }
        );
        if let Some(available) = self.available_memory {
            info!(
                "Available memory: {:.2} GB",
                available as f64 / (1024 * MIB) as f64
            );
        }
    }
}

/// Decides how a loaded text column is stored. Large sources switch to the
/// shared-string form below one distinct ratio, medium-sized datasets below a
/// looser one; everything else stays plain text.
pub fn encoding_decision(
    stats: &ColumnStats,
    large_source: bool,
    config: &IngestConfig,
) -> ColumnEncoding {
    let ratio = stats.distinct_ratio();
    if large_source && ratio < config.large_categorical_ratio {
        ColumnEncoding::Categorical
    } else if stats.rows > config.medium_dataset_rows && ratio < config.medium_categorical_ratio {
        ColumnEncoding::Categorical
    } else {
        ColumnEncoding::Text
    }
}

/// Whether the estimated in-memory size warrants a warning given what is free.
pub fn low_memory(estimated: u64, available: Option<u64>) -> bool {
    matches!(available, Some(free) if estimated > LOW_MEMORY_ESTIMATE && free < LOW_MEMORY_AVAILABLE)
}

pub fn check_memory(dataset: &Dataset, available: Option<u64>) -> u64 {
    let estimated = dataset.estimated_bytes();
    info!(
        "{}: ~{:.2} MB in memory",
        dataset.origin(),
        estimated as f64 / MIB as f64
    );
    if low_memory(estimated, available) {
        warn!(
            "{} needs ~{:.0} MB while only {:.2} GB are available; close other applications or split the source",
            dataset.origin(),
            estimated as f64 / MIB as f64,
            available.unwrap_or_default() as f64 / (1024 * MIB) as f64
        );
    }
    estimated
}

pub fn estimate_output_bytes(rows: usize, columns: usize) -> u64 {
    rows as u64 * columns as u64 * OUTPUT_BYTES_PER_CELL
}

/// Available memory in bytes from `/proc/meminfo`; `None` where it cannot be read.
pub fn available_memory() -> Option<u64> {
    fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| parse_meminfo(&text))
}

fn parse_meminfo(text: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kib = rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()?;
        Some(kib * 1024)
    })
}
