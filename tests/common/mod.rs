#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};
use csv_reconcile::report::ReportSink;
use rust_xlsxwriter::Workbook;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a workbook with one sheet per entry. Cells that parse as numbers
    /// are stored as numbers; empty cells are left blank.
    pub fn write_xlsx(&self, name: &str, sheets: &[(&str, Vec<Vec<&str>>)]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut workbook = Workbook::new();
        for (sheet, rows) in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(*sheet).expect("sheet name");
            for (row, cells) in rows.iter().enumerate() {
                for (col, cell) in cells.iter().enumerate() {
                    if cell.is_empty() {
                        continue;
                    }
                    match cell.parse::<f64>() {
                        Ok(number) => worksheet
                            .write_number(row as u32, col as u16, number)
                            .expect("write number"),
                        Err(_) => worksheet
                            .write_string(row as u32, col as u16, *cell)
                            .expect("write string"),
                    };
                }
            }
        }
        workbook.save(&path).expect("save workbook");
        path
    }
}

/// Reads every sheet of a workbook into display strings, keyed by sheet name
/// in workbook order.
pub fn read_workbook(path: &Path) -> Vec<(String, Vec<Vec<String>>)> {
    let mut workbook = open_workbook_auto(path).expect("open report");
    let names = workbook.sheet_names().to_vec();
    names
        .into_iter()
        .map(|name| {
            let range = workbook.worksheet_range(&name).expect("read sheet");
            let rows = range
                .rows()
                .map(|row| row.iter().map(cell_text).collect())
                .collect();
            (name, rows)
        })
        .collect()
}

pub fn sheet<'a>(sheets: &'a [(String, Vec<Vec<String>>)], name: &str) -> &'a [Vec<String>] {
    sheets
        .iter()
        .find(|(sheet, _)| sheet == name)
        .map(|(_, rows)| rows.as_slice())
        .unwrap_or_else(|| {
            let names = sheets.iter().map(|(sheet, _)| sheet.as_str()).collect::<Vec<_>>();
            panic!("sheet '{name}' not found in {names:?}")
        })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) if value.fract() == 0.0 => format!("{value:.0}"),
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => format!("{other:?}"),
    }
}

/// Sink that refuses the listed targets as locked and writes everything else
/// to disk.
#[derive(Default)]
pub struct LockedSink {
    pub locked: HashSet<PathBuf>,
    pub lock_everything: bool,
    pub attempts: Vec<PathBuf>,
}

impl LockedSink {
    pub fn locking(path: &Path) -> Self {
        Self {
            locked: HashSet::from([path.to_path_buf()]),
            ..Self::default()
        }
    }
}

impl ReportSink for LockedSink {
    fn persist(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        self.attempts.push(target.to_path_buf());
        if self.lock_everything || self.locked.contains(target) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is open in another program",
            ));
        }
        fs::write(target, bytes)
    }
}
