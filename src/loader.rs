use crate::models::{Cell, Table};
use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

pub struct ExportLoader {
    skip_rows: usize,
}

impl ExportLoader {
    pub fn new(skip_rows: usize) -> Self {
        Self { skip_rows }
    }

    /// Reads one training export. The first `skip_rows` rows of the sheet are
    /// report banner; the row after them holds the column names.
    pub fn load_file(&self, path: &Path) -> Result<Table> {
        let table = match extension_of(path).as_deref() {
            Some("csv") => self.load_csv(path)?,
            Some(ext) if SPREADSHEET_EXTENSIONS.contains(&ext) => self.load_workbook(path)?,
            _ => bail!("Unsupported file type: {}", path.display()),
        };

        info!(
            file = %path.display(),
            rows = table.len(),
            columns = table.columns.len(),
            "loaded export"
        );
        Ok(table)
    }

    fn load_workbook(&self, path: &Path) -> Result<Table> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("Workbook has no worksheets: {}", path.display()))?
            .with_context(|| format!("Failed to read first worksheet: {}", path.display()))?;

        // calamine trims leading blank rows and columns; put them back so the
        // skip count matches what the user sees in the sheet.
        let (start_row, start_col) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        debug!(start_row, start_col, "worksheet range origin");

        let mut rows = range.rows().enumerate().filter_map(|(i, row)| {
            if start_row + i < self.skip_rows {
                return None;
            }
            let mut cells = vec![Cell::Empty; start_col];
            cells.extend(row.iter().map(cell_from_data));
            Some(cells)
        });

        let header = rows
            .next()
            .ok_or_else(|| anyhow!("No header row after skipping {} rows: {}", self.skip_rows, path.display()))?;

        let mut table = Table::new(header_names(&header));
        for row in rows {
            table.push_row(row);
        }
        Ok(table)
    }

    fn load_csv(&self, path: &Path) -> Result<Table> {
        let file = File::open(path).with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        let mut file = BufReader::new(file);

        // The csv reader drops blank lines, so the banner is skipped by
        // physical line to match the sheet layout.
        let mut line = String::new();
        for _ in 0..self.skip_rows {
            line.clear();
            let read = file
                .read_line(&mut line)
                .with_context(|| format!("Failed to read CSV banner: {}", path.display()))?;
            if read == 0 {
                break;
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = reader.records();

        let header = match records.next() {
            Some(record) => record.with_context(|| format!("Failed to read CSV header: {}", path.display()))?,
            None => bail!("No header row after skipping {} rows: {}", self.skip_rows, path.display()),
        };
        let header: Vec<Cell> = header.iter().map(cell_from_text).collect();

        let mut table = Table::new(header_names(&header));
        for record in records {
            let record = record.with_context(|| format!("Failed to read CSV record: {}", path.display()))?;
            table.push_row(record.iter().map(cell_from_text).collect());
        }
        Ok(table)
    }
}

/// Lists the supported export files in `dir`, ordered by file name.
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if is_supported(&path) {
            inputs.push(path);
        } else {
            warn!(file = %path.display(), "skipping unsupported file");
        }
    }

    inputs.sort();
    Ok(inputs)
}

pub fn is_supported(path: &Path) -> bool {
    match extension_of(path).as_deref() {
        Some("csv") => true,
        Some(ext) => SPREADSHEET_EXTENSIONS.contains(&ext),
        None => false,
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

fn header_names(header: &[Cell]) -> Vec<String> {
    header
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Cell::Empty => format!("Unnamed: {}", i),
            other => other.to_text(),
        })
        .collect()
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Int(*i),
        // Excel stores every number as a float; whole numbers are ids and counts.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Cell::Int(*f as i64),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Bool(*b),
        other => Cell::Text(other.to_string()),
    }
}

fn cell_from_text(field: &str) -> Cell {
    if field.is_empty() {
        Cell::Empty
    } else {
        Cell::Text(field.to_string())
    }
}
