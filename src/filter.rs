use crate::models::{Cell, FilterConfig, Table, TableError, TRAINING_STATUS, USER_CADRE, USER_DIVISION};
use tracing::{debug, info};

/// Keeps the rows still needing action: target division, status not completed.
///
/// Division and status are coerced to text and lowercased in the returned
/// table. Missing values read as `"nan"`, so a blank division never matches and
/// a blank status never counts as completed.
pub fn filter_actionable(mut table: Table, criteria: &FilterConfig) -> Result<Table, TableError> {
    let division_idx = table.column_index(USER_DIVISION)?;
    let status_idx = table.column_index(TRAINING_STATUS)?;

    table.map_text_column(USER_DIVISION, str::to_lowercase)?;
    table.map_text_column(TRAINING_STATUS, str::to_lowercase)?;

    let division = criteria.division.to_lowercase();
    let completed = criteria.completed_prefix.to_lowercase();
    let before = table.len();

    table.rows.retain(|row| {
        row[division_idx].to_text() == division && !row[status_idx].to_text().starts_with(&completed)
    });

    debug!(before, after = table.len(), "filtered actionable rows");
    Ok(table)
}

/// Drops rows without a cadre indicator. Tables lacking the column pass through.
pub fn drop_missing_cadre(mut table: Table) -> Table {
    if let Ok(idx) = table.column_index(USER_CADRE) {
        table.rows.retain(|row| !row[idx].is_empty());
    }
    table
}

/// Filters every source independently and concatenates the survivors.
///
/// Sources are cloned before filtering, so the caller's tables keep their
/// original casing. Columns are the union of all sources in first-seen order;
/// cells a source does not have are left empty.
pub fn stack_sources(sources: &[Table], criteria: &FilterConfig) -> Result<Table, TableError> {
    if sources.is_empty() {
        return Err(TableError::NoSources);
    }

    let mut filtered = Vec::with_capacity(sources.len());
    for (i, source) in sources.iter().enumerate() {
        let table = filter_actionable(source.clone(), criteria)?;
        info!(source = i + 1, kept = table.len(), total = source.len(), "filtered source");
        filtered.push(table);
    }

    let mut columns: Vec<String> = Vec::new();
    for table in &filtered {
        for column in &table.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }

    let mut stacked = Table::new(columns);
    for table in filtered {
        let mapping: Vec<usize> = table
            .columns
            .iter()
            .map(|c| stacked.columns.iter().position(|s| s == c).unwrap_or_default())
            .collect();

        for row in table.rows {
            let mut out = vec![Cell::Empty; stacked.columns.len()];
            for (cell, &target) in row.into_iter().zip(&mapping) {
                out[target] = cell;
            }
            stacked.rows.push(out);
        }
    }

    Ok(stacked)
}
