use crate::models::{Table, TableError, USER_FULL_NAME};
use regex::Regex;
use std::sync::OnceLock;

pub const TRAINING_RECORD_PREFIX: &str = "Training record - ";
pub const TRAINING_PREFIX: &str = "Training - ";
pub const USER_PREFIX: &str = "User - ";

/// Maps a raw export column onto its namespaced name.
///
/// "Training record" is checked before "Training" so record columns are not
/// swallowed by the broader course namespace.
pub fn namespace_column(name: &str) -> String {
    if name.starts_with("Training record") {
        format!("{}{}", TRAINING_RECORD_PREFIX, name)
    } else if name.starts_with("Training") {
        format!("{}{}", TRAINING_PREFIX, name)
    } else {
        format!("{}{}", USER_PREFIX, name)
    }
}

pub fn normalize_columns(table: &mut Table) {
    for column in &mut table.columns {
        *column = namespace_column(column);
    }
}

/// Normalize a display name into a grouping key: drop punctuation and symbols,
/// trim, upper-case.
pub fn clean_full_name(name: &str) -> String {
    static SPECIAL: OnceLock<Regex> = OnceLock::new();
    let special = SPECIAL.get_or_init(|| Regex::new(r"[^\w\s]").unwrap());
    special.replace_all(name, "").trim().to_uppercase()
}

pub fn clean_full_names(table: &mut Table) -> Result<(), TableError> {
    table.map_text_column(USER_FULL_NAME, clean_full_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    #[test]
    fn training_record_prefix_wins_over_training() {
        assert_eq!(
            namespace_column("Training record status"),
            "Training record - Training record status"
        );
        assert_eq!(namespace_column("Training title"), "Training - Training title");
        assert_eq!(namespace_column("Division"), "User - Division");
        // Prefix matching is case-sensitive.
        assert_eq!(namespace_column("training title"), "User - training title");
    }

    #[test]
    fn every_normalized_column_has_exactly_one_namespace() {
        let mut table = Table::new(
            ["User ID", "Training", "Training record", "Trainingrecord x", "", "Unnamed: 4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        normalize_columns(&mut table);

        for column in &table.columns {
            let matches = [TRAINING_RECORD_PREFIX, TRAINING_PREFIX, USER_PREFIX]
                .iter()
                .filter(|p| column.starts_with(**p))
                .count();
            assert_eq!(matches, 1, "{}", column);
        }
        assert_eq!(table.columns[3], "Training - Trainingrecord x");
        assert_eq!(table.columns[4], "User - ");
    }

    #[test]
    fn full_names_are_stripped_and_uppercased() {
        assert_eq!(clean_full_name("  O'Brien, Mary-Jane. "), "OBRIEN MARYJANE");
        assert_eq!(clean_full_name("José Núñez"), "JOSÉ NÚÑEZ");
        assert_eq!(clean_full_name("snake_case"), "SNAKE_CASE");
    }

    #[test]
    fn missing_names_become_nan_text() {
        let mut table = Table::new(vec![USER_FULL_NAME.to_string()]);
        table.push_row(vec![Cell::Empty]);
        table.push_row(vec![Cell::Int(7)]);
        clean_full_names(&mut table).unwrap();
        assert_eq!(table.rows[0][0], Cell::from("NAN"));
        assert_eq!(table.rows[1][0], Cell::from("7"));
    }

    #[test]
    fn cleaning_without_name_column_fails() {
        let mut table = Table::new(vec!["User - Division".to_string()]);
        assert!(matches!(
            clean_full_names(&mut table),
            Err(TableError::MissingColumn(_))
        ));
    }
}
