use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const USER_ID: &str = "User - User ID";
pub const USER_FULL_NAME: &str = "User - User full name";
pub const USER_EMAIL: &str = "User - User e-mail";
pub const USER_DIVISION: &str = "User - Division";
pub const USER_CADRE: &str = "User - Cadre Indicator";
pub const TRAINING_TITLE: &str = "Training - Training title";
pub const TRAINING_STATUS: &str = "Training record - Training record status";
pub const TRAINING_DETAILS: &str = "Training Details";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_directory: Option<String>,
    pub output_directory: Option<String>,
    /// Banner rows above the header in every export
    pub skip_rows: usize,
    pub drop_missing_cadre: bool,
    pub filter: FilterConfig,
    pub style: TableStyle,
    pub database: DatabaseConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub division: String,
    pub completed_prefix: String,
}

/// Inline CSS injected verbatim into the `style` attribute of the rendered cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStyle {
    pub header: String,
    pub cell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub procedure: String,
    pub trust_cert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub recipient: String,
    pub send_to_user: bool,
    pub max_emails: usize,
    pub course_link: String,
    pub test_banner: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: Some("data-source".to_string()),
            output_directory: Some("output".to_string()),
            skip_rows: 13,
            drop_missing_cadre: false,
            filter: FilterConfig::default(),
            style: TableStyle::default(),
            database: DatabaseConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            division: "indec".to_string(),
            completed_prefix: "completed".to_string(),
        }
    }
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            header: "background-color: #f2f2f2; text-align: center; padding: 10px; border: 2px solid #333; width: 150px;".to_string(),
            cell: "text-align: center; padding: 10px; border: 2px solid #333;".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: "Boost_training".to_string(),
            username: "".to_string(),
            password: "".to_string(),
            procedure: "Boost_Training".to_string(),
            trust_cert: true,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            recipient: "training-reminders@example.com".to_string(),
            send_to_user: false,
            max_emails: 10,
            course_link: "https://example.com/learning-portal".to_string(),
            test_banner: true,
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("no source tables to stack")]
    NoSources,
}

/// A single spreadsheet value as read from an export.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Text coercion used by every string comparison in the pipeline.
    /// Missing values become `"nan"`, so they never equal a real division
    /// and never look completed.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => f.write_str("nan"),
            Cell::Text(s) => f.write_str(s),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) if v.is_nan() => f.write_str("nan"),
            Cell::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Bool(true) => f.write_str("True"),
            Cell::Bool(false) => f.write_str("False"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

/// An in-memory sheet: ordered column labels and rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Appends a row, padding or truncating it to the table width.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Empty);
        self.rows.push(row);
    }

    /// Rewrites one column through `f`, coercing every value to text first.
    pub fn map_text_column<F>(&mut self, name: &str, f: F) -> Result<(), TableError>
    where
        F: Fn(&str) -> String,
    {
        let idx = self.column_index(name)?;
        for row in &mut self.rows {
            let text = row[idx].to_text();
            row[idx] = Cell::Text(f(&text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_text_coercion() {
        assert_eq!(Cell::Empty.to_text(), "nan");
        assert_eq!(Cell::Int(42).to_text(), "42");
        assert_eq!(Cell::Float(3.0).to_text(), "3.0");
        assert_eq!(Cell::Float(2.5).to_text(), "2.5");
        assert_eq!(Cell::Bool(true).to_text(), "True");
        assert_eq!(Cell::from("Safety").to_text(), "Safety");
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let table = Table::new(vec!["User - Division".to_string()]);
        let err = table.column_index(USER_ID).unwrap_err();
        assert_eq!(err.to_string(), "missing column: User - User ID");
    }

    #[test]
    fn push_row_pads_short_rows() {
        let mut table = Table::new(vec!["a".into(), "b".into(), "c".into()]);
        table.push_row(vec![Cell::from("x")]);
        assert_eq!(table.rows[0], vec![Cell::from("x"), Cell::Empty, Cell::Empty]);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.email.max_emails = 3;
        config.save_to_file(path).unwrap();

        let loaded = Config::load_from_file(path).unwrap();
        assert_eq!(loaded.email.max_emails, 3);
        assert_eq!(loaded.skip_rows, 13);
        assert_eq!(loaded.database.procedure, "Boost_Training");
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: Config = toml::from_str("[database]\nhost = \"10.0.0.5\"\n").unwrap();
        assert_eq!(config.database.host, "10.0.0.5");
        assert_eq!(config.database.port, 1433);
        assert_eq!(config.filter.division, "indec");
        assert_eq!(config.email.max_emails, 10);
    }
}
