use crate::models::{
    Cell, Table, TableError, TableStyle, TRAINING_STATUS, TRAINING_TITLE, USER_EMAIL, USER_FULL_NAME, USER_ID,
};
use std::collections::HashMap;
use tracing::{debug, warn};

const TABLE_STYLE: &str = "border-collapse: collapse; border-spacing: 0px; margin: 10px; border: 1px solid #333;";
const HEADER_LABELS: [&str; 4] = ["SGID", "Employee Name", "Course", "Status"];

/// One employee's outstanding trainings, ready to be mailed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub user_id: String,
    pub full_name: String,
    pub email: Option<String>,
    /// The first training record of the group, all columns.
    pub record: Vec<Cell>,
    pub training_count: usize,
    pub training_details: String,
}

/// How a user's records are laid out in the details table.
#[derive(Debug)]
pub enum GroupShape<'a> {
    Single(&'a [Cell]),
    Multi(Vec<&'a [Cell]>),
}

impl<'a> GroupShape<'a> {
    fn from_rows(mut rows: Vec<&'a [Cell]>) -> Self {
        if rows.len() == 1 {
            GroupShape::Single(rows.remove(0))
        } else {
            GroupShape::Multi(rows)
        }
    }

    fn first(&self) -> &'a [Cell] {
        match self {
            GroupShape::Single(row) => *row,
            GroupShape::Multi(rows) => rows[0],
        }
    }

    fn rows(&self) -> Vec<&'a [Cell]> {
        match self {
            GroupShape::Single(row) => vec![*row],
            GroupShape::Multi(rows) => rows.clone(),
        }
    }
}

/// Column positions the renderer reads, resolved once per table.
struct Fields {
    id: usize,
    name: usize,
    title: usize,
    status: usize,
    email: Option<usize>,
}

impl Fields {
    fn resolve(table: &Table) -> Result<Self, TableError> {
        Ok(Self {
            id: table.column_index(USER_ID)?,
            name: table.column_index(USER_FULL_NAME)?,
            title: table.column_index(TRAINING_TITLE)?,
            status: table.column_index(TRAINING_STATUS)?,
            email: table.column_index(USER_EMAIL).ok(),
        })
    }
}

/// Groups the unified table by user ID and renders one details table per user.
///
/// Groups come out in the order their first row appears; rows keep table order
/// inside a group. Identity fields are taken from the first row of each group.
pub fn aggregate_by_user(table: &Table, style: &TableStyle) -> Result<Vec<AggregatedRow>, TableError> {
    let fields = Fields::resolve(table)?;

    let mut order: Vec<(String, Vec<&[Cell]>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in &table.rows {
        if row[fields.id].is_empty() {
            let name = &row[fields.name];
            warn!(name = %name, "skipping training record without a user ID");
            continue;
        }
        let key = row[fields.id].to_text();
        match index.get(&key) {
            Some(&i) => order[i].1.push(row.as_slice()),
            None => {
                index.insert(key.clone(), order.len());
                order.push((key, vec![row.as_slice()]));
            }
        }
    }

    let aggregated: Vec<AggregatedRow> = order
        .into_iter()
        .map(|(user_id, rows)| {
            let shape = GroupShape::from_rows(rows);
            check_identity(&user_id, &shape, &fields);
            build_row(user_id, &shape, &fields, style)
        })
        .collect();

    debug!(users = aggregated.len(), records = table.len(), "aggregated by user");
    Ok(aggregated)
}

fn build_row(user_id: String, shape: &GroupShape<'_>, fields: &Fields, style: &TableStyle) -> AggregatedRow {
    let first = shape.first();
    AggregatedRow {
        user_id,
        full_name: first[fields.name].to_text(),
        email: fields
            .email
            .map(|i| &first[i])
            .filter(|cell| !cell.is_empty())
            .map(Cell::to_text),
        record: first.to_vec(),
        training_count: shape.rows().len(),
        training_details: render_details(shape, fields, style),
    }
}

/// Identity fields are assumed constant within a group; divergence is logged
/// and the first row wins. Returns the columns that diverged.
fn check_identity(user_id: &str, shape: &GroupShape<'_>, fields: &Fields) -> Vec<&'static str> {
    let GroupShape::Multi(rows) = shape else {
        return Vec::new();
    };

    let mut checked = vec![(USER_FULL_NAME, fields.name)];
    if let Some(email) = fields.email {
        checked.push((USER_EMAIL, email));
    }

    let mut diverged = Vec::new();
    for (column, idx) in checked {
        let kept = &rows[0][idx];
        if rows.iter().skip(1).any(|row| &row[idx] != kept) {
            warn!(user_id, column, kept = %kept, "identity field differs between training records of one user");
            diverged.push(column);
        }
    }
    diverged
}

fn render_details(shape: &GroupShape<'_>, fields: &Fields, style: &TableStyle) -> String {
    let mut html = format!("\n<table style=\"{}\">\n<thead>\n<tr>\n", TABLE_STYLE);
    for label in HEADER_LABELS {
        html.push_str(&format!("<th style=\"{}\">{}</th>\n", style.header, label));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");

    let first = shape.first();
    let id = escape_html(&first[fields.id].to_text());
    let name = escape_html(&first[fields.name].to_text());
    let cell = |value: &str| format!("<td style=\"{}\">{}</td>\n", style.cell, value);

    match shape {
        GroupShape::Single(row) => {
            html.push_str("<tr>\n");
            for value in [id, name, text_of(row, fields.title), text_of(row, fields.status)] {
                html.push_str(&cell(&value));
            }
            html.push_str("</tr>\n");
        }
        GroupShape::Multi(rows) => {
            let span = rows.len();
            html.push_str("<tr>\n");
            for value in [id, name] {
                html.push_str(&format!("<td rowspan=\"{}\" style=\"{}\">{}</td>\n", span, style.cell, value));
            }
            for (i, row) in rows.iter().enumerate() {
                if i > 0 {
                    html.push_str("<tr>\n");
                }
                html.push_str(&cell(&text_of(row, fields.title)));
                html.push_str(&cell(&text_of(row, fields.status)));
                html.push_str("</tr>\n");
            }
        }
    }

    html.push_str("</tbody>\n</table>\n");
    html
}

fn text_of(row: &[Cell], idx: usize) -> String {
    escape_html(&row[idx].to_text())
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
