use crate::aggregator::{escape_html, AggregatedRow};
use crate::models::TRAINING_DETAILS;
use anyhow::Result;
use csv::Writer;
use std::fs;
use std::path::Path;

/// One line per user: the first training record's columns plus the rendered
/// `Training Details` fragment.
pub fn write_aggregated_csv(rows: &[AggregatedRow], columns: &[String], path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(path)?;

    let mut header: Vec<&str> = columns.iter().map(String::as_str).collect();
    header.push(TRAINING_DETAILS);
    writer.write_record(&header)?;

    for row in rows {
        let mut record: Vec<String> = row
            .record
            .iter()
            .map(|cell| if cell.is_empty() { String::new() } else { cell.to_text() })
            .collect();
        record.resize(columns.len(), String::new());
        record.push(row.training_details.clone());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn render_preview(rows: &[AggregatedRow]) -> String {
    let sections: String = rows
        .iter()
        .map(|row| {
            format!(
                "<section>\n<h2>{name} ({id}) - {count} outstanding</h2>\n{details}</section>\n",
                name = escape_html(&row.full_name),
                id = escape_html(&row.user_id),
                count = row.training_count,
                details = row.training_details,
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Outstanding trainings</title>
</head>
<body>
<h1>Outstanding trainings: {users} employees</h1>
{sections}</body>
</html>
"#,
        users = rows.len(),
        sections = sections,
    )
}

pub fn write_preview_html(rows: &[AggregatedRow], path: &Path) -> Result<()> {
    fs::write(path, render_preview(rows))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    fn row(id: &str, details: &str) -> AggregatedRow {
        AggregatedRow {
            user_id: id.to_string(),
            full_name: "ASHA RAO".to_string(),
            email: None,
            record: vec![Cell::from(id), Cell::Empty],
            training_count: 1,
            training_details: details.to_string(),
        }
    }

    #[test]
    fn csv_has_details_column_and_one_line_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aggregated.csv");
        let columns = vec!["User - User ID".to_string(), "User - Location".to_string()];

        write_aggregated_csv(&[row("U1", "<table>a</table>"), row("U2", "<table>b</table>")], &columns, &path)
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["User - User ID", "User - Location", "Training Details"]);

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "");
        assert_eq!(&records[1][2], "<table>b</table>");
    }

    #[test]
    fn preview_embeds_every_fragment() {
        let html = render_preview(&[row("U1", "<table>a</table>"), row("U<2>", "<table>b</table>")]);
        assert!(html.contains("Outstanding trainings: 2 employees"));
        assert!(html.contains("<table>a</table>"));
        assert!(html.contains("U&lt;2&gt;"));
    }
}
