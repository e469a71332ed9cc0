//! Output rendering for the CLI surface: text, json, table, csv.

use crate::config::OutputFormat;
use crate::db::QueryOutput;

/// Render a query result in the requested format.
pub fn render_query_output(output: &QueryOutput, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(output)
            .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => render_csv(output),
        OutputFormat::Table => render_table(output, true),
        OutputFormat::Text => {
            if output.rows.is_empty() {
                format!("{} row(s) affected", output.rows_affected)
            } else {
                let mut text = render_table(output, false);
                text.push_str(&format!("\n{} row(s)", output.rows.len()));
                text
            }
        }
    }
}

/// Render an arbitrary JSON document (health, status, listings).
pub fn render_value(value: &serde_json::Value, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
        }
        _ => render_value_text(value, 0),
    }
}

fn render_value_text(value: &serde_json::Value, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            let mut out = String::new();
            for (key, inner) in map {
                match inner {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        out.push_str(&format!("{pad}{key}:\n"));
                        out.push_str(&render_value_text(inner, indent + 1));
                    }
                    _ => out.push_str(&format!("{pad}{key}: {}\n", scalar_text(inner))),
                }
            }
            out
        }
        serde_json::Value::Array(items) => {
            let mut out = String::new();
            for inner in items {
                match inner {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        out.push_str(&format!("{pad}-\n"));
                        out.push_str(&render_value_text(inner, indent + 1));
                    }
                    _ => out.push_str(&format!("{pad}- {}\n", scalar_text(inner))),
                }
            }
            out
        }
        scalar => format!("{pad}{}\n", scalar_text(scalar)),
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn render_table(output: &QueryOutput, borders: bool) -> String {
    let columns = &output.columns;
    let rows: Vec<Vec<String>> = output
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i >= widths.len() {
                widths.push(cell.len());
            } else if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    let separator = |out: &mut String| {
        if borders {
            out.push('+');
            for width in &widths {
                out.push_str(&"-".repeat(width + 2));
                out.push('+');
            }
            out.push('\n');
        }
    };
    let render_row = |out: &mut String, cells: &[String]| {
        if borders {
            out.push('|');
        }
        for (i, &width) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            if borders {
                out.push_str(&format!(" {cell:<width$} |"));
            } else {
                out.push_str(&format!("{cell:<width$}  "));
            }
        }
        while out.ends_with(' ') {
            out.pop();
        }
        out.push('\n');
    };

    separator(&mut out);
    if !columns.is_empty() {
        let header: Vec<String> = columns.clone();
        render_row(&mut out, &header);
        separator(&mut out);
    }
    for row in &rows {
        render_row(&mut out, row);
    }
    separator(&mut out);
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

fn render_csv(output: &QueryOutput) -> String {
    let mut out = String::new();
    if !output.columns.is_empty() {
        let header: Vec<String> = output.columns.iter().map(|c| csv_escape(c)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
    }
    for row in &output.rows {
        let cells: Vec<String> = row.iter().map(|v| csv_escape(&cell_text(v))).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> QueryOutput {
        QueryOutput {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![serde_json::json!(1), serde_json::json!("ada")],
                vec![serde_json::json!(2), serde_json::json!("grace,h")],
            ],
            rows_affected: 0,
        }
    }

    #[test]
    fn csv_escapes_reserved_characters() {
        let csv = render_query_output(&sample(), OutputFormat::Csv);
        assert_eq!(csv, "id,name\n1,ada\n2,\"grace,h\"");
    }

    #[test]
    fn table_draws_borders() {
        let table = render_query_output(&sample(), OutputFormat::Table);
        assert!(table.starts_with("+"));
        assert!(table.contains("| id | name"));
        assert!(table.contains("| 1  | ada"));
    }

    #[test]
    fn text_appends_row_count() {
        let text = render_query_output(&sample(), OutputFormat::Text);
        assert!(text.ends_with("2 row(s)"));
    }

    #[test]
    fn text_for_write_statements_reports_affected() {
        let output = QueryOutput {
            rows_affected: 7,
            ..Default::default()
        };
        assert_eq!(
            render_query_output(&output, OutputFormat::Text),
            "7 row(s) affected"
        );
    }

    #[test]
    fn json_round_trips() {
        let json = render_query_output(&sample(), OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["columns"][0], "id");
    }

    #[test]
    fn value_text_renders_nested_maps() {
        let value = serde_json::json!({
            "status": "healthy",
            "checks": { "vault": { "status": "healthy" } },
        });
        let text = render_value(&value, OutputFormat::Text);
        assert!(text.contains("status: healthy"));
        assert!(text.contains("checks:"));
    }
}
