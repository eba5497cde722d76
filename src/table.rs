//! Plain-text tables for the listing commands and the run summary.

use std::borrow::Cow;
use std::fmt::Write as _;

use itertools::Itertools;

use crate::{columns::ColumnCatalog, customer::CustomerConfig, process::CustomerStatus};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count().max(1)).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", sanitize_cell(value), width = *width))
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|h| h.to_string()).collect()
}

pub fn customer_table(configs: &[CustomerConfig]) -> (Vec<String>, Vec<Vec<String>>) {
    let rows = configs
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                if c.enabled { "yes" } else { "no" }.to_string(),
                c.file_format.to_string(),
                c.file_encoding.clone(),
                c.source_container.clone(),
                c.destination_container.clone(),
                c.concern_ids.iter().join(","),
                c.exclude_columns
                    .as_deref()
                    .unwrap_or_default()
                    .join(","),
            ]
        })
        .collect();
    (
        headers(&[
            "name",
            "enabled",
            "format",
            "encoding",
            "source",
            "destination",
            "concerns",
            "excluded",
        ]),
        rows,
    )
}

pub fn column_table(catalog: &ColumnCatalog) -> (Vec<String>, Vec<Vec<String>>) {
    let rows = catalog
        .iter()
        .map(|spec| {
            vec![
                spec.source_key.clone(),
                spec.display_name.clone(),
                spec.dtype_label().to_string(),
                spec.data_type
                    .decimals()
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                spec.data_type
                    .length()
                    .map(|l| l.to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    (headers(&["key", "name", "dtype", "decimals", "length"]), rows)
}

pub fn status_table(statuses: &[CustomerStatus]) -> (Vec<String>, Vec<Vec<String>>) {
    let rows = statuses
        .iter()
        .map(|status| {
            let (state, detail) = match &status.result {
                Ok(outcome) => ("ok".to_string(), outcome.to_string()),
                Err(err) => ("failed".to_string(), err.clone()),
            };
            vec![status.name.clone(), state, status.attempts.to_string(), detail]
        })
        .collect();
    (headers(&["customer", "status", "attempts", "detail"]), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{ColumnSpec, DataType};

    #[test]
    fn columns_are_padded_to_the_widest_cell() {
        let rendered = render_table(
            &["key".to_string(), "name".to_string()],
            &[vec!["Paino".to_string(), "Weight\nkg".to_string()]],
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "key    name");
        assert_eq!(lines[1], "-----  ---------");
        assert_eq!(lines[2], "Paino  Weight kg");
    }

    #[test]
    fn column_table_shows_precision_only_where_declared() {
        let catalog: ColumnCatalog = [
            ColumnSpec::new("A", "ValueA", DataType::Float { decimals: Some(2) }),
            ColumnSpec::new("B", "ValueB", DataType::String { length: None }),
        ]
        .into_iter()
        .collect();
        let (_, rows) = column_table(&catalog);
        assert_eq!(rows[0], vec!["A", "ValueA", "float", "2", ""]);
        assert_eq!(rows[1][3], "");
    }
}
