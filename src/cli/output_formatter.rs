use colored::*;
use serde_json::{json, Value as JsonValue};
use crate::cli::cli_args::OutputFormat;
use crate::demo::ScenarioReport;
use crate::engine::query_compiler::CompiledQuery;
use crate::utils::error::RelqError;
use crate::utils::types::Value;

/// Formats scenario output for the terminal
pub struct OutputFormatter;

impl OutputFormatter {
    /// Format a scenario report according to the specified format
    pub fn format_report(report: &ScenarioReport, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(report),
            OutputFormat::Json => Self::format_json(report),
        }
    }

    fn format_table(report: &ScenarioReport) -> String {
        let mut output = format!("{} {}\n", "Scenario".bold(), report.scenario.name().cyan().bold());

        if report.rows.is_empty() {
            output.push_str(&"No results found.".dimmed().to_string());
            output.push('\n');
            return output;
        }

        let mut col_widths: Vec<usize> = report.columns.iter().map(|c| c.len()).collect();
        for row in &report.rows {
            for (i, value) in row.iter().enumerate() {
                if let Some(width) = col_widths.get_mut(i) {
                    *width = (*width).max(Self::value_to_string(value).len());
                }
            }
        }
        for width in &mut col_widths {
            *width = (*width).max(8);
        }

        output.push_str(&Self::format_table_separator(&col_widths, true));
        output.push('|');
        for (i, column) in report.columns.iter().enumerate() {
            // pad before coloring, escape codes would otherwise count as width
            let cell = format!("{:<width$}", column, width = col_widths[i]);
            output.push_str(&format!(" {} |", cell.bold().cyan()));
        }
        output.push('\n');
        output.push_str(&Self::format_table_separator(&col_widths, false));

        for row in &report.rows {
            output.push('|');
            for (i, value) in row.iter().enumerate() {
                if let Some(width) = col_widths.get(i) {
                    let cell = format!("{:<width$}", Self::value_to_string(value), width = width);
                    output.push_str(&format!(" {} |", Self::colorize(value, cell)));
                }
            }
            output.push('\n');
        }
        output.push_str(&Self::format_table_separator(&col_widths, true));

        output.push_str(&format!(
            "{} {}",
            report.rows.len().to_string().green().bold(),
            if report.rows.len() == 1 { "row" } else { "rows" },
        ));
        if let Some(total) = report.total {
            output.push_str(&format!(" of {} total", total.to_string().green().bold()));
        }
        output.push('\n');
        output
    }

    fn format_table_separator(col_widths: &[usize], is_border: bool) -> String {
        let edge = if is_border { '+' } else { '|' };
        let mut separator = String::new();
        separator.push(edge);
        for &width in col_widths {
            separator.push_str(&"-".repeat(width + 2));
            separator.push(edge);
        }
        separator.push('\n');
        separator
    }

    fn format_json(report: &ScenarioReport) -> String {
        let rows: Vec<JsonValue> = report
            .rows
            .iter()
            .map(|row| {
                let object = report
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.clone(), Self::value_to_json(value)))
                    .collect::<serde_json::Map<_, _>>();
                JsonValue::Object(object)
            })
            .collect();

        let output = json!({
            "scenario": report.scenario.name(),
            "data": rows,
            "metadata": {
                "columns": report.columns,
                "row_count": report.rows.len(),
                "total": report.total,
            }
        });

        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format compiled statements with their bound parameters
    pub fn format_compiled(compiled: &[CompiledQuery]) -> String {
        let mut output = String::new();
        for query in compiled {
            output.push_str(&format!("{} {}\n", "--".dimmed(), query.dialect.to_string().yellow()));
            output.push_str(&format!("{}\n", query.sql));
            if !query.params.is_empty() {
                let params: Vec<String> = query
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, value)| format!("{}={}", i + 1, Self::value_to_string(value)))
                    .collect();
                output.push_str(&format!("{} {}\n", "params:".blue().bold(), params.join(", ")));
            }
        }
        output
    }

    /// Format DDL statements, one per line
    pub fn format_statements(statements: &[String]) -> String {
        statements
            .iter()
            .map(|statement| format!("{};\n", statement))
            .collect()
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format!("{:.2}", f),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "NULL".to_string(),
        }
    }

    fn colorize(value: &Value, cell: String) -> ColoredString {
        match value {
            Value::Text(_) => cell.normal(),
            Value::Integer(_) | Value::Float(_) => cell.blue(),
            Value::Boolean(true) => cell.green(),
            Value::Boolean(false) => cell.red(),
            Value::Null => cell.dimmed(),
        }
    }

    fn value_to_json(value: &Value) -> JsonValue {
        match value {
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Null => JsonValue::Null,
        }
    }

    /// Format error message for CLI display
    pub fn format_error(error: &RelqError) -> String {
        format!("{} {}", "Error:".red().bold(), error.to_string().red())
    }

    /// Format info message for CLI display
    pub fn format_info(message: &str) -> String {
        format!("{} {}", "Info:".blue().bold(), message)
    }
}
