//! Export service: CSV, SpreadsheetML and JSON artifacts from report rows.
//!
//! CSV and Excel output is always textual and goes through
//! format_value_for_export(). JSON keeps raw numbers and text native and
//! only formats date, boolean, currency and percent columns.
//! No file-system access here; artifacts are handed to an ExportSink.

use crate::{
    catalog::{ColumnDefinition, ColumnType},
    error::ReportResult,
    types::Row,
    value::as_f64,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Csv   => "text/csv",
            ExportFormat::Excel => "application/vnd.ms-excel",
            ExportFormat::Json  => "application/json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv   => "csv",
            ExportFormat::Excel => "xls",
            ExportFormat::Json  => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub filename: Option<String>,
    /// Worksheet name for Excel output.
    #[serde(default)]
    pub sheet_name: Option<String>,
}

impl ExportOptions {
    pub fn new(format: ExportFormat, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            format,
            columns,
            filename: None,
            sheet_name: None,
        }
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportArtifact {
    pub content: String,
    pub mime_type: String,
    pub filename: String,
}

/// Receives finished artifacts (a download trigger, a file writer, ...).
pub trait ExportSink {
    fn deliver(&self, artifact: &ExportArtifact) -> ReportResult<()>;
}

pub const DEFAULT_SHEET_NAME: &str = "Report";

// ── Values ───────────────────────────────────────────────────────────────────

/// Type-aware text form of one value. Null and missing become `""`.
pub fn format_value_for_export(value: &Value, column_type: ColumnType) -> String {
    if value.is_null() {
        return String::new();
    }
    match column_type {
        ColumnType::Currency => match as_f64(value) {
            Some(f) => format!("{f:.2}"),
            None => plain(value),
        },
        ColumnType::Percent => match as_f64(value) {
            Some(f) => format!("{}%", trim_decimal(f * 100.0)),
            None => plain(value),
        },
        ColumnType::Date => format_date(value).unwrap_or_else(|| plain(value)),
        ColumnType::Boolean => match value {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => (n.as_f64() != Some(0.0)).to_string(),
            other => plain(other),
        },
        ColumnType::Text | ColumnType::Number | ColumnType::Enum => plain(value),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Round to 2 decimals and drop trailing zeros: 25.0 -> "25", 12.5 -> "12.5".
fn trim_decimal(f: f64) -> String {
    let s = format!("{f:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn format_date(value: &Value) -> Option<String> {
    let date = match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.date_naive())
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.date()))
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
                .ok()?
        }
        // Epoch milliseconds.
        Value::Number(n) => DateTime::<Utc>::from_timestamp_millis(n.as_i64()?)?.date_naive(),
        _ => return None,
    };
    Some(date.format("%Y-%m-%d").to_string())
}

// ── CSV ──────────────────────────────────────────────────────────────────────

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn convert_to_csv(rows: &[Row], columns: &[ColumnDefinition]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|c| csv_field(&c.label))
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in rows {
        lines.push(
            columns
                .iter()
                .map(|c| {
                    let value = row.get(&c.key).unwrap_or(&Value::Null);
                    csv_field(&format_value_for_export(value, c.column_type))
                })
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

// ── SpreadsheetML ────────────────────────────────────────────────────────────

pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&'  => out.push_str("&amp;"),
            '<'  => out.push_str("&lt;"),
            '>'  => out.push_str("&gt;"),
            '"'  => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c    => out.push(c),
        }
    }
    out
}

fn xml_cell(text: &str, numeric: bool) -> String {
    let kind = if numeric { "Number" } else { "String" };
    format!(
        "<Cell><Data ss:Type=\"{kind}\">{}</Data></Cell>",
        escape_xml(text)
    )
}

pub fn convert_to_excel_xml(rows: &[Row], columns: &[ColumnDefinition], sheet_name: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
    xml.push_str(
        "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
         xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
    );
    xml.push_str(&format!(" <Worksheet ss:Name=\"{}\">\n", escape_xml(sheet_name)));
    xml.push_str("  <Table>\n");

    xml.push_str("   <Row>");
    for column in columns {
        xml.push_str(&xml_cell(&column.label, false));
    }
    xml.push_str("</Row>\n");

    for row in rows {
        xml.push_str("   <Row>");
        for column in columns {
            let value = row.get(&column.key).unwrap_or(&Value::Null);
            let text = format_value_for_export(value, column.column_type);
            let numeric = matches!(column.column_type, ColumnType::Number | ColumnType::Currency)
                && text.parse::<f64>().is_ok();
            xml.push_str(&xml_cell(&text, numeric));
        }
        xml.push_str("</Row>\n");
    }

    xml.push_str("  </Table>\n");
    xml.push_str(" </Worksheet>\n");
    xml.push_str("</Workbook>\n");
    xml
}

// ── JSON ─────────────────────────────────────────────────────────────────────

pub fn export_to_json(rows: &[Row], columns: &[ColumnDefinition]) -> ReportResult<String> {
    let objects: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut out = Row::new();
            for column in columns {
                let value = row.get(&column.key).cloned().unwrap_or(Value::Null);
                let value = match column.column_type {
                    ColumnType::Date | ColumnType::Boolean | ColumnType::Currency | ColumnType::Percent
                        if !value.is_null() =>
                    {
                        Value::String(format_value_for_export(&value, column.column_type))
                    }
                    _ => value,
                };
                out.insert(column.key.clone(), value);
            }
            Value::Object(out)
        })
        .collect();
    Ok(serde_json::to_string_pretty(&objects)?)
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

pub fn default_filename(format: ExportFormat, today: NaiveDate) -> String {
    format!("report-{}.{}", today.format("%Y-%m-%d"), format.extension())
}

/// Export with today's date for the default filename.
pub fn export_data(rows: &[Row], options: &ExportOptions) -> ReportResult<ExportArtifact> {
    export_data_on(rows, options, Utc::now().date_naive())
}

pub fn export_data_on(rows: &[Row], options: &ExportOptions, today: NaiveDate) -> ReportResult<ExportArtifact> {
    let content = match options.format {
        ExportFormat::Csv => convert_to_csv(rows, &options.columns),
        ExportFormat::Excel => convert_to_excel_xml(
            rows,
            &options.columns,
            options.sheet_name.as_deref().unwrap_or(DEFAULT_SHEET_NAME),
        ),
        ExportFormat::Json => export_to_json(rows, &options.columns)?,
    };

    let extension = options.format.extension();
    let filename = match options.filename.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            if name.to_lowercase().ends_with(&format!(".{extension}")) {
                name.to_string()
            } else {
                format!("{name}.{extension}")
            }
        }
        _ => default_filename(options.format, today),
    };

    log::info!(
        "export: {} rows as {} ({} bytes) -> {filename}",
        rows.len(),
        extension,
        content.len()
    );

    Ok(ExportArtifact {
        content,
        mime_type: options.format.mime_type().to_string(),
        filename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn percent_trims_trailing_zeros() {
        assert_eq!(trim_decimal(25.0), "25");
        assert_eq!(trim_decimal(12.5), "12.5");
        assert_eq!(trim_decimal(7.000000000000001), "7");
    }

    #[test]
    fn dates_accept_timestamps_and_epoch_millis() {
        assert_eq!(format_date(&json!("2024-03-05T23:10:00Z")).as_deref(), Some("2024-03-05"));
        assert_eq!(format_date(&json!("2024-03-05")).as_deref(), Some("2024-03-05"));
        assert_eq!(format_date(&json!(0)).as_deref(), Some("1970-01-01"));
        assert_eq!(format_date(&json!("soon")), None);
    }

    #[test]
    fn csv_fields_quote_only_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }
}
