//! Export tests: value formatting, CSV, SpreadsheetML and JSON artifacts.

use chrono::NaiveDate;
use reporting_core::{
    catalog::{ColumnDefinition, ColumnType},
    export::{
        convert_to_csv, convert_to_excel_xml, default_filename, escape_xml, export_data_on,
        export_to_json, format_value_for_export, ExportFormat, ExportOptions,
    },
    types::Row,
};
use serde_json::{json, Value};

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new("name", "Account", ColumnType::Text),
        ColumnDefinition::new("premium", "Premium", ColumnType::Currency),
        ColumnDefinition::new("subsidy", "Subsidy", ColumnType::Percent),
        ColumnDefinition::new("active", "Active", ColumnType::Boolean),
        ColumnDefinition::new("members", "Members", ColumnType::Number),
        ColumnDefinition::new("since", "Since", ColumnType::Date),
    ]
}

fn rows() -> Vec<Row> {
    vec![
        row(json!({"name": "Acme, Inc.", "premium": 19.5, "subsidy": 0.25, "active": true, "members": 4, "since": "2024-03-05T10:00:00Z"})),
        row(json!({"name": "Blue <Harbor> & Co", "premium": null, "subsidy": 0.1, "active": false, "members": 12})),
    ]
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
}

#[test]
fn values_format_by_column_type() {
    assert_eq!(format_value_for_export(&json!(0.25), ColumnType::Percent), "25%");
    assert_eq!(format_value_for_export(&json!(19.5), ColumnType::Currency), "19.50");
    assert_eq!(format_value_for_export(&json!(true), ColumnType::Boolean), "true");
    assert_eq!(format_value_for_export(&Value::Null, ColumnType::Text), "");
    assert_eq!(format_value_for_export(&json!(42), ColumnType::Number), "42");
    assert_eq!(format_value_for_export(&json!("2024-03-05T10:00:00Z"), ColumnType::Date), "2024-03-05");
}

#[test]
fn csv_has_labels_and_quotes_commas() {
    let csv = convert_to_csv(&rows(), &columns());
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(lines[0], "Account,Premium,Subsidy,Active,Members,Since");
    assert_eq!(lines[1], "\"Acme, Inc.\",19.50,25%,true,4,2024-03-05");
    assert_eq!(lines[2], "Blue <Harbor> & Co,,10%,false,12,");
}

/// Unquoting the quoted field gives back the original text.
#[test]
fn csv_quoting_round_trips() {
    let csv = convert_to_csv(&rows()[..1], &columns()[..1]);
    let field = csv.lines().nth(1).unwrap();
    let unquoted = field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap()
        .replace("\"\"", "\"");
    assert_eq!(unquoted, "Acme, Inc.");
}

#[test]
fn csv_of_no_rows_is_just_the_header() {
    assert_eq!(convert_to_csv(&[], &columns()[..2]), "Account,Premium");
}

#[test]
fn excel_xml_escapes_and_types_cells() {
    let xml = convert_to_excel_xml(&rows(), &columns(), "Q3 <draft>");

    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(xml.contains("<Worksheet ss:Name=\"Q3 &lt;draft&gt;\">"));
    assert!(xml.contains("<Data ss:Type=\"String\">Account</Data>"));
    assert!(xml.contains("<Data ss:Type=\"Number\">19.50</Data>"));
    assert!(xml.contains("<Data ss:Type=\"String\">25%</Data>"));
    assert!(xml.contains("Blue &lt;Harbor&gt; &amp; Co"));
    assert_eq!(xml.matches("<Row>").count(), 3);
}

#[test]
fn escape_xml_covers_all_entities() {
    assert_eq!(escape_xml(r#"<a href="x">Tom & Jerry's</a>"#), "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&apos;s&lt;/a&gt;");
}

#[test]
fn json_keeps_numbers_native() {
    let json = export_to_json(&rows(), &columns()).unwrap();
    let parsed: Vec<Row> = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0]["members"], json!(4));
    assert_eq!(parsed[0]["name"], json!("Acme, Inc."));
    assert_eq!(parsed[0]["premium"], json!("19.50"));
    assert_eq!(parsed[0]["subsidy"], json!("25%"));
    assert_eq!(parsed[0]["active"], json!("true"));
    assert_eq!(parsed[1]["premium"], Value::Null);
    assert_eq!(parsed[1]["since"], Value::Null);
}

#[test]
fn artifacts_carry_mime_type_and_default_filename() {
    let csv = export_data_on(&rows(), &ExportOptions::new(ExportFormat::Csv, columns()), today()).unwrap();
    assert_eq!(csv.mime_type, "text/csv");
    assert_eq!(csv.filename, "report-2024-07-15.csv");

    let excel = export_data_on(&rows(), &ExportOptions::new(ExportFormat::Excel, columns()), today()).unwrap();
    assert_eq!(excel.mime_type, "application/vnd.ms-excel");
    assert_eq!(excel.filename, "report-2024-07-15.xls");
    assert!(excel.content.contains("ss:Name=\"Report\""));

    assert_eq!(default_filename(ExportFormat::Json, today()), "report-2024-07-15.json");
}

#[test]
fn supplied_filenames_get_the_extension_once() {
    let options = ExportOptions::new(ExportFormat::Json, columns()).with_filename("pipeline");
    let artifact = export_data_on(&rows(), &options, today()).unwrap();
    assert_eq!(artifact.filename, "pipeline.json");
    assert_eq!(artifact.mime_type, "application/json");

    let options = ExportOptions::new(ExportFormat::Csv, columns()).with_filename("pipeline.CSV");
    assert_eq!(export_data_on(&rows(), &options, today()).unwrap().filename, "pipeline.CSV");
}

#[test]
fn empty_exports_never_fail() {
    for format in [ExportFormat::Csv, ExportFormat::Excel, ExportFormat::Json] {
        let artifact = export_data_on(&[], &ExportOptions::new(format, columns()), today()).unwrap();
        assert!(!artifact.content.is_empty());
    }
}
