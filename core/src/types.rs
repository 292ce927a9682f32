//! Shared primitive types used across the reporting core.

/// Identifier of a logical table, e.g. `"leads"` or `"deals"`.
pub type DataSourceId = String;

/// Key of a column within one data source.
pub type ColumnKey = String;

/// A stable, unique identifier for alerts, templates and levels.
pub type EntityId = String;

/// One tabular result row, keyed by column key.
pub type Row = serde_json::Map<String, serde_json::Value>;
