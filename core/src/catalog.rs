//! Column catalog: the registry of reportable data sources.
//!
//! RULE: The catalog is built once and then only read.
//! The query engine, validators and exporters receive it by reference;
//! nothing looks columns up through global state.

use crate::{
    error::{ReportError, ReportResult, ValidationError},
    types::{ColumnKey, DataSourceId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    Currency,
    Percent,
    Enum,
}

impl ColumnType {
    /// Number, currency and percent all hold plain numeric values.
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Number | ColumnType::Currency | ColumnType::Percent)
    }

    /// Types that support ordering comparisons and ranges.
    pub fn is_ordered(self) -> bool {
        self.is_numeric() || self == ColumnType::Date
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text     => "text",
            ColumnType::Number   => "number",
            ColumnType::Date     => "date",
            ColumnType::Boolean  => "boolean",
            ColumnType::Currency => "currency",
            ColumnType::Percent  => "percent",
            ColumnType::Enum     => "enum",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    pub key: ColumnKey,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Allowed values of an enum column. Empty means unchecked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ColumnDefinition {
    pub fn new(key: &str, label: &str, column_type: ColumnType) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            column_type,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceDefinition {
    pub id: DataSourceId,
    pub label: String,
    /// Physical table name. Defaults to the id.
    #[serde(default)]
    pub table: Option<String>,
    pub columns: Vec<ColumnDefinition>,
}

impl DataSourceDefinition {
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.id)
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.key == key)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    sources: Vec<DataSourceDefinition>,
    index: HashMap<DataSourceId, usize>,
}

impl ColumnCatalog {
    /// Build a catalog, rejecting duplicate data sources and duplicate
    /// column keys within a data source.
    pub fn new(sources: Vec<DataSourceDefinition>) -> ReportResult<Self> {
        let mut errors = ValidationError::new();
        let mut index = HashMap::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            if index.insert(source.id.clone(), i).is_some() {
                errors.push(
                    format!("data_sources[{i}].id"),
                    format!("duplicate data source '{}'", source.id),
                );
            }
            let mut seen: Vec<&str> = Vec::with_capacity(source.columns.len());
            for (j, column) in source.columns.iter().enumerate() {
                if seen.contains(&column.key.as_str()) {
                    errors.push(
                        format!("data_sources[{i}].columns[{j}].key"),
                        format!("duplicate column '{}' in '{}'", column.key, source.id),
                    );
                }
                seen.push(&column.key);
            }
        }

        errors.into_result()?;
        Ok(Self { sources, index })
    }

    /// The CRM catalog shipped with the platform.
    pub fn builtin() -> Self {
        // The built-in definitions are fixed and free of duplicates.
        let sources = builtin_data_sources();
        let index = sources
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self { sources, index }
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSourceDefinition> {
        self.sources.iter()
    }

    pub fn data_source(&self, data_source: &str) -> ReportResult<&DataSourceDefinition> {
        self.index
            .get(data_source)
            .map(|&i| &self.sources[i])
            .ok_or_else(|| ReportError::UnknownDataSource {
                data_source: data_source.to_string(),
            })
    }

    pub fn get_columns_for_data_source(
        &self,
        data_source: &str,
    ) -> ReportResult<&[ColumnDefinition]> {
        Ok(&self.data_source(data_source)?.columns)
    }

    pub fn get_column_definition(
        &self,
        data_source: &str,
        column_key: &str,
    ) -> ReportResult<&ColumnDefinition> {
        self.data_source(data_source)?
            .column(column_key)
            .ok_or_else(|| ReportError::UnknownColumn {
                data_source: data_source.to_string(),
                column: column_key.to_string(),
            })
    }

    pub fn table_for(&self, data_source: &str) -> ReportResult<&str> {
        Ok(self.data_source(data_source)?.table_name())
    }
}

/// Data sources of the CRM: leads, deals, advisors and enrollments.
pub fn builtin_data_sources() -> Vec<DataSourceDefinition> {
    use ColumnType::*;

    let col = ColumnDefinition::new;

    vec![
        DataSourceDefinition {
            id: "leads".into(),
            label: "Leads".into(),
            table: None,
            columns: vec![
                col("id", "Lead ID", Text),
                col("first_name", "First Name", Text),
                col("last_name", "Last Name", Text),
                col("email", "Email", Text),
                col("state", "State", Text),
                col("status", "Status", Enum)
                    .with_options(&["new", "contacted", "qualified", "converted", "lost"]),
                col("source", "Lead Source", Enum)
                    .with_options(&["website", "referral", "event", "partner", "cold_call"]),
                col("advisor_id", "Advisor", Text),
                col("estimated_value", "Estimated Value", Currency),
                col("household_size", "Household Size", Number),
                col("created_at", "Created", Date),
            ],
        },
        DataSourceDefinition {
            id: "deals".into(),
            label: "Deals".into(),
            table: None,
            columns: vec![
                col("id", "Deal ID", Text),
                col("title", "Title", Text),
                col("stage", "Stage", Enum).with_options(&[
                    "prospecting",
                    "proposal",
                    "negotiation",
                    "closed_won",
                    "closed_lost",
                ]),
                col("region", "Region", Text),
                col("advisor_id", "Advisor", Text),
                col("value", "Deal Value", Currency),
                col("revenue", "Revenue", Currency),
                col("probability", "Win Probability", Percent),
                col("is_won", "Won", Boolean),
                col("close_date", "Close Date", Date),
                col("created_at", "Created", Date),
            ],
        },
        DataSourceDefinition {
            id: "advisors".into(),
            label: "Advisors".into(),
            table: None,
            columns: vec![
                col("id", "Advisor ID", Text),
                col("name", "Name", Text),
                col("region", "Region", Text),
                col("level", "Level", Text),
                col("enrollments_closed", "Enrollments Closed", Number),
                col("deals_closed", "Deals Closed", Number),
                col("revenue_generated", "Revenue Generated", Currency),
                col("conversion_rate", "Conversion Rate", Percent),
                col("active", "Active", Boolean),
                col("hired_at", "Hired", Date),
            ],
        },
        DataSourceDefinition {
            id: "enrollments".into(),
            label: "Enrollments".into(),
            table: None,
            columns: vec![
                col("id", "Enrollment ID", Text),
                col("member_name", "Member", Text),
                col("carrier", "Carrier", Text),
                col("plan_type", "Plan Type", Enum)
                    .with_options(&["bronze", "silver", "gold", "platinum", "catastrophic"]),
                col("status", "Status", Enum)
                    .with_options(&["pending", "active", "cancelled", "terminated"]),
                col("advisor_id", "Advisor", Text),
                col("monthly_premium", "Monthly Premium", Currency),
                col("subsidy_rate", "Subsidy Rate", Percent),
                col("subsidy_eligible", "Subsidy Eligible", Boolean),
                col("effective_date", "Effective Date", Date),
            ],
        },
    ]
}
