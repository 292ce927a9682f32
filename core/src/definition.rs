//! Declarative report definitions.
//!
//! A definition is owned by the caller and persisted outside the core.
//! The query engine only reads it.

use crate::{
    error::ReportResult,
    types::{ColumnKey, DataSourceId},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Equals    => "equals",
            FilterOperator::NotEquals => "not_equals",
            FilterOperator::Contains  => "contains",
            FilterOperator::Gt        => "gt",
            FilterOperator::Gte       => "gte",
            FilterOperator::Lt        => "lt",
            FilterOperator::Lte       => "lte",
            FilterOperator::Between   => "between",
            FilterOperator::In        => "in",
            FilterOperator::IsNull    => "is_null",
            FilterOperator::IsNotNull => "is_not_null",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub column: ColumnKey,
    pub operator: FilterOperator,
    /// Scalar, `[low, high]` for `between`, a list for `in`, absent for
    /// the null checks.
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(column: &str, operator: FilterOperator, value: Value) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    CountDistinct,
}

impl AggregateFn {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFn::Sum           => "sum",
            AggregateFn::Avg           => "avg",
            AggregateFn::Count         => "count",
            AggregateFn::Min           => "min",
            AggregateFn::Max           => "max",
            AggregateFn::CountDistinct => "count_distinct",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aggregation {
    /// `count` may omit the column to count rows.
    #[serde(default)]
    pub column: Option<ColumnKey>,
    #[serde(rename = "fn")]
    pub function: AggregateFn,
    /// Output key. Defaults to the column key, or `count` for row counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn new(function: AggregateFn, column: &str) -> Self {
        Self {
            column: Some(column.to_string()),
            function,
            alias: None,
        }
    }

    pub fn count_rows() -> Self {
        Self {
            column: None,
            function: AggregateFn::Count,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn output_key(&self) -> String {
        match (&self.alias, &self.column) {
            (Some(alias), _) => alias.clone(),
            (None, Some(column)) => column.clone(),
            (None, None) => "count".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortSpec {
    pub column: ColumnKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(column: &str) -> Self {
        Self { column: column.to_string(), direction: SortDirection::Asc }
    }

    pub fn desc(column: &str) -> Self {
        Self { column: column.to_string(), direction: SortDirection::Desc }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportDefinition {
    pub data_source: DataSourceId,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Rollup hierarchy, outermost first.
    #[serde(default)]
    pub groupings: Vec<ColumnKey>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub sorting: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ReportDefinition {
    pub fn new(data_source: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            filters: Vec::new(),
            groupings: Vec::new(),
            aggregations: Vec::new(),
            sorting: Vec::new(),
            limit: None,
        }
    }

    /// Parse a persisted definition. Malformed JSON or a missing
    /// `data_source` fails here, before the query engine sees it.
    pub fn from_json(json: &str) -> ReportResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> ReportResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn group_by(mut self, column: &str) -> Self {
        self.groupings.push(column.to_string());
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sorting.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_aggregated(&self) -> bool {
        !self.groupings.is_empty() || !self.aggregations.is_empty()
    }
}
