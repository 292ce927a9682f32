//! Query engine: compiles report definitions into backend-neutral plans.
//!
//! PIPELINE (fixed order):
//!   1. Filter: AND of every predicate (OR is not supported)
//!   2. Group: one row per distinct combination of grouping values
//!   3. Aggregate: per group, or over the whole filtered set
//!   4. Sort: stable, ties keep earlier keys' order
//!   5. Limit
//!
//! RULES:
//!   - Validation collects every violation before failing.
//!   - A plan only references columns present in the catalog, or
//!     aggregation outputs declared by the same definition.
//!   - No I/O here. Backends execute plans; execute_plan() is the
//!     in-memory reference implementation of the semantics.

use crate::{
    catalog::{ColumnCatalog, ColumnDefinition, ColumnType},
    definition::{AggregateFn, Aggregation, Filter, FilterOperator, ReportDefinition, SortDirection},
    error::{ReportResult, ValidationError},
    types::{ColumnKey, DataSourceId, Row},
    value::{as_f64, compare_typed, group_key, number_value, sort_order, values_equal},
};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

// ── Plan types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryPlan {
    pub data_source: DataSourceId,
    pub table: String,
    pub predicates: Vec<Predicate>,
    pub group_by: Vec<ColumnKey>,
    pub aggregations: Vec<PlannedAggregation>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    /// Shape of each result row, in output order.
    pub output: Vec<OutputColumn>,
}

impl QueryPlan {
    pub fn is_aggregated(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregations.is_empty()
    }

    pub fn output_type(&self, key: &str) -> Option<ColumnType> {
        self.output
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.column_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Predicate {
    pub column: ColumnKey,
    pub column_type: ColumnType,
    pub condition: Condition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    Contains(String),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Between(Value, Value),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedAggregation {
    pub function: AggregateFn,
    pub column: Option<ColumnKey>,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputColumn {
    pub key: String,
    pub label: String,
    pub column_type: ColumnType,
}

impl OutputColumn {
    pub fn to_column_definition(&self) -> ColumnDefinition {
        ColumnDefinition::new(&self.key, &self.label, self.column_type)
    }
}

// ── Compilation ──────────────────────────────────────────────────────────────

/// Validate `definition` against `catalog` and compile it into a plan.
pub fn build_query(catalog: &ColumnCatalog, definition: &ReportDefinition) -> ReportResult<QueryPlan> {
    let source = match catalog.data_source(&definition.data_source) {
        Ok(source) => source,
        Err(_) => {
            return Err(ValidationError::single(
                "data_source",
                format!("unknown data source '{}'", definition.data_source),
            )
            .into());
        }
    };

    let mut errors = ValidationError::new();

    // Filters
    let mut predicates = Vec::with_capacity(definition.filters.len());
    for (i, filter) in definition.filters.iter().enumerate() {
        let Some(column) = source.column(&filter.column) else {
            errors.push(
                format!("filters[{i}].column"),
                format!("unknown column '{}' for '{}'", filter.column, source.id),
            );
            continue;
        };
        if let Some(predicate) = compile_filter(i, filter, column, &mut errors) {
            predicates.push(predicate);
        }
    }

    // Groupings
    let mut output = Vec::new();
    let mut seen_groups: HashSet<&str> = HashSet::new();
    for (i, key) in definition.groupings.iter().enumerate() {
        match source.column(key) {
            None => errors.push(
                format!("groupings[{i}]"),
                format!("unknown column '{key}' for '{}'", source.id),
            ),
            Some(_) if !seen_groups.insert(key.as_str()) => {
                errors.push(format!("groupings[{i}]"), format!("column '{key}' is grouped twice"))
            }
            Some(column) => output.push(OutputColumn {
                key: column.key.clone(),
                label: column.label.clone(),
                column_type: column.column_type,
            }),
        }
    }

    // Aggregations
    let mut aggregations = Vec::with_capacity(definition.aggregations.len());
    let mut output_keys: HashSet<String> = HashSet::new();
    for (i, agg) in definition.aggregations.iter().enumerate() {
        let column = match &agg.column {
            Some(key) => match source.column(key) {
                Some(column) => Some(column),
                None => {
                    errors.push(
                        format!("aggregations[{i}].column"),
                        format!("unknown column '{key}' for '{}'", source.id),
                    );
                    continue;
                }
            },
            None if agg.function == AggregateFn::Count => None,
            None => {
                errors.push(
                    format!("aggregations[{i}].column"),
                    format!("{} requires a column", agg.function.as_str()),
                );
                continue;
            }
        };

        if let Some(column) = column {
            if matches!(agg.function, AggregateFn::Sum | AggregateFn::Avg)
                && !column.column_type.is_numeric()
            {
                errors.push(
                    format!("aggregations[{i}].fn"),
                    format!(
                        "{} requires a numeric column, '{}' is {}",
                        agg.function.as_str(),
                        column.key,
                        column.column_type.as_str()
                    ),
                );
                continue;
            }
        }

        let key = agg.output_key();
        if seen_groups.contains(key.as_str()) || !output_keys.insert(key.clone()) {
            errors.push(
                format!("aggregations[{i}].alias"),
                format!("output key '{key}' is already used; set a distinct alias"),
            );
            continue;
        }

        output.push(OutputColumn {
            key: key.clone(),
            label: aggregation_label(agg, column),
            column_type: aggregation_type(agg.function, column),
        });
        aggregations.push(PlannedAggregation {
            function: agg.function,
            column: agg.column.clone(),
            output: key,
        });
    }

    let aggregated = definition.is_aggregated();
    if !aggregated {
        output = source
            .columns
            .iter()
            .map(|c| OutputColumn {
                key: c.key.clone(),
                label: c.label.clone(),
                column_type: c.column_type,
            })
            .collect();
    }

    // Sorting
    let mut order_by = Vec::with_capacity(definition.sorting.len());
    for (i, sort) in definition.sorting.iter().enumerate() {
        let known = if aggregated {
            seen_groups.contains(sort.column.as_str()) || output_keys.contains(&sort.column)
        } else {
            source.column(&sort.column).is_some()
        };
        if known {
            order_by.push(OrderBy {
                column: sort.column.clone(),
                direction: sort.direction,
            });
        } else if aggregated && source.column(&sort.column).is_some() {
            errors.push(
                format!("sorting[{i}].column"),
                format!(
                    "'{}' is neither a grouping nor an aggregation output of this report",
                    sort.column
                ),
            );
        } else {
            errors.push(
                format!("sorting[{i}].column"),
                format!("unknown column '{}' for '{}'", sort.column, source.id),
            );
        }
    }

    if definition.limit == Some(0) {
        errors.push("limit", "limit must be at least 1");
    }

    errors.into_result()?;

    let plan = QueryPlan {
        data_source: source.id.clone(),
        table: source.table_name().to_string(),
        predicates,
        group_by: definition.groupings.clone(),
        aggregations,
        order_by,
        limit: definition.limit,
        output,
    };
    log::debug!(
        "plan built for {}: {} predicates, {} groups, {} aggregations",
        plan.data_source,
        plan.predicates.len(),
        plan.group_by.len(),
        plan.aggregations.len(),
    );
    Ok(plan)
}

fn aggregation_label(agg: &Aggregation, column: Option<&ColumnDefinition>) -> String {
    match (&agg.alias, column) {
        (Some(alias), _) => alias.clone(),
        (None, Some(c)) if agg.function == AggregateFn::Sum => c.label.clone(),
        (None, Some(c)) => format!("{} ({})", c.label, agg.function.as_str()),
        (None, None) => "Count".to_string(),
    }
}

fn aggregation_type(function: AggregateFn, column: Option<&ColumnDefinition>) -> ColumnType {
    match (function, column) {
        (AggregateFn::Count | AggregateFn::CountDistinct, _) | (_, None) => ColumnType::Number,
        (_, Some(c)) => c.column_type,
    }
}

fn operator_allowed(op: FilterOperator, column_type: ColumnType) -> bool {
    use FilterOperator::*;
    match op {
        Equals | NotEquals | In | IsNull | IsNotNull => true,
        Contains => column_type == ColumnType::Text,
        Gt | Gte | Lt | Lte | Between => column_type.is_ordered(),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn parses_as_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}

/// Check that one scalar operand fits the column type.
fn check_operand(field: &str, value: &Value, column: &ColumnDefinition, errors: &mut ValidationError) {
    if !is_scalar(value) {
        errors.push(field, "expected a single value");
        return;
    }
    let fits = match column.column_type {
        t if t.is_numeric() => as_f64(value).is_some(),
        ColumnType::Date => value.as_str().is_some_and(parses_as_date),
        ColumnType::Boolean => value.is_boolean(),
        ColumnType::Enum if !column.options.is_empty() => value
            .as_str()
            .is_some_and(|s| column.options.iter().any(|o| o == s)),
        _ => true,
    };
    if !fits {
        let expected = match column.column_type {
            ColumnType::Enum => format!("one of [{}]", column.options.join(", ")),
            ColumnType::Date => "an ISO-8601 date".to_string(),
            other => format!("a {} value", other.as_str()),
        };
        errors.push(field, format!("value {value} for '{}' must be {expected}", column.key));
    }
}

fn compile_filter(
    i: usize,
    filter: &Filter,
    column: &ColumnDefinition,
    errors: &mut ValidationError,
) -> Option<Predicate> {
    use FilterOperator::*;

    if !operator_allowed(filter.operator, column.column_type) {
        errors.push(
            format!("filters[{i}].operator"),
            format!(
                "operator {} is not valid for {} column '{}'",
                filter.operator.as_str(),
                column.column_type.as_str(),
                column.key
            ),
        );
        return None;
    }

    let field = format!("filters[{i}].value");
    let before = errors.violations.len();
    let value = &filter.value;

    let condition = match filter.operator {
        IsNull => Condition::IsNull,
        IsNotNull => Condition::IsNotNull,
        Contains => match value.as_str() {
            Some(s) => Condition::Contains(s.to_string()),
            None => {
                errors.push(field, "contains expects a string");
                return None;
            }
        },
        Between => {
            let bounds = value.as_array().filter(|a| a.len() == 2);
            let Some(bounds) = bounds else {
                errors.push(field, "between expects [low, high]");
                return None;
            };
            check_operand(&field, &bounds[0], column, errors);
            check_operand(&field, &bounds[1], column, errors);
            if errors.violations.len() == before
                && compare_typed(&bounds[0], &bounds[1], column.column_type) == Some(Ordering::Greater)
            {
                errors.push(field, "between lower bound exceeds upper bound");
            }
            Condition::Between(bounds[0].clone(), bounds[1].clone())
        }
        In => {
            let list = value.as_array().filter(|a| !a.is_empty());
            let Some(list) = list else {
                errors.push(field, "in expects a non-empty list");
                return None;
            };
            for item in list {
                check_operand(&field, item, column, errors);
            }
            Condition::In(list.clone())
        }
        Equals | NotEquals | Gt | Gte | Lt | Lte => {
            check_operand(&field, value, column, errors);
            let v = value.clone();
            match filter.operator {
                Equals => Condition::Equals(v),
                NotEquals => Condition::NotEquals(v),
                Gt => Condition::Gt(v),
                Gte => Condition::Gte(v),
                Lt => Condition::Lt(v),
                _ => Condition::Lte(v),
            }
        }
    };

    if errors.violations.len() > before {
        return None;
    }
    Some(Predicate {
        column: column.key.clone(),
        column_type: column.column_type,
        condition,
    })
}

// ── In-memory execution ──────────────────────────────────────────────────────

impl Predicate {
    pub fn matches(&self, row: &Row) -> bool {
        let value = row.get(&self.column).unwrap_or(&Value::Null);
        let cmp = |target: &Value| {
            if value.is_null() {
                None
            } else {
                compare_typed(value, target, self.column_type)
            }
        };
        match &self.condition {
            Condition::IsNull => value.is_null(),
            Condition::IsNotNull => !value.is_null(),
            Condition::Equals(target) => values_equal(value, target, self.column_type),
            Condition::NotEquals(target) => !value.is_null() && !values_equal(value, target, self.column_type),
            Condition::Contains(needle) => value
                .as_str()
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
            Condition::Gt(target) => cmp(target) == Some(Ordering::Greater),
            Condition::Gte(target) => matches!(cmp(target), Some(Ordering::Greater | Ordering::Equal)),
            Condition::Lt(target) => cmp(target) == Some(Ordering::Less),
            Condition::Lte(target) => matches!(cmp(target), Some(Ordering::Less | Ordering::Equal)),
            Condition::Between(low, high) => {
                matches!(cmp(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cmp(high), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::In(list) => list.iter().any(|t| values_equal(value, t, self.column_type)),
        }
    }
}

/// Evaluate `plan` over in-memory `rows`.
pub fn execute_plan(plan: &QueryPlan, rows: &[Row]) -> Vec<Row> {
    let filtered: Vec<&Row> = rows
        .iter()
        .filter(|row| plan.predicates.iter().all(|p| p.matches(row)))
        .collect();

    let mut out: Vec<Row> = if plan.is_aggregated() {
        group_and_aggregate(plan, &filtered)
    } else {
        filtered.into_iter().cloned().collect()
    };

    if !plan.order_by.is_empty() {
        out.sort_by(|a, b| compare_rows(plan, a, b));
    }
    if let Some(limit) = plan.limit {
        out.truncate(limit);
    }
    out
}

fn compare_rows(plan: &QueryPlan, a: &Row, b: &Row) -> Ordering {
    for key in &plan.order_by {
        let column_type = plan.output_type(&key.column).unwrap_or(ColumnType::Text);
        let va = a.get(&key.column).unwrap_or(&Value::Null);
        let vb = b.get(&key.column).unwrap_or(&Value::Null);
        let ord = match key.direction {
            SortDirection::Asc => sort_order(va, vb, column_type),
            SortDirection::Desc => sort_order(va, vb, column_type).reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn group_and_aggregate(plan: &QueryPlan, rows: &[&Row]) -> Vec<Row> {
    // Groups keep first-appearance order.
    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<&Row>> = HashMap::new();

    if plan.group_by.is_empty() {
        order.push(Vec::new());
        groups.insert(Vec::new(), rows.to_vec());
    } else {
        for row in rows {
            let key: Vec<String> = plan
                .group_by
                .iter()
                .map(|c| group_key(row.get(c).unwrap_or(&Value::Null)))
                .collect();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(row);
        }
    }

    order
        .into_iter()
        .map(|key| {
            let members = &groups[&key];
            let mut out = Row::new();
            for column in &plan.group_by {
                let value = members
                    .first()
                    .and_then(|r| r.get(column))
                    .cloned()
                    .unwrap_or(Value::Null);
                out.insert(column.clone(), value);
            }
            for agg in &plan.aggregations {
                let column_type = plan.output_type(&agg.output).unwrap_or(ColumnType::Number);
                out.insert(agg.output.clone(), aggregate(agg, column_type, members));
            }
            out
        })
        .collect()
}

fn aggregate(agg: &PlannedAggregation, column_type: ColumnType, rows: &[&Row]) -> Value {
    let Some(column) = &agg.column else {
        return Value::from(rows.len() as u64);
    };
    let values = rows
        .iter()
        .filter_map(|r| r.get(column))
        .filter(|v| !v.is_null());

    match agg.function {
        AggregateFn::Count => Value::from(values.count() as u64),
        AggregateFn::CountDistinct => {
            let distinct: HashSet<String> = values.map(group_key).collect();
            Value::from(distinct.len() as u64)
        }
        AggregateFn::Sum => sum_values(values),
        AggregateFn::Avg => {
            let nums: Vec<f64> = values.filter_map(as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                number_value(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggregateFn::Min => values.min_by(|a, b| sort_order(a, b, column_type)).cloned().unwrap_or(Value::Null),
        AggregateFn::Max => values.max_by(|a, b| sort_order(a, b, column_type)).cloned().unwrap_or(Value::Null),
    }
}

/// Sum that stays integral while every input is an integer.
fn sum_values<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0f64;
    let mut any = false;

    for value in values {
        let Some(f) = as_f64(value) else { continue };
        any = true;
        float_sum += f;
        int_sum = match (int_sum, value.as_i64()) {
            (Some(acc), Some(i)) => acc.checked_add(i),
            _ => None,
        };
    }

    match (any, int_sum) {
        (false, _) => Value::Null,
        (true, Some(i)) => Value::from(i),
        (true, None) => number_value(float_sum),
    }
}
