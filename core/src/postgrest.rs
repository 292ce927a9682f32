//! PostgREST (Supabase) request builder.
//!
//! Translates a QueryPlan into the query-string calling convention of a
//! PostgREST endpoint. The HTTP exchange itself belongs to a
//! PostgrestTransport supplied by the caller.

use crate::{
    backend::QueryBackend,
    definition::{AggregateFn, SortDirection},
    error::{ReportError, ReportResult},
    query_engine::{Condition, QueryPlan},
    types::Row,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostgrestRequest {
    pub table: String,
    /// Ordered key/value pairs. Keys may repeat (e.g. both ends of a range).
    pub params: Vec<(String, String)>,
}

impl PostgrestRequest {
    pub fn path(&self) -> String {
        format!("/rest/v1/{}", self.table)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Build the PostgREST request for `plan`.
pub fn build_postgrest_request(plan: &QueryPlan) -> ReportResult<PostgrestRequest> {
    let mut params = Vec::new();
    params.push(("select".to_string(), select_clause(plan)?));

    for predicate in &plan.predicates {
        let column = predicate.column.clone();
        match &predicate.condition {
            Condition::Equals(v) => params.push((column, format!("eq.{}", literal(v)))),
            Condition::NotEquals(v) => params.push((column, format!("neq.{}", literal(v)))),
            Condition::Contains(s) => {
                params.push((column, format!("ilike.*{}*", ilike_needle(plan, s)?)))
            }
            Condition::Gt(v) => params.push((column, format!("gt.{}", literal(v)))),
            Condition::Gte(v) => params.push((column, format!("gte.{}", literal(v)))),
            Condition::Lt(v) => params.push((column, format!("lt.{}", literal(v)))),
            Condition::Lte(v) => params.push((column, format!("lte.{}", literal(v)))),
            Condition::Between(low, high) => {
                params.push((column.clone(), format!("gte.{}", literal(low))));
                params.push((column, format!("lte.{}", literal(high))));
            }
            Condition::In(list) => {
                let items: Vec<String> = list.iter().map(list_item).collect();
                params.push((column, format!("in.({})", items.join(","))));
            }
            Condition::IsNull => params.push((column, "is.null".to_string())),
            Condition::IsNotNull => params.push((column, "not.is.null".to_string())),
        }
    }

    if !plan.order_by.is_empty() {
        let order: Vec<String> = plan
            .order_by
            .iter()
            .map(|o| match o.direction {
                SortDirection::Asc => format!("{}.asc.nullslast", o.column),
                SortDirection::Desc => format!("{}.desc.nullsfirst", o.column),
            })
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }

    if let Some(limit) = plan.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    Ok(PostgrestRequest {
        table: plan.table.clone(),
        params,
    })
}

fn select_clause(plan: &QueryPlan) -> ReportResult<String> {
    if !plan.is_aggregated() {
        return Ok("*".to_string());
    }

    let mut parts: Vec<String> = plan.group_by.clone();
    for agg in &plan.aggregations {
        let expr = match (agg.function, &agg.column) {
            (AggregateFn::Count, None) => "count()".to_string(),
            (AggregateFn::CountDistinct, _) => {
                return Err(ReportError::query_execution(
                    &plan.data_source,
                    "count_distinct has no PostgREST aggregate equivalent",
                ));
            }
            (function, Some(column)) => format!("{column}.{}()", function.as_str()),
            (function, None) => {
                return Err(ReportError::query_execution(
                    &plan.data_source,
                    format!("{} without a column", function.as_str()),
                ));
            }
        };
        // Always alias: PostgREST would otherwise key the result by function name.
        parts.push(format!("{}:{expr}", agg.output));
    }
    Ok(parts.join(","))
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Escape LIKE wildcards so the needle matches literally. PostgREST rewrites
/// every `*` to `%`, so a literal asterisk cannot be expressed at all.
fn ilike_needle(plan: &QueryPlan, needle: &str) -> ReportResult<String> {
    if needle.contains('*') {
        return Err(ReportError::query_execution(
            &plan.data_source,
            "contains cannot search for '*' through PostgREST",
        ));
    }
    Ok(needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_"))
}

/// Items inside `in.(...)` are double-quoted when they contain reserved
/// characters.
fn list_item(value: &Value) -> String {
    let raw = literal(value);
    if raw.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(byte as char),
            b'-' | b'_' | b'.' | b'~' | b'*' | b',' | b'(' | b')' | b':' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Performs the HTTP exchange for a PostgREST request.
pub trait PostgrestTransport {
    fn fetch(
        &self,
        request: &PostgrestRequest,
    ) -> Result<Vec<Row>, Box<dyn std::error::Error + Send + Sync>>;
}

/// QueryBackend over a PostgREST endpoint.
pub struct PostgrestBackend<T: PostgrestTransport> {
    transport: T,
}

impl<T: PostgrestTransport> PostgrestBackend<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: PostgrestTransport> QueryBackend for PostgrestBackend<T> {
    fn name(&self) -> &'static str {
        "postgrest"
    }

    fn execute(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>> {
        let request = build_postgrest_request(plan)?;
        log::debug!("postgrest GET {}?{}", request.path(), request.to_query_string());
        self.transport
            .fetch(&request)
            .map_err(|e| ReportError::QueryExecution {
                data_source: plan.data_source.clone(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_items_with_commas_are_quoted() {
        assert_eq!(list_item(&json!("Acme, Inc.")), "\"Acme, Inc.\"");
        assert_eq!(list_item(&json!(4)), "4");
    }

    #[test]
    fn encode_keeps_postgrest_punctuation() {
        assert_eq!(encode("in.(a,b)"), "in.(a,b)");
        assert_eq!(encode("ilike.*new york*"), "ilike.*new%20york*");
    }
}
