//! SQLite persistence layer and query backend.
//!
//! RULE: Only store.rs talks to the database.
//! Plans are compiled to parameterized SQL here; identifiers come from
//! the catalog and are always quoted.

use crate::{
    alert::AlertEvaluationResult,
    backend::QueryBackend,
    catalog::ColumnType,
    definition::{AggregateFn, ReportDefinition, SortDirection},
    error::{ReportError, ReportResult},
    query_engine::{Condition, Predicate, QueryPlan},
    types::Row,
    value::{as_f64, number_value},
};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, types::ValueRef, Connection, OptionalExtension};
use serde_json::Value;

pub struct ReportStore {
    conn: Connection,
}

/// A plan rendered as SQL plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl ReportStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> ReportResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: readers do not block the writer.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReportResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReportResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_crm_tables.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_saved_reports.sql"))?;
        Ok(())
    }

    // ── Rows ───────────────────────────────────────────────────

    /// Insert one row; keys are column names.
    pub fn insert_row(&self, table: &str, row: &Row) -> ReportResult<()> {
        if row.is_empty() {
            return Ok(());
        }
        let columns: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", "),
        );
        let values: Vec<SqlValue> = row.values().map(|v| to_sql(v, None)).collect();
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    pub fn insert_rows(&self, table: &str, rows: &[Row]) -> ReportResult<()> {
        for row in rows {
            self.insert_row(table, row)?;
        }
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> ReportResult<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Saved reports ──────────────────────────────────────────

    pub fn save_report(&self, report_id: &str, name: &str, definition: &ReportDefinition) -> ReportResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO saved_report (report_id, name, definition_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                report_id,
                name,
                serde_json::to_string(definition)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_report(&self, report_id: &str) -> ReportResult<Option<ReportDefinition>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT definition_json FROM saved_report WHERE report_id = ?1",
                params![report_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(ReportDefinition::from_json(&json)?)),
            None => Ok(None),
        }
    }

    // ── Alert history ──────────────────────────────────────────

    pub fn record_alert_result(&self, result: &AlertEvaluationResult) -> ReportResult<()> {
        self.conn.execute(
            "INSERT INTO alert_history (alert_id, status, observed_value, delta, evaluated_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.alert_id,
                result.status.as_str(),
                result.observed_value.as_ref().map(|v| v.to_string()),
                result.delta,
                result.evaluated_at.to_rfc3339(),
                serde_json::to_string(result)?,
            ],
        )?;
        Ok(())
    }

    pub fn alert_history_count(&self, alert_id: &str) -> ReportResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM alert_history WHERE alert_id = ?1",
            params![alert_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Plan execution ─────────────────────────────────────────

    fn run_plan(&self, plan: &QueryPlan) -> rusqlite::Result<Vec<Row>> {
        let compiled = compile_sql(plan);
        log::debug!("sqlite: {}", compiled.sql);

        let mut stmt = self.conn.prepare(&compiled.sql)?;
        let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut mapped = Row::new();
            for (i, column) in plan.output.iter().enumerate() {
                let value = from_sql(row.get_ref(i)?, column.column_type);
                mapped.insert(column.key.clone(), value);
            }
            out.push(mapped);
        }
        Ok(out)
    }
}

impl QueryBackend for ReportStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn execute(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>> {
        self.run_plan(plan)
            .map_err(|e| ReportError::query_execution(&plan.data_source, e))
    }
}

/// Render `plan` as a single SQLite SELECT.
pub fn compile_sql(plan: &QueryPlan) -> CompiledSql {
    let mut params = Vec::new();

    let select: Vec<String> = if plan.is_aggregated() {
        let mut cols: Vec<String> = plan.group_by.iter().map(|c| quote_ident(c)).collect();
        for agg in &plan.aggregations {
            let expr = match (&agg.column, agg.function) {
                (None, _) => "COUNT(*)".to_string(),
                (Some(c), AggregateFn::CountDistinct) => format!("COUNT(DISTINCT {})", quote_ident(c)),
                (Some(c), function) => format!("{}({})", function.as_str().to_uppercase(), quote_ident(c)),
            };
            cols.push(format!("{expr} AS {}", quote_ident(&agg.output)));
        }
        cols
    } else {
        plan.output.iter().map(|c| quote_ident(&c.key)).collect()
    };

    let mut sql = format!("SELECT {} FROM {}", select.join(", "), quote_ident(&plan.table));

    if !plan.predicates.is_empty() {
        let clauses: Vec<String> = plan
            .predicates
            .iter()
            .map(|p| predicate_sql(p, &mut params))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !plan.group_by.is_empty() {
        let cols: Vec<String> = plan.group_by.iter().map(|c| quote_ident(c)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&cols.join(", "));
    }

    if !plan.order_by.is_empty() {
        let keys: Vec<String> = plan
            .order_by
            .iter()
            .map(|o| match o.direction {
                SortDirection::Asc => format!("{} ASC NULLS LAST", quote_ident(&o.column)),
                SortDirection::Desc => format!("{} DESC NULLS FIRST", quote_ident(&o.column)),
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    if let Some(limit) = plan.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    CompiledSql { sql, params }
}

fn predicate_sql(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    let col = quote_ident(&predicate.column);
    let ty = Some(predicate.column_type);
    let mut bind = |v: &Value| {
        params.push(to_sql(v, ty));
        "?".to_string()
    };
    match &predicate.condition {
        Condition::Equals(v) => format!("{col} = {}", bind(v)),
        Condition::NotEquals(v) => format!("{col} <> {}", bind(v)),
        Condition::Gt(v) => format!("{col} > {}", bind(v)),
        Condition::Gte(v) => format!("{col} >= {}", bind(v)),
        Condition::Lt(v) => format!("{col} < {}", bind(v)),
        Condition::Lte(v) => format!("{col} <= {}", bind(v)),
        Condition::Between(low, high) => {
            let low = bind(low);
            let high = bind(high);
            format!("{col} BETWEEN {low} AND {high}")
        }
        Condition::In(list) => {
            let marks: Vec<String> = list.iter().map(&mut bind).collect();
            format!("{col} IN ({})", marks.join(", "))
        }
        Condition::Contains(needle) => {
            let escaped = needle
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let mark = bind(&Value::String(format!("%{escaped}%")));
            format!("{col} LIKE {mark} ESCAPE '\\'")
        }
        Condition::IsNull => format!("{col} IS NULL"),
        Condition::IsNotNull => format!("{col} IS NOT NULL"),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn to_sql(value: &Value, column_type: Option<ColumnType>) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => match column_type {
            Some(t) if t.is_numeric() => match as_f64(value) {
                Some(f) => SqlValue::Real(f),
                None => SqlValue::Text(s.clone()),
            },
            _ => SqlValue::Text(s.clone()),
        },
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>, column_type: ColumnType) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if column_type == ColumnType::Boolean => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => number_value(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
