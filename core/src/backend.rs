//! Query backend trait and the in-memory backend.
//!
//! RULE: The query engine never talks to a data store.
//! Anything that can run a QueryPlan implements QueryBackend and
//! reports failures as a single ReportError::QueryExecution.

use crate::{
    error::{ReportError, ReportResult},
    query_engine::{execute_plan, QueryPlan},
    types::Row,
};
use std::collections::HashMap;

/// The contract every data store adapter must fulfill.
pub trait QueryBackend {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Run `plan` and return every result row, or fail as a whole.
    fn execute(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>>;
}

impl<B: QueryBackend + ?Sized> QueryBackend for &B {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn execute(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>> {
        (**self).execute(plan)
    }
}

/// Fixture tables held in memory, keyed by physical table name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    tables: HashMap<String, Vec<Row>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.insert_table(table, rows);
        self
    }

    pub fn insert_table(&mut self, table: &str, rows: Vec<Row>) {
        self.tables.insert(table.to_string(), rows);
    }
}

impl QueryBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn execute(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>> {
        let rows = self.tables.get(&plan.table).ok_or_else(|| {
            ReportError::query_execution(
                &plan.data_source,
                format!("table '{}' is not loaded", plan.table),
            )
        })?;
        Ok(execute_plan(plan, rows))
    }
}
