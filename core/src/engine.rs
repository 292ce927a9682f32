//! The report engine: wires the catalog, a backend and the services.
//!
//! EXECUTION ORDER (per report):
//!   1. build_query(): validate against the catalog, compile a plan
//!   2. backend: execute the plan, all rows or one error
//!   3. consumers: alerts read the first row, exports read all rows
//!
//! RULES:
//!   - The engine holds no mutable state; every call is independent.
//!   - Every backend failure surfaces as ReportError::QueryExecution.
//!   - One alert's failure never affects another alert in the batch.

use crate::{
    alert::{
        evaluate_alerts, AlertEvaluationResult, AlertInput, ReportAlert, ZeroBaselinePolicy,
    },
    backend::QueryBackend,
    catalog::{ColumnCatalog, ColumnDefinition},
    definition::ReportDefinition,
    error::{ReportError, ReportResult},
    export::{export_data, ExportArtifact, ExportFormat, ExportOptions, DEFAULT_SHEET_NAME},
    query_engine::{build_query, QueryPlan},
    template::{convert_template_to_report, ReportTemplate},
    types::Row,
};
use std::collections::HashMap;

pub struct ReportEngine<'a, B: QueryBackend> {
    catalog: &'a ColumnCatalog,
    backend: B,
    policy: ZeroBaselinePolicy,
    sheet_name: String,
}

impl<'a, B: QueryBackend> ReportEngine<'a, B> {
    pub fn new(catalog: &'a ColumnCatalog, backend: B) -> Self {
        Self {
            catalog,
            backend,
            policy: ZeroBaselinePolicy::default(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
        }
    }

    pub fn with_policy(mut self, policy: ZeroBaselinePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sheet_name(mut self, sheet_name: &str) -> Self {
        self.sheet_name = sheet_name.to_string();
        self
    }

    pub fn catalog(&self) -> &ColumnCatalog {
        self.catalog
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validate and compile without executing.
    pub fn plan(&self, definition: &ReportDefinition) -> ReportResult<QueryPlan> {
        build_query(self.catalog, definition)
    }

    pub fn run_report(&self, definition: &ReportDefinition) -> ReportResult<Vec<Row>> {
        self.run_plan(&self.plan(definition)?)
    }

    /// Execute an already compiled plan.
    pub fn run_plan(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>> {
        let rows = self.execute(plan)?;
        log::info!(
            "report on {} via {}: {} rows",
            plan.data_source,
            self.backend.name(),
            rows.len()
        );
        Ok(rows)
    }

    pub fn run_template(&self, template: &ReportTemplate) -> ReportResult<Vec<Row>> {
        log::debug!("running template {}", template.id);
        self.run_report(&convert_template_to_report(template))
    }

    fn execute(&self, plan: &QueryPlan) -> ReportResult<Vec<Row>> {
        self.backend.execute(plan).map_err(|e| match e {
            e @ ReportError::QueryExecution { .. } => e,
            other => ReportError::query_execution(&plan.data_source, other),
        })
    }

    // ── Alerts ───────────────────────────────────────────────────────────────

    /// Run each alert's report and evaluate its condition on the first row.
    ///
    /// `baselines` maps alert id to the previous-window row used by change
    /// conditions. Results come back in input order.
    pub fn evaluate_alerts(
        &self,
        alerts: &[ReportAlert],
        baselines: &HashMap<String, Row>,
    ) -> Vec<AlertEvaluationResult> {
        alerts
            .iter()
            .map(|alert| {
                if !alert.enabled {
                    return self.evaluate_one(alert, &Row::new(), None);
                }
                let rows = match self.run_report(&alert.report_definition) {
                    Ok(rows) => rows,
                    Err(e) => {
                        log::warn!("alert {} ({}) could not run its report: {e}", alert.id, alert.name);
                        return AlertEvaluationResult::failed(&alert.id, e.to_string());
                    }
                };
                match rows.first() {
                    Some(current) => self.evaluate_one(alert, current, baselines.get(&alert.id)),
                    None => {
                        log::warn!("alert {} ({}): report returned no rows", alert.id, alert.name);
                        AlertEvaluationResult::failed(&alert.id, "report returned no rows")
                    }
                }
            })
            .collect()
    }

    fn evaluate_one(&self, alert: &ReportAlert, current: &Row, previous: Option<&Row>) -> AlertEvaluationResult {
        let input = AlertInput { alert, current, previous };
        evaluate_alerts(&[input], self.policy)
            .pop()
            .unwrap_or_else(|| AlertEvaluationResult::failed(&alert.id, "alert was not evaluated"))
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Column definitions describing a plan's result rows.
    pub fn export_columns(&self, plan: &QueryPlan) -> Vec<ColumnDefinition> {
        plan.output.iter().map(|c| c.to_column_definition()).collect()
    }

    pub fn export_report(
        &self,
        definition: &ReportDefinition,
        format: ExportFormat,
        filename: Option<&str>,
    ) -> ReportResult<ExportArtifact> {
        let plan = self.plan(definition)?;
        let rows = self.execute(&plan)?;
        self.export_rows(&plan, &rows, format, filename)
    }

    /// Export rows already produced by `plan` without querying again.
    pub fn export_rows(
        &self,
        plan: &QueryPlan,
        rows: &[Row],
        format: ExportFormat,
        filename: Option<&str>,
    ) -> ReportResult<ExportArtifact> {
        let mut options = ExportOptions::new(format, self.export_columns(plan));
        options.sheet_name = Some(self.sheet_name.clone());
        if let Some(name) = filename {
            options = options.with_filename(name);
        }
        export_data(rows, &options)
    }
}
