//! Alert evaluation: threshold and change conditions over report rows.
//!
//! RULES:
//!   - Each alert is evaluated on its own. A broken alert yields an
//!     Error status in its slot; it never aborts the batch.
//!   - Batch results keep input order.
//!   - Percent change from a zero baseline is governed by
//!     ZeroBaselinePolicy and never produces NaN or infinity.

use crate::{
    definition::ReportDefinition,
    error::{ReportError, ReportResult, ValidationError},
    types::{ColumnKey, EntityId, Row},
    value::{as_f64, compare_values},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt  => ">",
            Comparator::Gte => ">=",
            Comparator::Lt  => "<",
            Comparator::Lte => "<=",
            Comparator::Eq  => "==",
            Comparator::Ne  => "!=",
        }
    }

    /// Does `lhs <op> rhs` hold, given `lhs.cmp(rhs) == ord`?
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            Comparator::Gt  => ord == Ordering::Greater,
            Comparator::Gte => ord != Ordering::Less,
            Comparator::Lt  => ord == Ordering::Less,
            Comparator::Lte => ord != Ordering::Greater,
            Comparator::Eq  => ord == Ordering::Equal,
            Comparator::Ne  => ord != Ordering::Equal,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Absolute,
    Percent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowPeriod {
    Day,
    Week,
    Month,
    Quarter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

/// What a percent change from a zero baseline resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZeroBaselinePolicy {
    #[default]
    NotTriggered,
    /// Report an explicit Undefined status instead.
    Undefined,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    Threshold {
        column: ColumnKey,
        comparator: Comparator,
        value: Value,
    },
    Change {
        column: ColumnKey,
        window_period: WindowPeriod,
        change_type: ChangeType,
        comparator: Comparator,
        /// Absolute amount, or a fraction for percent changes (0.05 = 5%).
        value: f64,
    },
}

impl AlertCondition {
    pub fn column(&self) -> &str {
        match self {
            AlertCondition::Threshold { column, .. } | AlertCondition::Change { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportAlert {
    pub id: EntityId,
    pub name: String,
    pub report_definition: ReportDefinition,
    pub condition: AlertCondition,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ReportAlert {
    pub fn new(name: &str, report_definition: ReportDefinition, condition: AlertCondition) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            report_definition,
            condition,
            severity: Severity::default(),
            enabled: true,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertStatus {
    Triggered,
    NotTriggered,
    /// Percent change from zero under ZeroBaselinePolicy::Undefined.
    Undefined,
    Error { message: String },
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Triggered    => "triggered",
            AlertStatus::NotTriggered => "not_triggered",
            AlertStatus::Undefined    => "undefined",
            AlertStatus::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvaluationResult {
    pub alert_id: EntityId,
    pub status: AlertStatus,
    pub observed_value: Option<Value>,
    pub previous_value: Option<Value>,
    pub delta: Option<f64>,
    pub evaluated_at: DateTime<Utc>,
}

impl AlertEvaluationResult {
    pub fn failed(alert_id: &str, message: impl Into<String>) -> Self {
        Self::unevaluated(alert_id, AlertStatus::Error { message: message.into() })
    }

    fn unevaluated(alert_id: &str, status: AlertStatus) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            status,
            observed_value: None,
            previous_value: None,
            delta: None,
            evaluated_at: Utc::now(),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.status == AlertStatus::Triggered
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, AlertStatus::Error { .. })
    }
}

/// Plain notification data for a delivery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertNotification {
    pub alert_id: EntityId,
    pub title: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub severity: Severity,
}

/// One alert with the rows it is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AlertInput<'a> {
    pub alert: &'a ReportAlert,
    pub current: &'a Row,
    pub previous: Option<&'a Row>,
}

// ── Conditions ───────────────────────────────────────────────────────────────

/// Compare numerically when both sides are numeric, otherwise as strings.
/// Nulls and mismatched kinds never trigger.
pub fn evaluate_threshold_condition(value: &Value, comparator: Comparator, target: &Value) -> bool {
    if value.is_null() || target.is_null() {
        return false;
    }
    compare_values(value, target).is_some_and(|ord| comparator.holds(ord))
}

/// Absolute delta, or percent delta as a fraction of `previous`.
/// `None` when the percent baseline is zero.
pub fn compute_change(current: f64, previous: f64, change_type: ChangeType) -> Option<f64> {
    match change_type {
        ChangeType::Absolute => Some(current - previous),
        ChangeType::Percent if previous == 0.0 => None,
        ChangeType::Percent => Some((current - previous) / previous),
    }
}

pub fn evaluate_change_condition(
    current: f64,
    previous: f64,
    change_type: ChangeType,
    comparator: Comparator,
    target: f64,
) -> bool {
    compute_change(current, previous, change_type)
        .and_then(|delta| delta.partial_cmp(&target))
        .is_some_and(|ord| comparator.holds(ord))
}

// ── Alerts ───────────────────────────────────────────────────────────────────

pub fn evaluate_alert(
    alert: &ReportAlert,
    current_row: &Row,
    previous_row: Option<&Row>,
    policy: ZeroBaselinePolicy,
) -> ReportResult<AlertEvaluationResult> {
    let column = alert.condition.column();
    let observed = current_row.get(column).cloned().ok_or_else(|| {
        ValidationError::single(
            "condition.column",
            format!("column '{column}' is missing from the report row"),
        )
    })?;

    let mut result = AlertEvaluationResult {
        alert_id: alert.id.clone(),
        status: AlertStatus::NotTriggered,
        observed_value: Some(observed.clone()),
        previous_value: None,
        delta: None,
        evaluated_at: Utc::now(),
    };

    match &alert.condition {
        AlertCondition::Threshold { comparator, value, .. } => {
            if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                return Err(ValidationError::single(
                    "condition.value",
                    "threshold value must be a single number, string or boolean",
                )
                .into());
            }
            if evaluate_threshold_condition(&observed, *comparator, value) {
                result.status = AlertStatus::Triggered;
            }
        }
        AlertCondition::Change { change_type, comparator, value, .. } => {
            let previous_row = previous_row.ok_or_else(|| ReportError::MissingPreviousData {
                alert_id: alert.id.clone(),
            })?;
            let previous = previous_row.get(column).cloned().unwrap_or(Value::Null);
            result.previous_value = Some(previous.clone());

            let mut errors = ValidationError::new();
            let current_num = as_f64(&observed);
            let previous_num = as_f64(&previous);
            if current_num.is_none() {
                errors.push("condition.column", format!("current value of '{column}' is not numeric"));
            }
            if previous_num.is_none() {
                errors.push("condition.column", format!("previous value of '{column}' is not numeric"));
            }
            if !value.is_finite() {
                errors.push("condition.value", "change target must be finite");
            }
            errors.into_result()?;
            let (current, previous) = (current_num.unwrap_or_default(), previous_num.unwrap_or_default());

            match compute_change(current, previous, *change_type) {
                Some(delta) => {
                    result.delta = Some(delta);
                    if evaluate_change_condition(current, previous, *change_type, *comparator, *value) {
                        result.status = AlertStatus::Triggered;
                    }
                }
                None => {
                    result.status = match policy {
                        ZeroBaselinePolicy::NotTriggered => AlertStatus::NotTriggered,
                        ZeroBaselinePolicy::Undefined => AlertStatus::Undefined,
                    };
                }
            }
        }
    }

    Ok(result)
}

/// Evaluate every alert independently. Output order equals input order.
pub fn evaluate_alerts(inputs: &[AlertInput<'_>], policy: ZeroBaselinePolicy) -> Vec<AlertEvaluationResult> {
    inputs
        .iter()
        .map(|input| {
            if !input.alert.enabled {
                return AlertEvaluationResult::unevaluated(&input.alert.id, AlertStatus::NotTriggered);
            }
            match evaluate_alert(input.alert, input.current, input.previous, policy) {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("alert {} ({}) failed: {e}", input.alert.id, input.alert.name);
                    AlertEvaluationResult::failed(&input.alert.id, e.to_string())
                }
            }
        })
        .collect()
}

pub fn get_triggered_alerts(results: &[AlertEvaluationResult]) -> Vec<&AlertEvaluationResult> {
    results.iter().filter(|r| r.is_triggered()).collect()
}

/// Build the message for a triggered result. `None` if it did not fire.
pub fn create_alert_notification(
    alert: &ReportAlert,
    result: &AlertEvaluationResult,
) -> Option<AlertNotification> {
    if !result.is_triggered() {
        return None;
    }

    let observed = result.observed_value.as_ref().map(display_value).unwrap_or_default();
    let message = match &alert.condition {
        AlertCondition::Threshold { column, comparator, value } => format!(
            "{column} is {observed}, which meets the condition {column} {comparator} {}",
            display_value(value)
        ),
        AlertCondition::Change { column, window_period, change_type, comparator, value } => {
            let previous = result.previous_value.as_ref().map(display_value).unwrap_or_default();
            let delta = result.delta.unwrap_or_default();
            let (delta, target) = match change_type {
                ChangeType::Absolute => (format!("{delta:+}"), format!("{value}")),
                ChangeType::Percent => (
                    format!("{:+.2}%", delta * 100.0),
                    format!("{:.2}%", value * 100.0),
                ),
            };
            format!(
                "{column} changed by {delta} over the {} from {previous} to {observed} (condition: change {comparator} {target})",
                window_label(*window_period)
            )
        }
    };

    log::warn!("alert fired: {}: {message}", alert.name);
    Some(AlertNotification {
        alert_id: alert.id.clone(),
        title: format!("Alert triggered: {}", alert.name),
        message,
        triggered_at: result.evaluated_at,
        severity: alert.severity,
    })
}

fn window_label(period: WindowPeriod) -> &'static str {
    match period {
        WindowPeriod::Day     => "last day",
        WindowPeriod::Week    => "last week",
        WindowPeriod::Month   => "last month",
        WindowPeriod::Quarter => "last quarter",
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
