//! Milestone service: advisor progress against tiered thresholds.
//!
//! A tier is achieved when every one of its thresholds is met at once.
//! Progress toward the next tier is its bottleneck metric: the lowest
//! `current / required` ratio, capped at 1.0.

use crate::{
    types::{EntityId, Row},
    value::as_f64,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdvisorMetrics {
    pub advisor_id: EntityId,
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    /// Raw counts and sums, e.g. `enrollments_closed`, `revenue_generated`.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl AdvisorMetrics {
    pub fn new(advisor_id: &str) -> Self {
        Self {
            advisor_id: advisor_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_metric(mut self, metric: &str, value: f64) -> Self {
        self.metrics.insert(metric.to_string(), value);
        self
    }

    /// Missing metrics read as zero.
    pub fn get(&self, metric: &str) -> f64 {
        self.metrics.get(metric).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLevel {
    #[serde(default)]
    pub id: EntityId,
    pub name: String,
    /// Ascending order of tiers. Equal ranks keep their input order.
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentLevel {
    pub fn new(name: &str, thresholds: &[(&str, f64)]) -> Self {
        Self {
            id: name.to_lowercase(),
            name: name.to_string(),
            rank: 0,
            thresholds: thresholds.iter().map(|(m, v)| (m.to_string(), *v)).collect(),
            description: None,
        }
    }

    pub fn is_met_by(&self, metrics: &AdvisorMetrics) -> bool {
        self.thresholds
            .iter()
            .all(|(metric, required)| *required <= metrics.get(metric))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricProgress {
    pub metric: String,
    pub current: f64,
    pub required: f64,
    /// `current / required`, capped to [0, 1].
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneCalculationResult {
    pub advisor_id: EntityId,
    pub current_level: Option<String>,
    pub next_level: Option<String>,
    /// Bottleneck ratio toward the next level; 1.0 once the top is reached.
    pub progress: f64,
    pub metric_progress: Vec<MetricProgress>,
    pub bottleneck_metric: Option<String>,
    pub max_level_reached: bool,
}

/// Persisted progress row for one advisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneProgress {
    pub advisor_id: EntityId,
    pub current_level: Option<String>,
    pub next_level: Option<String>,
    pub progress: f64,
    pub achieved_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TierChange {
    Promotion,
    Demotion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneNotification {
    pub change: TierChange,
    pub level: Option<String>,
    pub title: String,
    pub message: String,
}

fn ordered(tiers: &[AgentLevel]) -> Vec<&AgentLevel> {
    let mut ordered: Vec<&AgentLevel> = tiers.iter().collect();
    ordered.sort_by_key(|t| t.rank);
    ordered
}

pub fn calculate_milestone_progress(
    metrics: &AdvisorMetrics,
    tiers: &[AgentLevel],
) -> MilestoneCalculationResult {
    let tiers = ordered(tiers);
    let current_idx = tiers.iter().rposition(|t| t.is_met_by(metrics));
    let next = tiers.get(current_idx.map_or(0, |i| i + 1));

    let metric_progress: Vec<MetricProgress> = next
        .map(|tier| {
            tier.thresholds
                .iter()
                .map(|(metric, &required)| {
                    let current = metrics.get(metric);
                    let ratio = if required <= 0.0 {
                        1.0
                    } else {
                        (current / required).clamp(0.0, 1.0)
                    };
                    MetricProgress {
                        metric: metric.clone(),
                        current,
                        required,
                        ratio,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let bottleneck = metric_progress
        .iter()
        .fold(None::<&MetricProgress>, |worst, p| match worst {
            Some(w) if w.ratio <= p.ratio => Some(w),
            _ => Some(p),
        });

    let max_level_reached = current_idx.is_some() && next.is_none();
    let progress = match (next, bottleneck) {
        (Some(_), Some(b)) => b.ratio,
        (Some(_), None) => 1.0,
        (None, _) if max_level_reached => 1.0,
        (None, _) => 0.0,
    };

    MilestoneCalculationResult {
        advisor_id: metrics.advisor_id.clone(),
        current_level: current_idx.map(|i| tiers[i].name.clone()),
        next_level: next.map(|t| t.name.clone()),
        progress,
        bottleneck_metric: bottleneck.map(|b| b.metric.clone()),
        metric_progress,
        max_level_reached,
    }
}

/// A message when the level changed between two evaluations, else `None`.
pub fn generate_milestone_notification(
    entity_name: &str,
    previous_level: Option<&str>,
    current_level: Option<&str>,
    tiers: &[AgentLevel],
) -> Option<MilestoneNotification> {
    if previous_level == current_level {
        return None;
    }

    let tiers = ordered(tiers);
    let position = |name: Option<&str>| -> Option<Option<usize>> {
        match name {
            None => Some(None),
            Some(n) => tiers.iter().position(|t| t.name == n).map(Some),
        }
    };
    let (Some(before), Some(after)) = (position(previous_level), position(current_level)) else {
        log::warn!(
            "milestone: unknown level in transition {:?} -> {:?} for {entity_name}",
            previous_level,
            current_level
        );
        return None;
    };

    let from = previous_level.unwrap_or("no level");
    let to = current_level.unwrap_or("no level");
    let notification = if after > before {
        MilestoneNotification {
            change: TierChange::Promotion,
            level: current_level.map(str::to_string),
            title: format!("Milestone reached: {to}"),
            message: format!("Congratulations! {entity_name} advanced from {from} to {to}."),
        }
    } else {
        MilestoneNotification {
            change: TierChange::Demotion,
            level: current_level.map(str::to_string),
            title: format!("Level change: {to}"),
            message: format!("{entity_name} moved from {from} to {to}."),
        }
    };
    Some(notification)
}

// ── Row adapters ─────────────────────────────────────────────────────────────

fn text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(row: &Row, key: &str) -> Option<DateTime<Utc>> {
    let raw = row.get(key)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Adapt a level row.
///
/// Defaults: id `""`, name `"Unnamed level"`, rank 0, no description.
/// Thresholds come from a `thresholds` object (or JSON-encoded object) and
/// from `min_<metric>` columns; a missing or non-numeric value becomes 0,
/// which every advisor satisfies.
pub fn map_db_row_to_agent_level(row: &Row) -> AgentLevel {
    let mut thresholds = BTreeMap::new();

    let embedded = match row.get("thresholds") {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::String(s)) => serde_json::from_str::<Row>(s).ok(),
        _ => None,
    };
    for (metric, value) in embedded.iter().flatten() {
        thresholds.insert(metric.clone(), as_f64(value).unwrap_or(0.0));
    }
    for (key, value) in row {
        if let Some(metric) = key.strip_prefix("min_") {
            thresholds.insert(metric.to_string(), as_f64(value).unwrap_or(0.0));
        }
    }

    let rank = ["rank", "level_order", "sort_order"]
        .iter()
        .find_map(|k| row.get(*k).and_then(as_f64))
        .map(|f| f as i64)
        .unwrap_or(0);

    AgentLevel {
        id: text(row, "id").unwrap_or_default(),
        name: text(row, "name").unwrap_or_else(|| "Unnamed level".to_string()),
        rank,
        thresholds,
        description: text(row, "description"),
    }
}

/// Adapt a progress row. Missing progress reads as 0.0; missing levels and
/// timestamps stay `None`.
pub fn map_db_row_to_milestone_progress(row: &Row) -> MilestoneProgress {
    MilestoneProgress {
        advisor_id: text(row, "advisor_id").unwrap_or_default(),
        current_level: text(row, "current_level"),
        next_level: text(row, "next_level"),
        progress: row
            .get("progress")
            .and_then(as_f64)
            .map(|p| p.clamp(0.0, 1.0))
            .unwrap_or(0.0),
        achieved_at: timestamp(row, "achieved_at"),
        updated_at: timestamp(row, "updated_at"),
    }
}
