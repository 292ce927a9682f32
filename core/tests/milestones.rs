//! Milestone tests: tier progress, level-change notifications, row adapters.

use reporting_core::{
    config::ReportingConfig,
    milestone::{
        calculate_milestone_progress, generate_milestone_notification, map_db_row_to_agent_level,
        map_db_row_to_milestone_progress, AdvisorMetrics, AgentLevel, TierChange,
    },
    types::Row,
};
use serde_json::{json, Value};

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn bronze_silver() -> Vec<AgentLevel> {
    vec![
        AgentLevel::new("Bronze", &[("deals", 5.0)]),
        AgentLevel::new("Silver", &[("deals", 20.0)]),
    ]
}

#[test]
fn bronze_advisor_is_a_quarter_of_the_way_to_silver() {
    let metrics = AdvisorMetrics::new("adv-1").with_metric("deals", 5.0);
    let result = calculate_milestone_progress(&metrics, &bronze_silver());

    assert_eq!(result.current_level.as_deref(), Some("Bronze"));
    assert_eq!(result.next_level.as_deref(), Some("Silver"));
    assert!((result.progress - 0.25).abs() < 1e-9);
    assert_eq!(result.bottleneck_metric.as_deref(), Some("deals"));
    assert!(!result.max_level_reached);
}

#[test]
fn no_level_yet_measures_progress_to_the_first() {
    let metrics = AdvisorMetrics::new("adv-2").with_metric("deals", 2.0);
    let result = calculate_milestone_progress(&metrics, &bronze_silver());

    assert_eq!(result.current_level, None);
    assert_eq!(result.next_level.as_deref(), Some("Bronze"));
    assert!((result.progress - 0.4).abs() < 1e-9);
}

#[test]
fn top_level_reports_full_progress() {
    let metrics = AdvisorMetrics::new("adv-3").with_metric("deals", 40.0);
    let result = calculate_milestone_progress(&metrics, &bronze_silver());

    assert_eq!(result.current_level.as_deref(), Some("Silver"));
    assert_eq!(result.next_level, None);
    assert_eq!(result.progress, 1.0);
    assert!(result.max_level_reached);
}

/// Every threshold must be met; progress is the weakest metric.
#[test]
fn multi_metric_tiers_use_the_bottleneck() {
    let config = ReportingConfig::default_test();
    let metrics = AdvisorMetrics::new("adv-4")
        .with_metric("enrollments_closed", 20.0)
        .with_metric("revenue_generated", 6_000.0);
    let result = calculate_milestone_progress(&metrics, &config.agent_levels);

    assert_eq!(result.current_level.as_deref(), Some("Bronze"));
    assert_eq!(result.next_level.as_deref(), Some("Silver"));
    assert_eq!(result.bottleneck_metric.as_deref(), Some("revenue_generated"));
    assert!((result.progress - 0.4).abs() < 1e-9);
    assert_eq!(result.metric_progress.len(), 2);
}

#[test]
fn tiers_follow_rank_not_input_order() {
    let mut levels = ReportingConfig::default_test().agent_levels;
    levels.reverse();
    let metrics = AdvisorMetrics::new("adv-5")
        .with_metric("enrollments_closed", 30.0)
        .with_metric("revenue_generated", 20_000.0);
    let result = calculate_milestone_progress(&metrics, &levels);
    assert_eq!(result.current_level.as_deref(), Some("Silver"));
    assert_eq!(result.next_level.as_deref(), Some("Gold"));
}

#[test]
fn promotion_notification() {
    let note = generate_milestone_notification("Dana", Some("Bronze"), Some("Silver"), &bronze_silver()).unwrap();
    assert_eq!(note.change, TierChange::Promotion);
    assert_eq!(note.level.as_deref(), Some("Silver"));
    assert_eq!(note.title, "Milestone reached: Silver");
    assert!(note.message.contains("Dana"));
}

#[test]
fn first_level_counts_as_promotion() {
    let note = generate_milestone_notification("Dana", None, Some("Bronze"), &bronze_silver()).unwrap();
    assert_eq!(note.change, TierChange::Promotion);
}

#[test]
fn demotion_notification() {
    let note = generate_milestone_notification("Dana", Some("Silver"), Some("Bronze"), &bronze_silver()).unwrap();
    assert_eq!(note.change, TierChange::Demotion);
    assert_eq!(note.title, "Level change: Bronze");
}

#[test]
fn unchanged_or_unknown_levels_produce_nothing() {
    assert!(generate_milestone_notification("Dana", Some("Silver"), Some("Silver"), &bronze_silver()).is_none());
    assert!(generate_milestone_notification("Dana", Some("Silver"), Some("Diamond"), &bronze_silver()).is_none());
}

// ── Row adapters ─────────────────────────────────────────────────────────────

#[test]
fn level_rows_take_thresholds_from_min_columns() {
    let level = map_db_row_to_agent_level(&row(json!({
        "id": "gold",
        "name": "Gold",
        "level_order": 4,
        "min_enrollments_closed": 50,
        "min_revenue_generated": "40000",
        "description": "Top producer",
    })));

    assert_eq!(level.id, "gold");
    assert_eq!(level.rank, 4);
    assert_eq!(level.thresholds.get("enrollments_closed"), Some(&50.0));
    assert_eq!(level.thresholds.get("revenue_generated"), Some(&40_000.0));
    assert_eq!(level.description.as_deref(), Some("Top producer"));
}

#[test]
fn level_rows_accept_embedded_threshold_json() {
    let level = map_db_row_to_agent_level(&row(json!({
        "name": "Silver",
        "thresholds": "{\"deals\": 20}",
    })));
    assert_eq!(level.thresholds.get("deals"), Some(&20.0));
}

#[test]
fn sparse_level_rows_get_defaults() {
    let level = map_db_row_to_agent_level(&Row::new());
    assert_eq!(level.id, "");
    assert_eq!(level.name, "Unnamed level");
    assert_eq!(level.rank, 0);
    assert!(level.thresholds.is_empty());
}

#[test]
fn progress_rows_are_clamped_and_parsed() {
    let progress = map_db_row_to_milestone_progress(&row(json!({
        "advisor_id": "adv-1",
        "current_level": "Bronze",
        "next_level": "Silver",
        "progress": 1.7,
        "achieved_at": "2024-06-01T12:00:00Z",
    })));
    assert_eq!(progress.advisor_id, "adv-1");
    assert_eq!(progress.progress, 1.0);
    assert!(progress.achieved_at.is_some());
    assert!(progress.updated_at.is_none());

    let empty = map_db_row_to_milestone_progress(&Row::new());
    assert_eq!(empty.progress, 0.0);
    assert_eq!(empty.current_level, None);
}
