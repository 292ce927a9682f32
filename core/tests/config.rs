//! Config loading tests: the shipped data/ directory matches the defaults.

use reporting_core::{alert::ZeroBaselinePolicy, config::ReportingConfig, export::ExportFormat};

fn data_dir() -> String {
    format!("{}/../data", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn shipped_config_loads() {
    let config = ReportingConfig::load(&data_dir()).unwrap();
    assert_eq!(config.data_sources.len(), 4);
    assert_eq!(config.agent_levels.len(), 5);
    assert_eq!(config.alert_policy.zero_baseline_policy, ZeroBaselinePolicy::NotTriggered);
    assert_eq!(config.export.default_format, ExportFormat::Csv);
    assert_eq!(config.export.sheet_name, "Report");
}

/// data/ and default_test() describe the same catalog, templates and tiers.
#[test]
fn shipped_config_matches_test_defaults() {
    let loaded = ReportingConfig::load(&data_dir()).unwrap();
    let defaults = ReportingConfig::default_test();

    assert_eq!(loaded.data_sources, defaults.data_sources);
    assert_eq!(loaded.templates, defaults.templates);
    let names = |levels: &[reporting_core::milestone::AgentLevel]| {
        levels.iter().map(|l| (l.name.clone(), l.rank, l.thresholds.clone())).collect::<Vec<_>>()
    };
    assert_eq!(names(&loaded.agent_levels), names(&defaults.agent_levels));
}

#[test]
fn config_builds_catalogs() {
    let config = ReportingConfig::default_test();
    let catalog = config.catalog().unwrap();
    assert!(catalog.contains("enrollments"));
    assert!(config.template_catalog().get("lead-sources").is_some());
}

#[test]
fn missing_directory_is_an_error() {
    let err = ReportingConfig::load("/nonexistent/reporting-data").unwrap_err();
    assert!(err.to_string().contains("Cannot read"));
}

/// The sample alerts shipped for the runner parse and reference valid reports.
#[test]
fn sample_alerts_are_valid() {
    let raw = std::fs::read_to_string(format!("{}/alerts/sample_alerts.json", data_dir())).unwrap();
    let alerts: Vec<reporting_core::alert::ReportAlert> = serde_json::from_str(&raw).unwrap();
    let catalog = ReportingConfig::default_test().catalog().unwrap();

    assert_eq!(alerts.len(), 3);
    assert!(!alerts[2].enabled);
    for alert in &alerts {
        reporting_core::query_engine::build_query(&catalog, &alert.report_definition).unwrap();
    }
}
