use crate::{
    alert::ZeroBaselinePolicy,
    catalog::{builtin_data_sources, ColumnCatalog, DataSourceDefinition},
    error::ReportResult,
    export::{ExportFormat, DEFAULT_SHEET_NAME},
    milestone::AgentLevel,
    template::{builtin_templates, ReportTemplate, TemplateCatalog},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    data_sources: Vec<DataSourceDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct TemplatesFile {
    templates: Vec<ReportTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
struct AgentLevelsFile {
    levels: Vec<AgentLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertPolicyConfig {
    #[serde(default)]
    pub zero_baseline_policy: ZeroBaselinePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    pub default_format: ExportFormat,
    pub sheet_name: String,
}

#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub data_sources: Vec<DataSourceDefinition>,
    pub templates: Vec<ReportTemplate>,
    pub agent_levels: Vec<AgentLevel>,
    pub alert_policy: AlertPolicyConfig,
    pub export: ExportConfig,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Invalid JSON in {path}: {e}"))
}

impl ReportingConfig {
    /// Load from the data/ directory.
    /// In tests, use ReportingConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let catalog_file: CatalogFile = read_json(&format!("{data_dir}/catalog/columns.json"))?;
        let templates_file: TemplatesFile =
            read_json(&format!("{data_dir}/templates/report_templates.json"))?;
        let levels_file: AgentLevelsFile =
            read_json(&format!("{data_dir}/milestones/agent_levels.json"))?;
        let alert_policy: AlertPolicyConfig =
            read_json(&format!("{data_dir}/alerts/alert_policy.json"))?;
        let export: ExportConfig = read_json(&format!("{data_dir}/export/export_defaults.json"))?;

        let config = Self {
            data_sources: catalog_file.data_sources,
            templates: templates_file.templates,
            agent_levels: levels_file.levels,
            alert_policy,
            export,
        };
        log::info!(
            "config loaded from {data_dir}: {} data sources, {} templates, {} levels",
            config.data_sources.len(),
            config.templates.len(),
            config.agent_levels.len(),
        );
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        fn level(id: &str, name: &str, rank: i64, thresholds: &[(&str, f64)]) -> AgentLevel {
            AgentLevel {
                id: id.into(),
                name: name.into(),
                rank,
                thresholds: thresholds
                    .iter()
                    .map(|(m, v)| (m.to_string(), *v))
                    .collect::<BTreeMap<_, _>>(),
                description: None,
            }
        }

        Self {
            data_sources: builtin_data_sources(),
            templates: builtin_templates(),
            agent_levels: vec![
                level("associate", "Associate", 1, &[]),
                level("bronze", "Bronze", 2, &[("enrollments_closed", 10.0), ("revenue_generated", 5_000.0)]),
                level("silver", "Silver", 3, &[("enrollments_closed", 25.0), ("revenue_generated", 15_000.0)]),
                level("gold", "Gold", 4, &[("enrollments_closed", 50.0), ("revenue_generated", 40_000.0)]),
                level("platinum", "Platinum", 5, &[("enrollments_closed", 100.0), ("revenue_generated", 100_000.0)]),
            ],
            alert_policy: AlertPolicyConfig {
                zero_baseline_policy: ZeroBaselinePolicy::NotTriggered,
            },
            export: ExportConfig {
                default_format: ExportFormat::Csv,
                sheet_name: DEFAULT_SHEET_NAME.into(),
            },
        }
    }

    /// Build the immutable column catalog described by this config.
    pub fn catalog(&self) -> ReportResult<ColumnCatalog> {
        ColumnCatalog::new(self.data_sources.clone())
    }

    pub fn template_catalog(&self) -> TemplateCatalog {
        TemplateCatalog::new(self.templates.clone())
    }
}
