//! Report templates: categorized preset definitions.

use crate::{
    definition::{AggregateFn, Aggregation, Filter, FilterOperator, ReportDefinition, SortSpec},
    types::EntityId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Sales,
    Enrollment,
    Performance,
    Marketing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportTemplate {
    pub id: EntityId,
    pub title: String,
    pub description: String,
    pub category: TemplateCategory,
    pub definition: ReportDefinition,
}

/// A fresh, caller-owned copy of the template's definition.
pub fn convert_template_to_report(template: &ReportTemplate) -> ReportDefinition {
    template.definition.clone()
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<ReportTemplate>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<ReportTemplate>) -> Self {
        Self { templates }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_templates())
    }

    pub fn all(&self) -> &[ReportTemplate] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&ReportTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn by_category(&self, category: TemplateCategory) -> Vec<&ReportTemplate> {
        self.templates
            .iter()
            .filter(|t| t.category == category)
            .collect()
    }
}

fn template(
    id: &str,
    title: &str,
    description: &str,
    category: TemplateCategory,
    definition: ReportDefinition,
) -> ReportTemplate {
    ReportTemplate {
        id: id.into(),
        title: title.into(),
        description: description.into(),
        category,
        definition,
    }
}

pub fn builtin_templates() -> Vec<ReportTemplate> {
    vec![
        template(
            "pipeline-by-stage",
            "Pipeline by Stage",
            "Open deal count and value per pipeline stage",
            TemplateCategory::Sales,
            ReportDefinition::new("deals")
                .filter(Filter::new("stage", FilterOperator::NotEquals, json!("closed_lost")))
                .group_by("stage")
                .aggregate(Aggregation::count_rows().with_alias("deal_count"))
                .aggregate(Aggregation::new(AggregateFn::Sum, "value"))
                .sort(SortSpec::desc("value")),
        ),
        template(
            "revenue-by-advisor",
            "Revenue by Advisor",
            "Won revenue per advisor and region",
            TemplateCategory::Sales,
            ReportDefinition::new("deals")
                .filter(Filter::new("is_won", FilterOperator::Equals, json!(true)))
                .group_by("region")
                .group_by("advisor_id")
                .aggregate(Aggregation::new(AggregateFn::Sum, "revenue"))
                .sort(SortSpec::asc("region"))
                .sort(SortSpec::desc("revenue")),
        ),
        template(
            "lead-sources",
            "Lead Sources",
            "Leads and estimated value by acquisition source",
            TemplateCategory::Marketing,
            ReportDefinition::new("leads")
                .group_by("source")
                .aggregate(Aggregation::count_rows().with_alias("leads"))
                .aggregate(Aggregation::new(AggregateFn::Avg, "estimated_value").with_alias("avg_value"))
                .sort(SortSpec::desc("leads")),
        ),
        template(
            "open-leads",
            "Open Leads",
            "Leads not yet converted or lost, newest first",
            TemplateCategory::Marketing,
            ReportDefinition::new("leads")
                .filter(Filter::new("status", FilterOperator::In, json!(["new", "contacted", "qualified"])))
                .sort(SortSpec::desc("created_at")),
        ),
        template(
            "enrollments-by-carrier",
            "Enrollments by Carrier",
            "Active enrollments and premium per carrier and plan type",
            TemplateCategory::Enrollment,
            ReportDefinition::new("enrollments")
                .filter(Filter::new("status", FilterOperator::Equals, json!("active")))
                .group_by("carrier")
                .group_by("plan_type")
                .aggregate(Aggregation::count_rows().with_alias("enrollments"))
                .aggregate(Aggregation::new(AggregateFn::Sum, "monthly_premium"))
                .sort(SortSpec::asc("carrier"))
                .sort(SortSpec::asc("plan_type")),
        ),
        template(
            "advisor-leaderboard",
            "Advisor Leaderboard",
            "Active advisors ranked by enrollments closed",
            TemplateCategory::Performance,
            ReportDefinition::new("advisors")
                .filter(Filter::new("active", FilterOperator::Equals, json!(true)))
                .sort(SortSpec::desc("enrollments_closed"))
                .sort(SortSpec::desc("revenue_generated"))
                .limit(25),
        ),
    ]
}
