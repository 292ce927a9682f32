//! report-runner: headless report runner for the CRM reporting core.
//!
//! Usage:
//!   report-runner --template pipeline-by-stage --format excel --out ./exports
//!   report-runner --definition report.json --db crm.db
//!   report-runner --seed-demo --milestones
//!   report-runner --alerts data/alerts/sample_alerts.json

use anyhow::{bail, Context, Result};
use reporting_core::{
    alert::{create_alert_notification, ReportAlert},
    config::ReportingConfig,
    definition::ReportDefinition,
    engine::ReportEngine,
    error::ReportResult,
    export::{ExportArtifact, ExportFormat, ExportSink},
    milestone::{calculate_milestone_progress, AdvisorMetrics},
    store::ReportStore,
    types::Row,
    value::as_f64,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Writes artifacts into a directory.
struct FileSink {
    dir: PathBuf,
}

impl ExportSink for FileSink {
    fn deliver(&self, artifact: &ExportArtifact) -> ReportResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(anyhow::Error::from)?;
        let path = self.dir.join(&artifact.filename);
        std::fs::write(&path, &artifact.content).map_err(anyhow::Error::from)?;
        log::info!("wrote {} ({})", path.display(), artifact.mime_type);
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let out_dir = flag_value(&args, "--out").unwrap_or(".");
    let seed_demo = args.iter().any(|a| a == "--seed-demo") || db == ":memory:";
    let show_milestones = args.iter().any(|a| a == "--milestones");

    let config = ReportingConfig::load(data_dir)?;
    let catalog = config.catalog()?;
    let templates = config.template_catalog();
    let format = match flag_value(&args, "--format") {
        Some(raw) => parse_format(raw)?,
        None => config.export.default_format,
    };

    println!("CRM reporting: report-runner");
    println!("  data_dir:  {data_dir}");
    println!("  db:        {db}");
    println!("  format:    {}", format.extension());
    println!();

    let store = ReportStore::open(db)?;
    store.migrate()?;
    if seed_demo {
        seed_demo_data(&store)?;
    }

    let definition = if let Some(path) = flag_value(&args, "--definition") {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
        ReportDefinition::from_json(&raw)?
    } else {
        let id = flag_value(&args, "--template").unwrap_or("pipeline-by-stage");
        match templates.get(id) {
            Some(template) => template.definition.clone(),
            None => {
                let known: Vec<&str> = templates.all().iter().map(|t| t.id.as_str()).collect();
                bail!("Unknown template '{id}'. Known templates: {}", known.join(", "));
            }
        }
    };

    let engine = ReportEngine::new(&catalog, &store)
        .with_policy(config.alert_policy.zero_baseline_policy)
        .with_sheet_name(&config.export.sheet_name);

    let plan = engine.plan(&definition)?;
    let rows = engine.run_plan(&plan)?;
    print_rows(&rows);

    let artifact = engine.export_rows(&plan, &rows, format, None)?;
    let sink = FileSink { dir: PathBuf::from(out_dir) };
    sink.deliver(&artifact)?;
    println!();
    println!("exported {} rows to {}/{}", rows.len(), out_dir, artifact.filename);

    if let Some(path) = flag_value(&args, "--alerts") {
        run_alerts(&engine, &store, path)?;
    }
    if show_milestones {
        print_milestones(&engine, &config)?;
    }
    Ok(())
}

/// Evaluate alerts from a JSON file against the store and record the results.
fn run_alerts(engine: &ReportEngine<'_, &ReportStore>, store: &ReportStore, path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    let alerts: Vec<ReportAlert> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid alerts in {path}"))?;

    let results = engine.evaluate_alerts(&alerts, &HashMap::new());
    println!();
    println!("=== ALERTS ({}) ===", alerts.len());
    for (alert, result) in alerts.iter().zip(&results) {
        store.record_alert_result(result)?;
        println!("  {:<28} {}", alert.name, result.status.as_str());
        if let Some(note) = create_alert_notification(alert, result) {
            println!("    {}: {}", note.title, note.message);
        }
    }
    Ok(())
}

fn print_rows(rows: &[Row]) {
    println!("=== REPORT ({} rows) ===", rows.len());
    for row in rows.iter().take(20) {
        println!("  {}", Value::Object(row.clone()));
    }
    if rows.len() > 20 {
        println!("  ... {} more", rows.len() - 20);
    }
}

fn print_milestones(engine: &ReportEngine<'_, &ReportStore>, config: &ReportingConfig) -> Result<()> {
    let advisors = engine.run_report(&ReportDefinition::new("advisors"))?;
    println!();
    println!("=== ADVISOR MILESTONES ===");
    for advisor in &advisors {
        let id = advisor.get("id").and_then(Value::as_str).unwrap_or_default();
        let mut metrics = AdvisorMetrics::new(id);
        for metric in ["enrollments_closed", "deals_closed", "revenue_generated"] {
            if let Some(v) = advisor.get(metric).and_then(as_f64) {
                metrics = metrics.with_metric(metric, v);
            }
        }
        let result = calculate_milestone_progress(&metrics, &config.agent_levels);
        println!(
            "  {:<8} level: {:<10} next: {:<10} progress: {:>5.1}%",
            id,
            result.current_level.as_deref().unwrap_or("-"),
            result.next_level.as_deref().unwrap_or("-"),
            result.progress * 100.0,
        );
    }
    Ok(())
}

fn parse_format(raw: &str) -> Result<ExportFormat> {
    match raw.to_lowercase().as_str() {
        "csv" => Ok(ExportFormat::Csv),
        "excel" | "xls" => Ok(ExportFormat::Excel),
        "json" => Ok(ExportFormat::Json),
        other => bail!("Unknown export format '{other}' (expected csv, excel or json)"),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Small fixed CRM data set so every built-in template returns rows.
fn seed_demo_data(store: &ReportStore) -> Result<()> {
    if store.row_count("deals")? > 0 {
        log::info!("demo data already present, skipping seed");
        return Ok(());
    }

    let advisors = [
        ("adv-1", "Dana Whitfield", "East", 12, 9, 7_500.0, 0.31, true),
        ("adv-2", "Luis Ortega", "West", 28, 15, 18_250.0, 0.42, true),
        ("adv-3", "Priya Nair", "East", 55, 31, 46_000.0, 0.47, true),
        ("adv-4", "Sam Keller", "South", 4, 2, 1_200.0, 0.12, false),
    ];
    for (id, name, region, enrollments, deals, revenue, conversion, active) in advisors {
        store.insert_row(
            "advisors",
            &row(json!({
                "id": id, "name": name, "region": region,
                "enrollments_closed": enrollments, "deals_closed": deals,
                "revenue_generated": revenue, "conversion_rate": conversion,
                "active": active, "hired_at": "2023-02-01",
            })),
        )?;
    }

    let deals = [
        ("d-1", "Group plan renewal", "negotiation", "East", "adv-1", 10, 0, 0.6, false),
        ("d-2", "Family coverage", "closed_won", "East", "adv-3", 5, 5, 1.0, true),
        ("d-3", "Small business", "closed_won", "West", "adv-2", 7, 7, 1.0, true),
        ("d-4", "Medicare supplement", "proposal", "West", "adv-2", 4, 0, 0.35, false),
        ("d-5", "Individual plan", "closed_lost", "South", "adv-4", 3, 0, 0.0, false),
    ];
    for (id, title, stage, region, advisor, value, revenue, probability, won) in deals {
        store.insert_row(
            "deals",
            &row(json!({
                "id": id, "title": title, "stage": stage, "region": region,
                "advisor_id": advisor, "value": value, "revenue": revenue,
                "probability": probability, "is_won": won,
                "created_at": "2024-05-01",
            })),
        )?;
    }

    let leads = [
        ("l-1", "Avery", "Stone", "new", "website", 1_200.0, "2024-06-03"),
        ("l-2", "Jordan", "Blake", "contacted", "referral", 2_400.0, "2024-06-05"),
        ("l-3", "Riley", "Chen", "qualified", "event", 3_100.0, "2024-06-07"),
        ("l-4", "Casey", "Moore", "converted", "website", 1_800.0, "2024-05-20"),
    ];
    for (id, first, last, status, source, value, created) in leads {
        store.insert_row(
            "leads",
            &row(json!({
                "id": id, "first_name": first, "last_name": last, "status": status,
                "source": source, "estimated_value": value, "created_at": created,
            })),
        )?;
    }

    let enrollments = [
        ("e-1", "Pat Lee", "Blue Harbor", "silver", "active", "adv-1", 412.5, 0.4, true),
        ("e-2", "Kim Diaz", "Blue Harbor", "gold", "active", "adv-3", 530.0, 0.0, false),
        ("e-3", "Alex Ray", "Summit Health", "bronze", "pending", "adv-2", 289.99, 0.65, true),
    ];
    for (id, member, carrier, plan, status, advisor, premium, subsidy, eligible) in enrollments {
        store.insert_row(
            "enrollments",
            &row(json!({
                "id": id, "member_name": member, "carrier": carrier, "plan_type": plan,
                "status": status, "advisor_id": advisor, "monthly_premium": premium,
                "subsidy_rate": subsidy, "subsidy_eligible": eligible,
                "effective_date": "2024-07-01",
            })),
        )?;
    }

    log::info!("demo data seeded");
    Ok(())
}
