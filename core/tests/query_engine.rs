//! Query engine tests: validation, grouping, sorting and limits.

use reporting_core::{
    catalog::ColumnCatalog,
    definition::{AggregateFn, Aggregation, Filter, FilterOperator, ReportDefinition, SortSpec},
    error::{ReportError, ValidationError},
    query_engine::{build_query, execute_plan, Condition},
    types::Row,
};
use serde_json::{json, Value};

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn deals() -> Vec<Row> {
    vec![
        row(json!({"id": "d1", "title": "Group plan", "region": "E", "stage": "proposal", "value": 10, "is_won": false})),
        row(json!({"id": "d2", "title": "Family PLAN", "region": "E", "stage": "closed_won", "value": 5, "is_won": true})),
        row(json!({"id": "d3", "title": "Small business", "region": "W", "stage": "closed_won", "value": 7, "is_won": true})),
    ]
}

fn run(definition: &ReportDefinition, rows: &[Row]) -> Vec<Row> {
    let catalog = ColumnCatalog::builtin();
    let plan = build_query(&catalog, definition).unwrap();
    execute_plan(&plan, rows)
}

fn violations(definition: &ReportDefinition) -> ValidationError {
    let catalog = ColumnCatalog::builtin();
    match build_query(&catalog, definition) {
        Err(ReportError::Validation(v)) => v,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

/// Grouping by region and summing value yields one row per region.
#[test]
fn grouped_sum_per_region() {
    let def = ReportDefinition::new("deals")
        .group_by("region")
        .aggregate(Aggregation::new(AggregateFn::Sum, "value"));

    let rows = run(&def, &deals());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], row(json!({"region": "E", "value": 15})));
    assert_eq!(rows[1], row(json!({"region": "W", "value": 7})));
}

#[test]
fn groupings_without_aggregations_list_distinct_combinations() {
    let def = ReportDefinition::new("deals").group_by("region").group_by("is_won");
    let rows = run(&def, &deals());
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.len() == 2));
}

#[test]
fn count_and_avg_with_aliases() {
    let def = ReportDefinition::new("deals")
        .group_by("region")
        .aggregate(Aggregation::count_rows().with_alias("deals"))
        .aggregate(Aggregation::new(AggregateFn::Avg, "value").with_alias("avg_value"))
        .sort(SortSpec::asc("region"));

    let rows = run(&def, &deals());
    assert_eq!(rows[0]["deals"], json!(2));
    assert_eq!(rows[0]["avg_value"], json!(7.5));
    assert_eq!(rows[1]["deals"], json!(1));
}

/// With no matching rows, count is 0 and every other aggregate is null.
#[test]
fn aggregates_over_an_empty_set() {
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("region", FilterOperator::Equals, json!("N")))
        .aggregate(Aggregation::count_rows())
        .aggregate(Aggregation::new(AggregateFn::Sum, "value"))
        .aggregate(Aggregation::new(AggregateFn::Max, "value").with_alias("largest"));

    let rows = run(&def, &deals());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["count"], json!(0));
    assert_eq!(rows[0]["value"], Value::Null);
    assert_eq!(rows[0]["largest"], Value::Null);
}

#[test]
fn filters_are_anded() {
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("region", FilterOperator::Equals, json!("E")))
        .filter(Filter::new("is_won", FilterOperator::Equals, json!(true)));

    let rows = run(&def, &deals());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!("d2"));
}

#[test]
fn contains_ignores_case() {
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("title", FilterOperator::Contains, json!("plan")));
    let rows = run(&def, &deals());
    let ids: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
    assert_eq!(ids, vec![&json!("d1"), &json!("d2")]);
}

#[test]
fn between_and_in_filters() {
    let between = ReportDefinition::new("deals")
        .filter(Filter::new("value", FilterOperator::Between, json!([6, 10])));
    assert_eq!(run(&between, &deals()).len(), 2);

    let within = ReportDefinition::new("deals")
        .filter(Filter::new("stage", FilterOperator::In, json!(["proposal", "negotiation"])));
    assert_eq!(run(&within, &deals()).len(), 1);
}

#[test]
fn null_checks_and_not_equals() {
    let mut rows = deals();
    rows.push(row(json!({"id": "d4", "region": null, "value": 1})));

    let nulls = ReportDefinition::new("deals")
        .filter(Filter::new("region", FilterOperator::IsNull, Value::Null));
    assert_eq!(run(&nulls, &rows).len(), 1);

    let not_east = ReportDefinition::new("deals")
        .filter(Filter::new("region", FilterOperator::NotEquals, json!("E")));
    let result = run(&not_east, &rows);
    assert_eq!(result.len(), 1, "null regions never match not_equals");
    assert_eq!(result[0]["id"], json!("d3"));
}

#[test]
fn multi_key_sort_is_stable_and_nulls_sort_last_ascending() {
    let mut rows = deals();
    rows.push(row(json!({"id": "d4", "region": "W", "value": null})));

    let def = ReportDefinition::new("deals")
        .sort(SortSpec::asc("region"))
        .sort(SortSpec::asc("value"));
    let ids: Vec<Value> = run(&def, &rows).iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!("d2"), json!("d1"), json!("d3"), json!("d4")]);

    let desc = ReportDefinition::new("deals").sort(SortSpec::desc("value"));
    let first = run(&desc, &rows)[0]["id"].clone();
    assert_eq!(first, json!("d4"), "nulls lead a descending sort");
}

#[test]
fn limit_applies_after_sorting() {
    let def = ReportDefinition::new("deals").sort(SortSpec::desc("value")).limit(2);
    let rows = run(&def, &deals());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["value"], json!(10));
    assert_eq!(rows[1]["value"], json!(7));
}

#[test]
fn sort_on_aggregation_output() {
    let def = ReportDefinition::new("deals")
        .group_by("region")
        .aggregate(Aggregation::new(AggregateFn::Sum, "value").with_alias("total"))
        .sort(SortSpec::asc("total"));
    let rows = run(&def, &deals());
    assert_eq!(rows[0]["region"], json!("W"));
}

#[test]
fn plan_carries_typed_predicates_and_output_shape() {
    let catalog = ColumnCatalog::builtin();
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("value", FilterOperator::Gte, json!(5)))
        .group_by("stage")
        .aggregate(Aggregation::count_rows());
    let plan = build_query(&catalog, &def).unwrap();

    assert_eq!(plan.table, "deals");
    assert_eq!(plan.predicates[0].condition, Condition::Gte(json!(5)));
    let keys: Vec<&str> = plan.output.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["stage", "count"]);
}

// ── Validation ───────────────────────────────────────────────────────────────

#[test]
fn unknown_data_source_is_rejected() {
    let err = violations(&ReportDefinition::new("invoices"));
    assert!(err.mentions("data_source"));
}

/// Every problem is reported at once, not just the first.
#[test]
fn validation_lists_every_violation() {
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("colour", FilterOperator::Equals, json!("red")))
        .filter(Filter::new("value", FilterOperator::Contains, json!("1")))
        .filter(Filter::new("stage", FilterOperator::Equals, json!("won")))
        .aggregate(Aggregation::new(AggregateFn::Avg, "title"))
        .sort(SortSpec::asc("nope"))
        .limit(0);

    let err = violations(&def);
    assert_eq!(err.violations.len(), 6, "{err}");
    assert!(err.mentions("filters[0].column"));
    assert!(err.mentions("filters[1].operator"));
    assert!(err.mentions("filters[2].value"));
    assert!(err.mentions("aggregations[0].fn"));
    assert!(err.mentions("sorting[0].column"));
    assert!(err.mentions("limit"));
}

#[test]
fn operand_types_are_checked() {
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("value", FilterOperator::Gt, json!("a lot")))
        .filter(Filter::new("is_won", FilterOperator::Equals, json!("yes")))
        .filter(Filter::new("close_date", FilterOperator::Lt, json!("next week")))
        .filter(Filter::new("value", FilterOperator::Between, json!([10, 1])))
        .filter(Filter::new("stage", FilterOperator::In, json!([])));

    let err = violations(&def);
    for i in 0..5 {
        assert!(err.mentions(&format!("filters[{i}].value")), "filters[{i}] not reported: {err}");
    }
}

#[test]
fn ordering_operators_need_ordered_columns() {
    let def = ReportDefinition::new("deals")
        .filter(Filter::new("region", FilterOperator::Gt, json!("E")))
        .filter(Filter::new("is_won", FilterOperator::Between, json!([false, true])));
    let err = violations(&def);
    assert!(err.mentions("filters[0].operator"));
    assert!(err.mentions("filters[1].operator"));
}

#[test]
fn aggregation_outputs_must_be_unique() {
    let def = ReportDefinition::new("deals")
        .group_by("region")
        .aggregate(Aggregation::new(AggregateFn::Sum, "value"))
        .aggregate(Aggregation::new(AggregateFn::Max, "value"))
        .aggregate(Aggregation::new(AggregateFn::Count, "region"));
    let err = violations(&def);
    assert!(err.mentions("aggregations[1].alias"));
    assert!(err.mentions("aggregations[2].alias"));
}

#[test]
fn aggregated_reports_sort_only_by_outputs() {
    let def = ReportDefinition::new("deals")
        .group_by("region")
        .aggregate(Aggregation::new(AggregateFn::Sum, "value"))
        .sort(SortSpec::desc("created_at"));
    let err = violations(&def);
    assert!(err.mentions("sorting[0].column"));
}

#[test]
fn aggregations_other_than_count_need_a_column() {
    let mut missing = Aggregation::count_rows();
    missing.function = AggregateFn::Sum;
    let def = ReportDefinition::new("deals").aggregate(missing);
    assert!(violations(&def).mentions("aggregations[0].column"));
}

#[test]
fn definitions_parse_from_json() {
    let json = r#"{
        "data_source": "deals",
        "filters": [{"column": "region", "operator": "equals", "value": "E"}],
        "groupings": ["stage"],
        "aggregations": [{"fn": "sum", "column": "value", "alias": "total"}],
        "sorting": [{"column": "total", "direction": "desc"}]
    }"#;
    let def = ReportDefinition::from_json(json).unwrap();
    let rows = run(&def, &deals());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["total"], json!(10));

    let broken = ReportDefinition::from_json(r#"{"filters": []}"#);
    assert!(matches!(broken, Err(ReportError::Serialization(_))));
}
