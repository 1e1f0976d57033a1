use std::path::PathBuf;
use std::sync::Arc;

use comp_engine::compensation::evaluation::{LookupTrace, StepFlag};
use comp_engine::compensation::{
    CalculationService, EntityId, FixtureRepository, FixtureSet, PeriodId, RuleSetId, RunStatus,
    TenantId,
};
use comp_engine::config::EngineConfig;

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/optical-retail")
}

fn tenant() -> TenantId {
    TenantId("optica-norte".to_string())
}

fn fixture_service() -> (Arc<FixtureRepository>, CalculationService<FixtureRepository>) {
    let fixture = FixtureSet::from_dir(fixture_dir()).expect("fixture loads");
    let repository = Arc::new(fixture.into_repository(tenant()));
    let service = CalculationService::new(repository.clone(), EngineConfig::default());
    (repository, service)
}

#[test]
fn fixture_plan_validates_cleanly() {
    let (repository, service) = fixture_service();
    let report = service.validate_plan(&repository.fixture().plan);
    assert!(
        report.issues.is_empty(),
        "unexpected issues: {:?}",
        report.issues
    );
}

#[tokio::test]
async fn optical_retail_batch_matches_expected_payouts() {
    let (repository, service) = fixture_service();
    let rule_set = RuleSetId("optical-retail-2024".to_string());
    let period = PeriodId("2024-03".to_string());

    let run = service
        .run_calculation(&tenant(), &rule_set, &period)
        .await
        .expect("batch completes");

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.entity_count, 3);
    assert_eq!(run.skipped.len(), 1);

    let certified = &run.results[0];
    assert_eq!(certified.entity_id, EntityId("E-100".to_string()));
    let matrix = certified.step("venta-optica").expect("matrix step");
    assert_eq!(matrix.output_value, 1800.0);
    assert_eq!(
        certified.step("store-bonus").expect("tier step").output_value,
        300.0
    );
    assert_eq!(
        certified
            .step("warranty-commission")
            .expect("conditional step")
            .output_value,
        100.0
    );
    let scorecard = certified.step("scorecard").expect("scorecard step");
    match &scorecard.lookup_trace {
        LookupTrace::WeightedKpi { score, .. } => assert!((score - 111.458_333).abs() < 1e-3),
        other => panic!("expected weighted trace, got {other:?}"),
    }

    let associate = &run.results[1];
    assert_eq!(associate.variant_id.0, "standard");
    assert!(
        (associate
            .step("warranty-commission")
            .expect("conditional step")
            .output_value
            - 60.0)
            .abs()
            < 1e-9
    );
    assert_eq!(associate.total_payout, 760.0);

    let idle = &run.results[2];
    assert_eq!(idle.total_payout, 0.0);
    assert!(idle.components[0].has_flag(&StepFlag::ZeroGoal {
        metric: "optical_attainment".to_string()
    }));

    let stored = repository
        .stored_results(&rule_set, &period)
        .expect("results persisted");
    assert_eq!(stored, run.results);
}

#[tokio::test]
async fn unknown_period_produces_zero_payouts() {
    let (_, service) = fixture_service();

    let run = service
        .run_calculation(
            &tenant(),
            &RuleSetId("optical-retail-2024".to_string()),
            &PeriodId("2023-12".to_string()),
        )
        .await
        .expect("batch completes");

    assert_eq!(run.total_payout, 0.0);
    assert!(run
        .results
        .iter()
        .all(|result| result.components.iter().all(|step| step.output_value == 0.0)));
}

#[test]
fn results_serialize_with_tagged_traces() {
    let (_, service) = fixture_service();

    let result = service
        .explain_entity(
            &tenant(),
            &RuleSetId("optical-retail-2024".to_string()),
            &PeriodId("2024-03".to_string()),
            &EntityId("E-100".to_string()),
        )
        .expect("explained");
    let payload = serde_json::to_value(&result).expect("serializes");

    assert_eq!(payload["components"][0]["component_type"], "matrix_lookup");
    assert_eq!(payload["components"][0]["lookup_trace"]["kind"], "matrix_lookup");
    assert_eq!(
        payload["components"][0]["resolved_metrics"]["optical_attainment"]["operation"],
        "ratio"
    );
    assert_eq!(payload["warnings"][0]["warning"], "ambiguous_variant");
}
