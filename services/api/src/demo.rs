use crate::infra::parse_period;
use clap::Args;
use comp_engine::compensation::fixtures::{ENTITIES_FILE, FACTS_FILE, PLAN_FILE};
use comp_engine::compensation::{
    validate, CalculationResult, CalculationRun, CalculationService, EntityId, FixtureError,
    FixtureRepository, FixtureSet, PeriodId, Plan, RunWarning, TenantId, ValidationReport,
};
use comp_engine::config::{AppConfig, EngineConfig};
use comp_engine::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) const DEMO_TENANT: &str = "demo";
pub(crate) const DEMO_RULE_SET: &str = "optical-retail-2024";
pub(crate) const DEMO_PERIOD: &str = "2024-03";

const DEMO_PLAN: &str = include_str!("../../../fixtures/optical-retail/plan.json");
const DEMO_ENTITIES: &str = include_str!("../../../fixtures/optical-retail/entities.json");
const DEMO_FACTS: &str = include_str!("../../../fixtures/optical-retail/facts.csv");

/// Built-in optical retail plan with four store employees.
pub(crate) fn demo_fixture() -> Result<FixtureSet, FixtureError> {
    FixtureSet::from_readers(
        DEMO_PLAN.as_bytes(),
        DEMO_ENTITIES.as_bytes(),
        DEMO_FACTS.as_bytes(),
    )
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Directory holding plan.json, entities.json and facts.csv
    #[arg(long)]
    pub(crate) fixture_dir: PathBuf,
    /// Calculation period (YYYY-MM)
    #[arg(long, value_parser = parse_period)]
    pub(crate) period: PeriodId,
    /// Tenant the fixture is loaded under
    #[arg(long, default_value = DEMO_TENANT)]
    pub(crate) tenant: String,
    /// Override ENGINE_MAX_CONCURRENCY for this run
    #[arg(long)]
    pub(crate) max_concurrency: Option<usize>,
    /// Print the full run as JSON instead of a summary
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ValidateArgs {
    /// Plan definition to check
    #[arg(long)]
    pub(crate) plan: PathBuf,
    /// Print the validation report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ExplainArgs {
    /// Directory holding plan.json, entities.json and facts.csv
    #[arg(long)]
    pub(crate) fixture_dir: PathBuf,
    /// Calculation period (YYYY-MM)
    #[arg(long, value_parser = parse_period)]
    pub(crate) period: PeriodId,
    /// Entity to explain
    #[arg(long)]
    pub(crate) entity: String,
    /// Print the result as JSON instead of a narrative
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Calculation period (YYYY-MM). Defaults to the period the demo facts cover.
    #[arg(long, value_parser = parse_period)]
    pub(crate) period: Option<PeriodId>,
    /// Skip the per-entity narratives
    #[arg(long)]
    pub(crate) skip_narrative: bool,
}

pub(crate) async fn run_fixture(args: RunArgs) -> Result<(), AppError> {
    let RunArgs {
        fixture_dir,
        period,
        tenant,
        max_concurrency,
        json,
    } = args;

    let mut engine = AppConfig::load()?.engine;
    if let Some(limit) = max_concurrency {
        engine.max_concurrency = limit.max(1);
    }

    let tenant = TenantId(tenant);
    let fixture = FixtureSet::from_dir(&fixture_dir)?;
    let (repository, service) = fixture_service(fixture, &tenant, engine);
    let rule_set = repository.fixture().plan.id.clone();
    let run = service.run_calculation(&tenant, &rule_set, &period).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        render_run(&repository.fixture().plan, &period, &run);
    }
    Ok(())
}

pub(crate) fn run_validate(args: ValidateArgs) -> Result<(), AppError> {
    let file = std::fs::File::open(&args.plan)?;
    let plan: Plan = serde_json::from_reader(file)?;
    let report = validate(&plan);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_report(&plan, &report);
    }
    Ok(())
}

pub(crate) fn run_explain(args: ExplainArgs) -> Result<(), AppError> {
    let tenant = TenantId(DEMO_TENANT.to_string());
    let (repository, service) = fixture_service(
        FixtureSet::from_dir(&args.fixture_dir)?,
        &tenant,
        EngineConfig::default(),
    );
    let rule_set = repository.fixture().plan.id.clone();
    let result =
        service.explain_entity(&tenant, &rule_set, &args.period, &EntityId(args.entity))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render_result(&result);
    }
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let period = args
        .period
        .unwrap_or_else(|| PeriodId(DEMO_PERIOD.to_string()));
    let tenant = TenantId(DEMO_TENANT.to_string());
    let (repository, service) = fixture_service(demo_fixture()?, &tenant, EngineConfig::default());
    let plan = repository.fixture().plan.clone();

    println!("Compensation engine demo");
    println!(
        "Fixture files: {}, {}, {} (built in)",
        PLAN_FILE, ENTITIES_FILE, FACTS_FILE
    );
    let run = service.run_calculation(&tenant, &plan.id, &period).await?;
    render_run(&plan, &period, &run);

    if !args.skip_narrative {
        for result in &run.results {
            println!();
            render_result(result);
        }
    }
    Ok(())
}

fn fixture_service(
    fixture: FixtureSet,
    tenant: &TenantId,
    engine: EngineConfig,
) -> (Arc<FixtureRepository>, CalculationService<FixtureRepository>) {
    let repository = Arc::new(fixture.into_repository(tenant.clone()));
    let service = CalculationService::new(repository.clone(), engine);
    (repository, service)
}

fn render_run(plan: &Plan, period: &PeriodId, run: &CalculationRun) {
    println!(
        "\n{} ({}) | period {} | status {:?}",
        plan.name,
        plan.status.label(),
        period.0,
        run.status
    );
    println!(
        "- {} entities paid | {} skipped | total payout {:.2}",
        run.entity_count,
        run.skipped.len(),
        run.total_payout
    );

    if !run.results.is_empty() {
        println!("Payouts:");
        for result in &run.results {
            let components: Vec<String> = result
                .components
                .iter()
                .map(|step| format!("{} {:.2}", step.component_name, step.output_value))
                .collect();
            println!(
                "  - {} [{}]: {:.2} ({})",
                result.entity_id.0,
                result.variant_id.0,
                result.total_payout,
                components.join(", ")
            );
        }
    }

    if !run.skipped.is_empty() {
        println!("Skipped:");
        for skip in &run.skipped {
            println!("  - {}: {}", skip.entity_id.0, skip.reason);
        }
    }

    if !run.warnings.is_empty() {
        println!("Warnings:");
        for warning in &run.warnings {
            match warning {
                RunWarning::PlanIssue { issue } => println!("  - {}", issue.summary()),
                RunWarning::AmbiguousVariant {
                    entity_id,
                    selected,
                    also_matched,
                } => {
                    let others: Vec<&str> =
                        also_matched.iter().map(|variant| variant.0.as_str()).collect();
                    println!(
                        "  - {} matched {} and {}; using {}",
                        entity_id.0,
                        selected.0,
                        others.join(", "),
                        selected.0
                    );
                }
            }
        }
    }
}

fn render_result(result: &CalculationResult) {
    println!(
        "{} | variant {} | total {:.2}",
        result.entity_id.0, result.variant_id.0, result.total_payout
    );
    for line in result.narrative() {
        println!("  - {line}");
    }
    for step in &result.components {
        if !step.warnings.is_empty() {
            println!("  ! {} flags: {:?}", step.component_name, step.warnings);
        }
    }
}

fn render_report(plan: &Plan, report: &ValidationReport) {
    let errors = report.errors();
    let warnings = report.warnings();
    println!(
        "{} ({}): {} error(s), {} warning(s)",
        plan.name,
        plan.id.0,
        errors.len(),
        warnings.len()
    );
    for issue in errors.iter().chain(warnings.iter()) {
        println!("  - {}", issue.summary());
    }
}
