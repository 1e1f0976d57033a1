use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::eligibility::{select_variant, EligibilityFailure, VariantMismatch};
use super::evaluation::{
    build_result, evaluate_variant, CalculationResult, EvaluationError, ResultWarning,
};
use super::metrics::derive_metrics;
use super::plan::{validate, Plan, RuleSetId, ValidationIssue, ValidationReport, Variant, VariantId};
use super::repository::{
    CalculationRepository, Entity, EntityId, FactSource, PeriodId, RepositoryError, TenantFacts,
    TenantId,
};
use crate::config::EngineConfig;

/// Orchestrates plan loading, validation, per-entity evaluation and result persistence.
pub struct CalculationService<R> {
    repository: Arc<R>,
    engine: EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    NoEligibleEntities,
}

/// Batch outcome for one (tenant, rule set, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRun {
    pub status: RunStatus,
    pub total_payout: f64,
    pub entity_count: usize,
    pub results: Vec<CalculationResult>,
    pub warnings: Vec<RunWarning>,
    pub skipped: Vec<EntitySkip>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum RunWarning {
    PlanIssue {
        issue: ValidationIssue,
    },
    AmbiguousVariant {
        entity_id: EntityId,
        selected: VariantId,
        also_matched: Vec<VariantId>,
    },
}

/// Entity left out of the batch because no variant admitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySkip {
    pub entity_id: EntityId,
    pub reason: String,
    pub mismatches: Vec<VariantMismatch>,
}

impl From<EligibilityFailure> for EntitySkip {
    fn from(failure: EligibilityFailure) -> Self {
        Self {
            reason: failure.summary(),
            entity_id: failure.entity_id,
            mismatches: failure.mismatches,
        }
    }
}

struct EntityJob {
    entity: Entity,
    variant: Variant,
    ambiguous_with: Vec<VariantId>,
}

impl<R> CalculationService<R>
where
    R: CalculationRepository + 'static,
{
    pub fn new(repository: Arc<R>, engine: EngineConfig) -> Self {
        Self { repository, engine }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn validate_plan(&self, plan: &Plan) -> ValidationReport {
        validate(plan)
    }

    /// Calculates every eligible entity for the period and atomically replaces stored results.
    ///
    /// Configuration errors fail the batch before any entity work starts. Repository and
    /// evaluation failures, or running past the batch timeout, fail the whole batch and
    /// nothing is persisted.
    pub async fn run_calculation(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
    ) -> Result<CalculationRun, CalculationError> {
        let deadline = self
            .engine
            .batch_timeout
            .map(|limit| Instant::now() + limit);

        let (plan, report) = self.load_plan(tenant_id, rule_set_id)?;
        let mut warnings: Vec<RunWarning> = report
            .warnings()
            .into_iter()
            .map(|issue| RunWarning::PlanIssue { issue })
            .collect();

        let mut skipped = Vec::new();
        let mut jobs = Vec::new();
        for entity in self.repository.entities(tenant_id)? {
            match select_variant(&entity, &plan.variants) {
                Ok(selection) => {
                    let variant = selection.variant.clone();
                    if !selection.ambiguous_with.is_empty() {
                        warn!(
                            entity_id = %entity.id.0,
                            variant_id = %variant.id.0,
                            "entity matched several plan variants; first one wins"
                        );
                        warnings.push(RunWarning::AmbiguousVariant {
                            entity_id: entity.id.clone(),
                            selected: variant.id.clone(),
                            also_matched: selection.ambiguous_with.clone(),
                        });
                    }
                    jobs.push(EntityJob {
                        entity,
                        variant,
                        ambiguous_with: selection.ambiguous_with,
                    });
                }
                Err(failure) => {
                    debug!(entity_id = %failure.entity_id.0, "entity skipped: no eligible variant");
                    skipped.push(EntitySkip::from(failure));
                }
            }
        }

        if jobs.is_empty() {
            self.repository
                .replace_results(tenant_id, rule_set_id, period_id, Vec::new())?;
            warn!(
                tenant_id = %tenant_id.0,
                rule_set_id = %rule_set_id.0,
                period_id = %period_id.0,
                skipped = skipped.len(),
                "no eligible entities for calculation"
            );
            return Ok(CalculationRun {
                status: RunStatus::NoEligibleEntities,
                total_payout: 0.0,
                entity_count: 0,
                results: Vec::new(),
                warnings,
                skipped,
                completed_at: Utc::now(),
            });
        }

        let results = self
            .evaluate_batch(tenant_id, Arc::new(plan), jobs, period_id, deadline)
            .await?;
        let total_payout: f64 = results.iter().map(|result| result.total_payout).sum();
        let entity_count = results.len();

        self.repository
            .replace_results(tenant_id, rule_set_id, period_id, results.clone())?;

        info!(
            tenant_id = %tenant_id.0,
            rule_set_id = %rule_set_id.0,
            period_id = %period_id.0,
            entity_count,
            total_payout,
            skipped = skipped.len(),
            "calculation batch completed"
        );

        Ok(CalculationRun {
            status: RunStatus::Completed,
            total_payout,
            entity_count,
            results,
            warnings,
            skipped,
            completed_at: Utc::now(),
        })
    }

    /// Calculates a single entity for debugging. Nothing is persisted.
    pub fn explain_entity(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
        entity_id: &EntityId,
    ) -> Result<CalculationResult, CalculationError> {
        let (plan, _) = self.load_plan(tenant_id, rule_set_id)?;
        let entity = self
            .repository
            .entity(tenant_id, entity_id)?
            .ok_or_else(|| CalculationError::EntityNotFound {
                entity_id: entity_id.clone(),
            })?;
        let selection = select_variant(&entity, &plan.variants)?;

        calculate_entity(
            &TenantFacts::new(self.repository.as_ref(), tenant_id),
            &plan,
            selection.variant,
            selection.ambiguous_with,
            &entity,
            period_id,
        )
    }

    fn load_plan(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
    ) -> Result<(Plan, ValidationReport), CalculationError> {
        let plan = self
            .repository
            .plan(tenant_id, rule_set_id)?
            .ok_or_else(|| CalculationError::PlanNotFound {
                rule_set_id: rule_set_id.clone(),
            })?;

        let report = validate(&plan);
        if report.has_errors() {
            let issues = report.errors();
            warn!(
                rule_set_id = %rule_set_id.0,
                errors = issues.len(),
                "plan failed validation"
            );
            return Err(CalculationError::PlanInvalid {
                rule_set_id: rule_set_id.clone(),
                issues,
            });
        }

        Ok((plan, report))
    }

    async fn evaluate_batch(
        &self,
        tenant_id: &TenantId,
        plan: Arc<Plan>,
        jobs: Vec<EntityJob>,
        period_id: &PeriodId,
        deadline: Option<Instant>,
    ) -> Result<Vec<CalculationResult>, CalculationError> {
        let concurrency_limit = Arc::new(Semaphore::new(self.engine.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for job in jobs {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(CalculationError::BatchTimeout);
            }
            let permit = within(deadline, Arc::clone(&concurrency_limit).acquire_owned())
                .await?
                .map_err(|error| CalculationError::WorkerFailed(error.to_string()))?;

            let repository = Arc::clone(&self.repository);
            let plan = Arc::clone(&plan);
            let tenant_id = tenant_id.clone();
            let period_id = period_id.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                calculate_entity(
                    &TenantFacts::new(repository.as_ref(), &tenant_id),
                    &plan,
                    &job.variant,
                    job.ambiguous_with,
                    &job.entity,
                    &period_id,
                )
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = within(deadline, tasks.join_next()).await? {
            let result =
                joined.map_err(|error| CalculationError::WorkerFailed(error.to_string()))??;
            results.push(result);
        }

        results.sort_by(|left, right| left.entity_id.cmp(&right.entity_id));
        Ok(results)
    }
}

fn calculate_entity<S>(
    source: &S,
    plan: &Plan,
    variant: &Variant,
    ambiguous_with: Vec<VariantId>,
    entity: &Entity,
    period_id: &PeriodId,
) -> Result<CalculationResult, CalculationError>
where
    S: FactSource + ?Sized,
{
    let metrics = derive_metrics(&entity.id, period_id, &plan.derivations, source)?;
    let steps = evaluate_variant(variant, &metrics)?;

    let mut warnings = Vec::new();
    if !ambiguous_with.is_empty() {
        warnings.push(ResultWarning::AmbiguousVariant {
            selected: variant.id.clone(),
            also_matched: ambiguous_with,
        });
    }

    Ok(build_result(
        entity.id.clone(),
        period_id.clone(),
        plan.id.clone(),
        variant.id.clone(),
        steps,
        warnings,
    ))
}

async fn within<F: Future>(
    deadline: Option<Instant>,
    future: F,
) -> Result<F::Output, CalculationError> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future)
            .await
            .map_err(|_| CalculationError::BatchTimeout),
        None => Ok(future.await),
    }
}

/// Error raised by the calculation service.
#[derive(Debug, thiserror::Error)]
pub enum CalculationError {
    #[error("plan `{}` not found", .rule_set_id.0)]
    PlanNotFound { rule_set_id: RuleSetId },
    #[error("plan `{}` has {} configuration error(s)", .rule_set_id.0, .issues.len())]
    PlanInvalid {
        rule_set_id: RuleSetId,
        issues: Vec<ValidationIssue>,
    },
    #[error("entity `{}` not found", .entity_id.0)]
    EntityNotFound { entity_id: EntityId },
    #[error(transparent)]
    NotEligible(#[from] EligibilityFailure),
    #[error("calculation batch exceeded its time limit")]
    BatchTimeout,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("calculation worker failed: {0}")]
    WorkerFailed(String),
}

impl CalculationError {
    pub const fn code(&self) -> &'static str {
        match self {
            CalculationError::PlanNotFound { .. } => "PLAN_NOT_FOUND",
            CalculationError::PlanInvalid { .. } => "PLAN_INVALID",
            CalculationError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            CalculationError::NotEligible(_) => "ENTITY_NOT_ELIGIBLE",
            CalculationError::BatchTimeout => "BATCH_TIMEOUT",
            CalculationError::Repository(RepositoryError::NotFound) => "RECORD_NOT_FOUND",
            CalculationError::Repository(RepositoryError::Unavailable(_)) => {
                "REPOSITORY_UNAVAILABLE"
            }
            CalculationError::Evaluation(_) => "EVALUATION_FAILED",
            CalculationError::WorkerFailed(_) => "WORKER_FAILED",
        }
    }
}
