//! Compensation rule engine: declarative plans evaluated against committed facts into
//! auditable payout results.

pub mod eligibility;
pub mod evaluation;
pub mod fixtures;
pub mod metrics;
pub mod plan;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use eligibility::{select_variant, EligibilityFailure, VariantMismatch, VariantSelection};
pub use evaluation::{
    CalculationResult, CalculationStep, EvaluationError, LookupTrace, ResultWarning, StepFlag,
};
pub use fixtures::{FixtureError, FixtureRepository, FixtureSet};
pub use metrics::{derive_metrics, DerivedMetrics, ResolvedMetric};
pub use plan::{
    validate, Component, ComponentKind, MetricDerivation, Plan, RuleSetId, ValidationIssue,
    ValidationReport, Variant, VariantId,
};
pub use repository::{
    CalculationRepository, Entity, EntityId, FactRow, FactSource, FactValue, PeriodId,
    RepositoryError, TenantFacts, TenantId,
};
pub use router::{calculation_router, CalculationRequest};
pub use service::{
    CalculationError, CalculationRun, CalculationService, EntitySkip, RunStatus, RunWarning,
};
