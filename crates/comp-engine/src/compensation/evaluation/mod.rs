//! Component evaluators and the audit records they produce.

mod audit;
mod bands;
mod components;

pub use audit::{
    build_result, CalculationResult, CalculationStep, KpiContribution, LookupTrace,
    ResultWarning, StepFlag,
};
pub use bands::{scan_bands, BandHit};
pub use components::{
    evaluate_component, evaluate_conditional, evaluate_matrix, evaluate_percentage,
    evaluate_tiers, evaluate_weighted_kpi, ConditionalMatch, MatrixMatch, MatrixShapeError,
    TierMatch, WeightedKpiMatch,
};

use super::metrics::DerivedMetrics;
use super::plan::Variant;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("component `{component}` is misconfigured: {source}")]
    MatrixShape {
        component: String,
        #[source]
        source: MatrixShapeError,
    },
}

/// Evaluates the variant's enabled components in plan order.
pub fn evaluate_variant(
    variant: &Variant,
    metrics: &DerivedMetrics,
) -> Result<Vec<CalculationStep>, EvaluationError> {
    variant
        .components
        .iter()
        .filter(|component| component.enabled)
        .map(|component| evaluate_component(component, metrics))
        .collect()
}
