use std::collections::BTreeMap;

use super::audit::{CalculationStep, KpiContribution, LookupTrace};
use super::bands::{scan_bands, BandHit};
use super::EvaluationError;
use crate::compensation::metrics::DerivedMetrics;
use crate::compensation::plan::{
    Component, ComponentKind, KpiWeight, MatrixConfig, PayoutBasis, RateCondition, Tier,
};

#[derive(Debug, Clone, PartialEq)]
pub struct TierMatch {
    pub output: f64,
    pub hit: Option<BandHit>,
}

pub fn evaluate_tiers(value: f64, tiers: &[Tier]) -> TierMatch {
    let hit = scan_bands(value, tiers);
    let output = hit.as_ref().map(|hit| tiers[hit.index].value).unwrap_or(0.0);
    TierMatch { output, hit }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixMatch {
    pub output: f64,
    pub row: Option<BandHit>,
    pub column: Option<BandHit>,
}

/// Band indices with no matching cell in `values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("matrix has no value at row {row}, column {column}")]
pub struct MatrixShapeError {
    pub row: usize,
    pub column: usize,
}

/// Resolves both axes independently; a miss on either axis pays nothing.
pub fn evaluate_matrix(
    row_value: f64,
    column_value: f64,
    config: &MatrixConfig,
) -> Result<MatrixMatch, MatrixShapeError> {
    let row = scan_bands(row_value, &config.row_bands);
    let column = scan_bands(column_value, &config.column_bands);

    let output = match (&row, &column) {
        (Some(row), Some(column)) => *config
            .values
            .get(row.index)
            .and_then(|cells| cells.get(column.index))
            .ok_or(MatrixShapeError {
                row: row.index,
                column: column.index,
            })?,
        _ => 0.0,
    };

    Ok(MatrixMatch {
        output,
        row,
        column,
    })
}

pub fn evaluate_percentage(base: f64, rate: f64) -> f64 {
    base * rate
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalMatch {
    pub output: f64,
    pub rate: f64,
    pub hit: Option<BandHit>,
}

pub fn evaluate_conditional(
    condition_value: f64,
    base: f64,
    conditions: &[RateCondition],
) -> ConditionalMatch {
    match scan_bands(condition_value, conditions) {
        Some(hit) => {
            let rate = conditions[hit.index].rate;
            ConditionalMatch {
                output: evaluate_percentage(base, rate),
                rate,
                hit: Some(hit),
            }
        }
        None => ConditionalMatch {
            output: 0.0,
            rate: 0.0,
            hit: None,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedKpiMatch {
    pub output: f64,
    pub score: f64,
    pub contributions: Vec<KpiContribution>,
}

/// `values` pairs positionally with `kpis`; missing entries read as zero.
pub fn evaluate_weighted_kpi(basis: f64, kpis: &[KpiWeight], values: &[f64]) -> WeightedKpiMatch {
    let contributions: Vec<KpiContribution> = kpis
        .iter()
        .enumerate()
        .map(|(index, kpi)| {
            let value = values.get(index).copied().unwrap_or(0.0);
            let capped_value = kpi.cap.map_or(value, |cap| value.min(cap));
            KpiContribution {
                metric: kpi.metric.clone(),
                weight: kpi.weight,
                value,
                capped_value,
                contribution: kpi.weight * capped_value,
            }
        })
        .collect();

    let score: f64 = contributions.iter().map(|kpi| kpi.contribution).sum();
    WeightedKpiMatch {
        output: basis * score / 100.0,
        score,
        contributions,
    }
}

/// Evaluates one component against the entity's derived metrics and records the audit step.
pub fn evaluate_component(
    component: &Component,
    metrics: &DerivedMetrics,
) -> Result<CalculationStep, EvaluationError> {
    let resolved: BTreeMap<String, _> = component
        .kind
        .metric_inputs()
        .into_iter()
        .map(|name| (name.to_string(), metrics.resolve(name)))
        .collect();

    let (trace, output) = match &component.kind {
        ComponentKind::TierLookup(config) => {
            let input = metrics.value(&config.metric);
            let matched = evaluate_tiers(input, &config.tiers);
            (
                LookupTrace::TierLookup {
                    metric: config.metric.clone(),
                    input,
                    matched: matched.hit,
                },
                matched.output,
            )
        }
        ComponentKind::MatrixLookup(config) => {
            let row_input = metrics.value(&config.row_metric);
            let column_input = metrics.value(&config.column_metric);
            let matched = evaluate_matrix(row_input, column_input, config).map_err(|source| {
                EvaluationError::MatrixShape {
                    component: component.id.clone(),
                    source,
                }
            })?;
            (
                LookupTrace::MatrixLookup {
                    row_metric: config.row_metric.clone(),
                    row_input,
                    row: matched.row,
                    column_metric: config.column_metric.clone(),
                    column_input,
                    column: matched.column,
                },
                matched.output,
            )
        }
        ComponentKind::Percentage(config) => {
            let base = metrics.value(&config.base_metric);
            (
                LookupTrace::Percentage {
                    base_metric: config.base_metric.clone(),
                    base,
                    rate: config.rate,
                },
                evaluate_percentage(base, config.rate),
            )
        }
        ComponentKind::ConditionalPercentage(config) => {
            let condition_input = metrics.value(&config.condition_metric);
            let base = metrics.value(&config.base_metric);
            let matched = evaluate_conditional(condition_input, base, &config.conditions);
            (
                LookupTrace::ConditionalPercentage {
                    condition_metric: config.condition_metric.clone(),
                    condition_input,
                    matched: matched.hit,
                    base_metric: config.base_metric.clone(),
                    base,
                    rate: matched.rate,
                },
                matched.output,
            )
        }
        ComponentKind::WeightedKpi(config) => {
            let basis = match &config.basis {
                PayoutBasis::Fixed(amount) => *amount,
                PayoutBasis::Metric(metric) => metrics.value(metric),
            };
            let values: Vec<f64> = config
                .kpis
                .iter()
                .map(|kpi| metrics.value(&kpi.metric))
                .collect();
            let matched = evaluate_weighted_kpi(basis, &config.kpis, &values);
            (
                LookupTrace::WeightedKpi {
                    basis,
                    score: matched.score,
                    kpis: matched.contributions,
                },
                matched.output,
            )
        }
    };

    Ok(CalculationStep::new(
        component.id.clone(),
        component.name.clone(),
        component.kind.type_name(),
        resolved,
        trace,
        output,
    ))
}
