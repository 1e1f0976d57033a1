//! Metric derivation: turns committed fact rows into the named numeric inputs components read.
//!
//! Sums, counts and pass-through values are reduced straight from the entity's rows; ratios are
//! resolved afterwards in dependency order so they can build on other derived metrics. Missing
//! rows and zero denominators resolve to `0` instead of failing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::plan::{DerivationOp, FactScope, MetricDerivation};
use super::repository::{EntityId, FactRow, FactSource, PeriodId, RepositoryError};

/// Derived value plus the provenance needed to explain it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMetric {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<DerivationOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_rows: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<RatioTrace>,
}

impl ResolvedMetric {
    /// Placeholder for a metric no derivation produced.
    pub fn absent() -> Self {
        Self {
            value: 0.0,
            operation: None,
            source_pattern: None,
            source_rows: Vec::new(),
            ratio: None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    /// True when the metric is a ratio whose denominator resolved to zero.
    pub fn zero_goal(&self) -> bool {
        self.ratio
            .as_ref()
            .map(|ratio| ratio.zero_denominator)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioTrace {
    pub numerator_metric: String,
    pub numerator: f64,
    pub denominator_metric: String,
    pub denominator: f64,
    pub scale_factor: f64,
    #[serde(default)]
    pub zero_denominator: bool,
}

/// Typed metric map for one (entity, period). Only the derivation engine populates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivedMetrics {
    metrics: BTreeMap<String, ResolvedMetric>,
}

impl DerivedMetrics {
    pub fn get(&self, name: &str) -> Option<&ResolvedMetric> {
        self.metrics.get(name)
    }

    /// Value of `name`, or `0` when it was never derived.
    pub fn value(&self, name: &str) -> f64 {
        self.metrics
            .get(name)
            .map(|metric| metric.value)
            .unwrap_or(0.0)
    }

    pub fn resolve(&self, name: &str) -> ResolvedMetric {
        self.metrics
            .get(name)
            .cloned()
            .unwrap_or_else(ResolvedMetric::absent)
    }

    pub fn values(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn insert(&mut self, name: &str, metric: ResolvedMetric) {
        self.metrics.insert(name.to_string(), metric);
    }
}

/// Resolves every derivation for one entity and period from the current fact snapshot.
pub fn derive_metrics<S>(
    entity_id: &EntityId,
    period_id: &PeriodId,
    derivations: &[MetricDerivation],
    source: &S,
) -> Result<DerivedMetrics, RepositoryError>
where
    S: FactSource + ?Sized,
{
    let (ratios, direct): (Vec<&MetricDerivation>, Vec<&MetricDerivation>) = derivations
        .iter()
        .partition(|derivation| derivation.operation == DerivationOp::Ratio);

    let mut derived = DerivedMetrics::default();

    for derivation in direct {
        let period = match derivation.scope {
            FactScope::Period => Some(period_id),
            FactScope::AnyPeriod => None,
        };
        let rows = source.fact_rows(entity_id, period, &derivation.source_pattern)?;
        derived.insert(&derivation.metric, reduce_rows(derivation, &rows));
    }

    let mut pending: Vec<&MetricDerivation> = ratios;
    loop {
        let waiting: BTreeSet<String> = pending
            .iter()
            .map(|derivation| derivation.metric.clone())
            .collect();
        let (ready, blocked): (Vec<&MetricDerivation>, Vec<&MetricDerivation>) =
            pending.into_iter().partition(|derivation| {
                ratio_inputs(derivation)
                    .into_iter()
                    .flatten()
                    .all(|input| input == derivation.metric || !waiting.contains(input))
            });

        if ready.is_empty() {
            // Cyclic or self-referencing ratios; inputs that never resolved read as zero.
            for derivation in blocked {
                let metric = resolve_ratio(derivation, &derived);
                derived.insert(&derivation.metric, metric);
            }
            break;
        }

        for derivation in ready {
            let metric = resolve_ratio(derivation, &derived);
            derived.insert(&derivation.metric, metric);
        }

        if blocked.is_empty() {
            break;
        }
        pending = blocked;
    }

    debug!(
        entity = %entity_id.0,
        period = %period_id.0,
        metrics = derived.len(),
        "derived metrics"
    );

    Ok(derived)
}

fn ratio_inputs(derivation: &MetricDerivation) -> [Option<&str>; 2] {
    [
        derivation.numerator_metric.as_deref(),
        derivation.denominator_metric.as_deref(),
    ]
}

fn reduce_rows(derivation: &MetricDerivation, rows: &[FactRow]) -> ResolvedMetric {
    let field = derivation.source_field.as_deref();

    let (value, contributing): (f64, Vec<&FactRow>) = match derivation.operation {
        DerivationOp::Count => (rows.len() as f64, rows.iter().collect()),
        DerivationOp::Sum => match field {
            Some(field) => (
                rows.iter().filter_map(|row| row.number(field)).sum(),
                rows.iter().collect(),
            ),
            None => (rows.len() as f64, rows.iter().collect()),
        },
        DerivationOp::Passthrough => match rows.first() {
            Some(row) => {
                if rows.len() > 1 {
                    debug!(
                        metric = %derivation.metric,
                        rows = rows.len(),
                        "passthrough matched several rows; using the first"
                    );
                }
                let value = field.and_then(|field| row.number(field)).unwrap_or(0.0);
                (value, vec![row])
            }
            None => (0.0, Vec::new()),
        },
        DerivationOp::Ratio => (0.0, Vec::new()),
    };

    ResolvedMetric {
        value: if value.is_finite() { value } else { 0.0 },
        operation: Some(derivation.operation),
        source_pattern: Some(derivation.source_pattern.clone()),
        source_rows: contributing
            .into_iter()
            .map(|row| row.row_id.clone())
            .collect(),
        ratio: None,
    }
}

fn resolve_ratio(derivation: &MetricDerivation, derived: &DerivedMetrics) -> ResolvedMetric {
    let numerator_metric = derivation.numerator_metric.clone().unwrap_or_default();
    let denominator_metric = derivation.denominator_metric.clone().unwrap_or_default();
    let numerator = derived.value(&numerator_metric);
    let denominator = derived.value(&denominator_metric);
    let scale_factor = derivation.scale_factor.unwrap_or(1.0);

    let zero_denominator = denominator == 0.0;
    let raw = if zero_denominator {
        0.0
    } else {
        numerator / denominator * scale_factor
    };

    let mut source_rows: Vec<String> = Vec::new();
    for input in [&numerator_metric, &denominator_metric] {
        if let Some(metric) = derived.get(input) {
            for row in &metric.source_rows {
                if !source_rows.contains(row) {
                    source_rows.push(row.clone());
                }
            }
        }
    }

    ResolvedMetric {
        value: if raw.is_finite() { raw } else { 0.0 },
        operation: Some(DerivationOp::Ratio),
        source_pattern: None,
        source_rows,
        ratio: Some(RatioTrace {
            numerator_metric,
            numerator,
            denominator_metric,
            denominator,
            scale_factor,
            zero_denominator,
        }),
    }
}
