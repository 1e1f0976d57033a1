use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::bands::BandHit;
use crate::compensation::metrics::ResolvedMetric;
use crate::compensation::plan::{RuleSetId, VariantId};
use crate::compensation::repository::{EntityId, PeriodId};

/// How a component arrived at its output, recorded so the calculation can be explained later
/// without recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LookupTrace {
    TierLookup {
        metric: String,
        input: f64,
        matched: Option<BandHit>,
    },
    MatrixLookup {
        row_metric: String,
        row_input: f64,
        row: Option<BandHit>,
        column_metric: String,
        column_input: f64,
        column: Option<BandHit>,
    },
    Percentage {
        base_metric: String,
        base: f64,
        rate: f64,
    },
    ConditionalPercentage {
        condition_metric: String,
        condition_input: f64,
        matched: Option<BandHit>,
        base_metric: String,
        base: f64,
        rate: f64,
    },
    WeightedKpi {
        basis: f64,
        score: f64,
        kpis: Vec<KpiContribution>,
    },
}

impl LookupTrace {
    /// Metric/band pairs the trace resolved, used to flag fallbacks and misses.
    fn band_hits(&self) -> Vec<(&str, Option<&BandHit>)> {
        match self {
            LookupTrace::TierLookup {
                metric, matched, ..
            } => vec![(metric.as_str(), matched.as_ref())],
            LookupTrace::MatrixLookup {
                row_metric,
                row,
                column_metric,
                column,
                ..
            } => vec![
                (row_metric.as_str(), row.as_ref()),
                (column_metric.as_str(), column.as_ref()),
            ],
            LookupTrace::ConditionalPercentage {
                condition_metric,
                matched,
                ..
            } => vec![(condition_metric.as_str(), matched.as_ref())],
            LookupTrace::Percentage { .. } | LookupTrace::WeightedKpi { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiContribution {
    pub metric: String,
    pub weight: f64,
    pub value: f64,
    pub capped_value: f64,
    pub contribution: f64,
}

/// Step-level flags for review; none of them is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum StepFlag {
    /// Output is zero and every metric the component read was zero: likely missing data.
    ZeroOutput,
    /// A ratio the component read had a zero denominator.
    ZeroGoal { metric: String },
    BelowFirstBand { metric: String },
    LastBandFallback { metric: String },
}

/// One audited component evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationStep {
    pub component_id: String,
    pub component_name: String,
    pub component_type: String,
    pub resolved_metrics: BTreeMap<String, ResolvedMetric>,
    pub lookup_trace: LookupTrace,
    pub output_value: f64,
    #[serde(default)]
    pub warnings: Vec<StepFlag>,
}

impl CalculationStep {
    pub fn new(
        component_id: impl Into<String>,
        component_name: impl Into<String>,
        component_type: &str,
        resolved_metrics: BTreeMap<String, ResolvedMetric>,
        lookup_trace: LookupTrace,
        output_value: f64,
    ) -> Self {
        let warnings = step_flags(&resolved_metrics, &lookup_trace, output_value);
        Self {
            component_id: component_id.into(),
            component_name: component_name.into(),
            component_type: component_type.to_string(),
            resolved_metrics,
            lookup_trace,
            output_value,
            warnings,
        }
    }

    pub fn has_flag(&self, flag: &StepFlag) -> bool {
        self.warnings.contains(flag)
    }

    /// Human-readable sentence rebuilt from the stored trace.
    pub fn narrative(&self) -> String {
        let body = match &self.lookup_trace {
            LookupTrace::TierLookup {
                metric,
                input,
                matched,
            } => match matched {
                Some(hit) => format!(
                    "{metric} {input:.2} fell in tier {}{} paying {:.2}",
                    describe_band(hit),
                    fallback_note(hit),
                    self.output_value
                ),
                None => format!("{metric} {input:.2} is below the first tier; nothing paid"),
            },
            LookupTrace::MatrixLookup {
                row_metric,
                row_input,
                row,
                column_metric,
                column_input,
                column,
            } => match (row, column) {
                (Some(row), Some(column)) => format!(
                    "{row_metric} {row_input:.2} selected row {}{} and {column_metric} {column_input:.2} selected column {}{}, cell value {:.2}",
                    describe_band(row),
                    fallback_note(row),
                    describe_band(column),
                    fallback_note(column),
                    self.output_value
                ),
                _ => format!(
                    "{row_metric} {row_input:.2} / {column_metric} {column_input:.2} matched no matrix cell; nothing paid"
                ),
            },
            LookupTrace::Percentage {
                base_metric,
                base,
                rate,
            } => format!(
                "{:.2}% of {base_metric} {base:.2} = {:.2}",
                rate * 100.0,
                self.output_value
            ),
            LookupTrace::ConditionalPercentage {
                condition_metric,
                condition_input,
                matched,
                base_metric,
                base,
                rate,
            } => match matched {
                Some(hit) => format!(
                    "{condition_metric} {condition_input:.2} selected rate {:.2}% ({}{}) applied to {base_metric} {base:.2} = {:.2}",
                    rate * 100.0,
                    describe_band(hit),
                    fallback_note(hit),
                    self.output_value
                ),
                None => format!(
                    "{condition_metric} {condition_input:.2} met no rate condition; nothing paid"
                ),
            },
            LookupTrace::WeightedKpi { basis, score, kpis } => {
                let parts: Vec<String> = kpis
                    .iter()
                    .map(|kpi| {
                        format!(
                            "{} {:.2} x {:.2}",
                            kpi.metric, kpi.capped_value, kpi.weight
                        )
                    })
                    .collect();
                format!(
                    "weighted score {score:.2} ({}) on basis {basis:.2} = {:.2}",
                    parts.join(" + "),
                    self.output_value
                )
            }
        };

        let provenance: Vec<String> = self
            .resolved_metrics
            .iter()
            .filter_map(|(name, metric)| {
                metric.ratio.as_ref().map(|ratio| {
                    format!(
                        "{name} = {} {:.2} / {} {:.2} x {}",
                        ratio.numerator_metric,
                        ratio.numerator,
                        ratio.denominator_metric,
                        ratio.denominator,
                        ratio.scale_factor
                    )
                })
            })
            .collect();

        if provenance.is_empty() {
            format!("{}: {body}", self.component_name)
        } else {
            format!(
                "{}: {body} (where {})",
                self.component_name,
                provenance.join("; ")
            )
        }
    }
}

fn describe_band(hit: &BandHit) -> String {
    if hit.label.is_empty() {
        format!("#{}", hit.index)
    } else {
        format!("'{}'", hit.label)
    }
}

fn fallback_note(hit: &BandHit) -> &'static str {
    if hit.fallback {
        " (above last bound)"
    } else {
        ""
    }
}

fn step_flags(
    resolved: &BTreeMap<String, ResolvedMetric>,
    trace: &LookupTrace,
    output: f64,
) -> Vec<StepFlag> {
    let mut flags = Vec::new();

    if output == 0.0 && !resolved.is_empty() && resolved.values().all(ResolvedMetric::is_zero) {
        flags.push(StepFlag::ZeroOutput);
    }

    for (name, metric) in resolved {
        if metric.zero_goal() {
            flags.push(StepFlag::ZeroGoal {
                metric: name.clone(),
            });
        }
    }

    for (metric, hit) in trace.band_hits() {
        match hit {
            None => flags.push(StepFlag::BelowFirstBand {
                metric: metric.to_string(),
            }),
            Some(hit) if hit.fallback => flags.push(StepFlag::LastBandFallback {
                metric: metric.to_string(),
            }),
            Some(_) => {}
        }
    }

    flags
}

/// Result-level warnings attached for downstream review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ResultWarning {
    AmbiguousVariant {
        selected: VariantId,
        also_matched: Vec<VariantId>,
    },
    NoEnabledComponents,
    /// Every step carried `zero_output`.
    NoPayableData,
}

/// Calculation output for one (entity, period, rule set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub entity_id: EntityId,
    pub period_id: PeriodId,
    pub rule_set_id: RuleSetId,
    pub variant_id: VariantId,
    pub components: Vec<CalculationStep>,
    pub total_payout: f64,
    #[serde(default)]
    pub warnings: Vec<ResultWarning>,
}

impl CalculationResult {
    pub fn step(&self, component_id: &str) -> Option<&CalculationStep> {
        self.components
            .iter()
            .find(|step| step.component_id == component_id)
    }

    pub fn narrative(&self) -> Vec<String> {
        self.components
            .iter()
            .map(CalculationStep::narrative)
            .collect()
    }
}

/// Sums step outputs into the total and attaches result-level warnings.
pub fn build_result(
    entity_id: EntityId,
    period_id: PeriodId,
    rule_set_id: RuleSetId,
    variant_id: VariantId,
    steps: Vec<CalculationStep>,
    mut warnings: Vec<ResultWarning>,
) -> CalculationResult {
    let total_payout = steps.iter().map(|step| step.output_value).sum();

    if steps.is_empty() {
        warnings.push(ResultWarning::NoEnabledComponents);
    } else if steps.iter().all(|step| step.has_flag(&StepFlag::ZeroOutput)) {
        warnings.push(ResultWarning::NoPayableData);
    }

    CalculationResult {
        entity_id,
        period_id,
        rule_set_id,
        variant_id,
        components: steps,
        total_payout,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::plan::DerivationOp;

    fn metric(value: f64) -> ResolvedMetric {
        ResolvedMetric {
            value,
            operation: Some(DerivationOp::Passthrough),
            source_pattern: Some("store_scorecard".to_string()),
            source_rows: vec!["row-1".to_string()],
            ratio: None,
        }
    }

    fn tier_step(value: f64, matched: Option<BandHit>, output: f64) -> CalculationStep {
        let resolved = [("store_sales_attainment".to_string(), metric(value))]
            .into_iter()
            .collect();
        CalculationStep::new(
            "store-bonus",
            "Store Bonus",
            "tier_lookup",
            resolved,
            LookupTrace::TierLookup {
                metric: "store_sales_attainment".to_string(),
                input: value,
                matched,
            },
            output,
        )
    }

    #[test]
    fn zero_output_requires_all_metrics_zero() {
        let missing = tier_step(0.0, None, 0.0);
        assert!(missing.has_flag(&StepFlag::ZeroOutput));
        assert!(missing.has_flag(&StepFlag::BelowFirstBand {
            metric: "store_sales_attainment".to_string()
        }));

        let computed_zero = tier_step(
            80.0,
            Some(BandHit {
                index: 0,
                label: "below".to_string(),
                fallback: false,
            }),
            0.0,
        );
        assert!(computed_zero.warnings.is_empty());
    }

    #[test]
    fn narrative_names_matched_tier() {
        let step = tier_step(
            106.25,
            Some(BandHit {
                index: 2,
                label: "105-110".to_string(),
                fallback: false,
            }),
            300.0,
        );

        assert_eq!(
            step.narrative(),
            "Store Bonus: store_sales_attainment 106.25 fell in tier '105-110' paying 300.00"
        );
    }

    #[test]
    fn build_result_sums_and_flags_missing_data() {
        let result = build_result(
            EntityId("E-1".to_string()),
            PeriodId("2024-03".to_string()),
            RuleSetId("plan".to_string()),
            VariantId("default".to_string()),
            vec![tier_step(0.0, None, 0.0), tier_step(0.0, None, 0.0)],
            Vec::new(),
        );
        assert_eq!(result.total_payout, 0.0);
        assert_eq!(result.warnings, vec![ResultWarning::NoPayableData]);

        let result = build_result(
            EntityId("E-1".to_string()),
            PeriodId("2024-03".to_string()),
            RuleSetId("plan".to_string()),
            VariantId("default".to_string()),
            vec![
                tier_step(0.0, None, 0.0),
                tier_step(
                    106.25,
                    Some(BandHit {
                        index: 2,
                        label: "105-110".to_string(),
                        fallback: false,
                    }),
                    300.0,
                ),
            ],
            Vec::new(),
        );
        assert_eq!(result.total_payout, 300.0);
        assert!(result.warnings.is_empty());
    }
}
