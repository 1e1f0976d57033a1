use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{
    Banded, ComponentKind, DerivationOp, MatrixConfig, MetricDerivation, PayoutBasis, Plan,
    PlanStatus, Variant, WeightedKpiConfig,
};

/// Tolerance applied when comparing adjacent band boundaries.
pub const BOUNDARY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// Structural finding about a plan. Errors block evaluation, warnings travel with the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }

    pub fn summary(&self) -> String {
        let location = match (&self.variant_name, &self.component_name) {
            (Some(variant), Some(component)) => format!("{variant} / {component}: "),
            (Some(variant), None) => format!("{variant}: "),
            (None, Some(component)) => format!("{component}: "),
            (None, None) => String::new(),
        };
        format!("{location}{}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn errors(&self) -> Vec<ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.is_error())
            .cloned()
            .collect()
    }

    pub fn warnings(&self) -> Vec<ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| !issue.is_error())
            .cloned()
            .collect()
    }
}

#[derive(Clone, Copy)]
struct Location<'a> {
    variant: Option<&'a str>,
    component: Option<&'a str>,
}

const PLAN_SCOPE: Location<'static> = Location {
    variant: None,
    component: None,
};

impl Location<'_> {
    fn issue(self, severity: IssueSeverity, message: String) -> ValidationIssue {
        ValidationIssue {
            severity,
            variant_name: self.variant.map(str::to_string),
            component_name: self.component.map(str::to_string),
            message,
        }
    }
}

/// Structural checks over a plan. Pure; never touches fact data.
pub fn validate(plan: &Plan) -> ValidationReport {
    let mut issues = Vec::new();

    if plan.status == PlanStatus::Archived {
        issues.push(PLAN_SCOPE.issue(
            IssueSeverity::Warning,
            "plan is archived; results will not be consumed downstream".to_string(),
        ));
    }

    if plan.variants.is_empty() {
        issues.push(PLAN_SCOPE.issue(
            IssueSeverity::Error,
            "plan defines no variants".to_string(),
        ));
    }

    let mut variant_ids = BTreeSet::new();
    for variant in &plan.variants {
        if !variant_ids.insert(&variant.id) {
            issues.push(PLAN_SCOPE.issue(
                IssueSeverity::Error,
                format!("variant id `{}` is declared more than once", variant.id.0),
            ));
        }
    }

    check_derivations(&plan.derivations, &mut issues);

    let known_metrics = plan.derived_metric_names();
    for variant in &plan.variants {
        check_variant(variant, &known_metrics, &mut issues);
    }

    ValidationReport { issues }
}

fn check_variant(
    variant: &Variant,
    known_metrics: &BTreeSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    let variant_scope = Location {
        variant: Some(variant.name.as_str()),
        component: None,
    };

    if variant.components.is_empty() {
        issues.push(variant_scope.issue(
            IssueSeverity::Error,
            "variant defines no components".to_string(),
        ));
    }

    for constraint in &variant.eligibility.constraints {
        if constraint.attribute().trim().is_empty() {
            issues.push(variant_scope.issue(
                IssueSeverity::Error,
                "eligibility constraint names no attribute".to_string(),
            ));
        }
    }

    for component in &variant.components {
        let scope = Location {
            variant: Some(variant.name.as_str()),
            component: Some(component.name.as_str()),
        };

        for metric in component.kind.metric_inputs() {
            if !known_metrics.contains(metric) {
                issues.push(scope.issue(
                    IssueSeverity::Error,
                    format!("reads metric `{metric}` which no derivation produces"),
                ));
            }
        }

        match &component.kind {
            ComponentKind::TierLookup(config) => {
                if config.tiers.is_empty() {
                    issues.push(
                        scope.issue(IssueSeverity::Error, "no tiers configured".to_string()),
                    );
                }
                check_band_order(&config.tiers, "tier", IssueSeverity::Error, scope, issues);
            }
            ComponentKind::MatrixLookup(config) => check_matrix(config, scope, issues),
            ComponentKind::Percentage(config) => {
                if !config.rate.is_finite() {
                    issues.push(scope.issue(
                        IssueSeverity::Error,
                        "percentage rate must be a finite number".to_string(),
                    ));
                }
            }
            ComponentKind::ConditionalPercentage(config) => {
                if config.conditions.is_empty() {
                    issues.push(scope.issue(
                        IssueSeverity::Error,
                        "no rate conditions configured".to_string(),
                    ));
                }
                check_band_order(
                    &config.conditions,
                    "condition",
                    IssueSeverity::Warning,
                    scope,
                    issues,
                );
            }
            ComponentKind::WeightedKpi(config) => check_weighted_kpi(config, scope, issues),
        }
    }
}

fn check_matrix(config: &MatrixConfig, scope: Location<'_>, issues: &mut Vec<ValidationIssue>) {
    if config.row_bands.is_empty() || config.column_bands.is_empty() {
        issues.push(scope.issue(
            IssueSeverity::Error,
            "matrix needs at least one row band and one column band".to_string(),
        ));
    }

    check_band_order(&config.row_bands, "row band", IssueSeverity::Error, scope, issues);
    check_band_order(
        &config.column_bands,
        "column band",
        IssueSeverity::Error,
        scope,
        issues,
    );

    if config.values.len() != config.row_bands.len() {
        issues.push(scope.issue(
            IssueSeverity::Error,
            format!(
                "matrix has {} value rows but {} row bands",
                config.values.len(),
                config.row_bands.len()
            ),
        ));
    }

    for (row, values) in config.values.iter().enumerate() {
        if values.len() != config.column_bands.len() {
            issues.push(scope.issue(
                IssueSeverity::Error,
                format!(
                    "matrix row {row} has {} values but {} column bands",
                    values.len(),
                    config.column_bands.len()
                ),
            ));
        }
    }
}

fn check_weighted_kpi(
    config: &WeightedKpiConfig,
    scope: Location<'_>,
    issues: &mut Vec<ValidationIssue>,
) {
    if config.kpis.is_empty() {
        issues.push(scope.issue(IssueSeverity::Error, "no KPIs configured".to_string()));
        return;
    }

    if let PayoutBasis::Fixed(amount) = config.basis {
        if !amount.is_finite() {
            issues.push(scope.issue(
                IssueSeverity::Error,
                "fixed payout basis must be a finite number".to_string(),
            ));
        }
    }

    for kpi in &config.kpis {
        if !kpi.weight.is_finite() || kpi.weight < 0.0 {
            issues.push(scope.issue(
                IssueSeverity::Error,
                format!("KPI `{}` has invalid weight {}", kpi.metric, kpi.weight),
            ));
        }
    }

    let total: f64 = config.kpis.iter().map(|kpi| kpi.weight).sum();
    if (total - 1.0).abs() > BOUNDARY_EPSILON {
        issues.push(scope.issue(
            IssueSeverity::Warning,
            format!("KPI weights sum to {total:.4} instead of 1"),
        ));
    }
}

/// Shared ordering rules for tiers, matrix axes and rate conditions.
fn check_band_order<B: Banded>(
    bands: &[B],
    noun: &str,
    misorder: IssueSeverity,
    scope: Location<'_>,
    issues: &mut Vec<ValidationIssue>,
) {
    for (index, band) in bands.iter().enumerate() {
        if let Some(max) = band.upper() {
            if max <= band.lower() {
                issues.push(scope.issue(
                    IssueSeverity::Error,
                    format!(
                        "{noun} {index} has an empty interval [{}, {})",
                        band.lower(),
                        max
                    ),
                ));
            }
        }

        if index == 0 {
            continue;
        }

        let previous = &bands[index - 1];
        if band.lower() < previous.lower() {
            issues.push(scope.issue(
                misorder,
                format!(
                    "{noun} {index} starts at {} below the previous minimum {}",
                    band.lower(),
                    previous.lower()
                ),
            ));
            continue;
        }

        match previous.upper() {
            Some(previous_max) if band.lower() > previous_max + BOUNDARY_EPSILON => {
                issues.push(scope.issue(
                    IssueSeverity::Warning,
                    format!(
                        "gap between {noun} {} (ends {}) and {noun} {index} (starts {})",
                        index - 1,
                        previous_max,
                        band.lower()
                    ),
                ));
            }
            Some(previous_max) if band.lower() < previous_max - BOUNDARY_EPSILON => {
                issues.push(scope.issue(
                    IssueSeverity::Warning,
                    format!(
                        "{noun} {index} overlaps {noun} {} by {}",
                        index - 1,
                        previous_max - band.lower()
                    ),
                ));
            }
            Some(_) => {}
            None => {
                issues.push(scope.issue(
                    IssueSeverity::Warning,
                    format!(
                        "{noun} {} is unbounded but followed by {noun} {index}",
                        index - 1
                    ),
                ));
            }
        }
    }
}

fn check_derivations(derivations: &[MetricDerivation], issues: &mut Vec<ValidationIssue>) {
    let mut seen = BTreeSet::new();
    let mut ratios: BTreeMap<&str, [Option<&str>; 2]> = BTreeMap::new();

    for derivation in derivations {
        let scope = Location {
            variant: None,
            component: Some(derivation.metric.as_str()),
        };

        if !seen.insert(derivation.metric.as_str()) {
            issues.push(scope.issue(
                IssueSeverity::Error,
                format!("metric `{}` is derived more than once", derivation.metric),
            ));
        }

        match derivation.operation {
            DerivationOp::Ratio => {
                if derivation.numerator_metric.is_none() || derivation.denominator_metric.is_none() {
                    issues.push(scope.issue(
                        IssueSeverity::Error,
                        "ratio derivation needs both numerator_metric and denominator_metric"
                            .to_string(),
                    ));
                }
                if derivation
                    .scale_factor
                    .map(|scale| !scale.is_finite())
                    .unwrap_or(false)
                {
                    issues.push(scope.issue(
                        IssueSeverity::Error,
                        "ratio scale_factor must be a finite number".to_string(),
                    ));
                }
                ratios.insert(
                    &derivation.metric,
                    [
                        derivation.numerator_metric.as_deref(),
                        derivation.denominator_metric.as_deref(),
                    ],
                );
            }
            DerivationOp::Sum | DerivationOp::Count | DerivationOp::Passthrough => {
                if derivation.source_pattern.trim().is_empty() {
                    issues.push(scope.issue(
                        IssueSeverity::Error,
                        format!(
                            "{} derivation needs a source_pattern",
                            derivation.operation.label()
                        ),
                    ));
                }
                if derivation.operation == DerivationOp::Passthrough
                    && derivation.source_field.is_none()
                {
                    issues.push(scope.issue(
                        IssueSeverity::Error,
                        "passthrough derivation needs a source_field".to_string(),
                    ));
                }
            }
        }
    }

    for (metric, inputs) in &ratios {
        let scope = Location {
            variant: None,
            component: Some(*metric),
        };

        for input in inputs.iter().flatten() {
            if !seen.contains(input) {
                issues.push(scope.issue(
                    IssueSeverity::Error,
                    format!("ratio references unknown metric `{input}`"),
                ));
            }
        }

        let mut visited = BTreeSet::new();
        if inputs
            .iter()
            .flatten()
            .any(|input| reaches(*input, metric, &ratios, &mut visited))
        {
            issues.push(scope.issue(
                IssueSeverity::Error,
                "ratio depends on itself through its inputs".to_string(),
            ));
        }
    }
}

fn reaches<'a>(
    from: &'a str,
    target: &str,
    ratios: &BTreeMap<&'a str, [Option<&'a str>; 2]>,
    visited: &mut BTreeSet<&'a str>,
) -> bool {
    if from == target {
        return true;
    }
    if !visited.insert(from) {
        return false;
    }

    match ratios.get(from) {
        Some(inputs) => inputs
            .iter()
            .flatten()
            .any(|input| reaches(*input, target, ratios, visited)),
        None => false,
    }
}
