//! Typed representation of a compensation plan (rule set).
//!
//! A plan holds one or more variants; a variant is picked per entity through its eligibility
//! predicate and contributes an ordered list of components. Each component kind carries only
//! its own lookup configuration, and the metrics components read are produced by the plan's
//! derivations.

pub mod validation;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use validation::{validate, IssueSeverity, ValidationIssue, ValidationReport};

/// Identifier wrapper for plans, also referred to as rule sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleSetId(pub String);

/// Identifier wrapper for plan variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantId(pub String);

/// Authoring lifecycle of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

impl PlanStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Active => "active",
            PlanStatus::Archived => "archived",
        }
    }
}

/// Declarative plan definition referenced immutably by calculation results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: RuleSetId,
    pub name: String,
    #[serde(default)]
    pub status: PlanStatus,
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub derivations: Vec<MetricDerivation>,
}

impl Plan {
    /// Metric names produced by the plan's derivations.
    pub fn derived_metric_names(&self) -> BTreeSet<&str> {
        self.derivations
            .iter()
            .map(|derivation| derivation.metric.as_str())
            .collect()
    }
}

/// Alternative component set selected per entity. Variant order is part of the plan contract
/// because the first eligible variant wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub name: String,
    #[serde(default)]
    pub eligibility: EligibilityPredicate,
    pub components: Vec<Component>,
}

/// Conjunction of attribute constraints. An empty predicate admits every entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityPredicate {
    #[serde(default)]
    pub constraints: Vec<AttributeConstraint>,
}

impl EligibilityPredicate {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with(mut self, constraint: AttributeConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AttributeConstraint {
    Equals { attribute: String, value: String },
    OneOf { attribute: String, values: Vec<String> },
}

impl AttributeConstraint {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn one_of<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn attribute(&self) -> &str {
        match self {
            AttributeConstraint::Equals { attribute, .. }
            | AttributeConstraint::OneOf { attribute, .. } => attribute,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AttributeConstraint::Equals { attribute, value } => format!("{attribute} = {value}"),
            AttributeConstraint::OneOf { attribute, values } => {
                format!("{attribute} in [{}]", values.join(", "))
            }
        }
    }
}

/// One payout-contributing calculation unit within a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ComponentKind,
}

fn enabled_by_default() -> bool {
    true
}

impl Component {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            kind,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "component_type", rename_all = "snake_case")]
pub enum ComponentKind {
    TierLookup(TierConfig),
    MatrixLookup(MatrixConfig),
    Percentage(PercentageConfig),
    ConditionalPercentage(ConditionalPercentageConfig),
    WeightedKpi(WeightedKpiConfig),
}

impl ComponentKind {
    pub const fn type_name(&self) -> &'static str {
        match self {
            ComponentKind::TierLookup(_) => "tier_lookup",
            ComponentKind::MatrixLookup(_) => "matrix_lookup",
            ComponentKind::Percentage(_) => "percentage",
            ComponentKind::ConditionalPercentage(_) => "conditional_percentage",
            ComponentKind::WeightedKpi(_) => "weighted_kpi",
        }
    }

    /// Metric names read by the component, in evaluation order.
    pub fn metric_inputs(&self) -> Vec<&str> {
        match self {
            ComponentKind::TierLookup(config) => vec![config.metric.as_str()],
            ComponentKind::MatrixLookup(config) => {
                vec![config.row_metric.as_str(), config.column_metric.as_str()]
            }
            ComponentKind::Percentage(config) => vec![config.base_metric.as_str()],
            ComponentKind::ConditionalPercentage(config) => vec![
                config.condition_metric.as_str(),
                config.base_metric.as_str(),
            ],
            ComponentKind::WeightedKpi(config) => {
                let mut inputs = Vec::with_capacity(config.kpis.len() + 1);
                if let PayoutBasis::Metric(metric) = &config.basis {
                    inputs.push(metric.as_str());
                }
                inputs.extend(config.kpis.iter().map(|kpi| kpi.metric.as_str()));
                inputs
            }
        }
    }
}

/// Half-open numeric interval `[min, max)`. A missing `max` is unbounded.
pub trait Banded {
    fn lower(&self) -> f64;
    fn upper(&self) -> Option<f64>;
    fn label(&self) -> &str;

    fn upper_or_infinity(&self) -> f64 {
        self.upper().unwrap_or(f64::INFINITY)
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.lower() && value < self.upper_or_infinity()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    pub value: f64,
    #[serde(default)]
    pub label: String,
}

impl Tier {
    pub fn bounded(min: f64, max: f64, value: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max: Some(max),
            value,
            label: label.into(),
        }
    }

    pub fn open(min: f64, value: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max: None,
            value,
            label: label.into(),
        }
    }
}

impl Banded for Tier {
    fn lower(&self) -> f64 {
        self.min
    }

    fn upper(&self) -> Option<f64> {
        self.max
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Matrix axis band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub label: String,
}

impl Band {
    pub fn bounded(min: f64, max: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max: Some(max),
            label: label.into(),
        }
    }

    pub fn open(min: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max: None,
            label: label.into(),
        }
    }
}

impl Banded for Band {
    fn lower(&self) -> f64 {
        self.min
    }

    fn upper(&self) -> Option<f64> {
        self.max
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCondition {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    pub rate: f64,
    #[serde(default)]
    pub label: String,
}

impl RateCondition {
    pub fn bounded(min: f64, max: f64, rate: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max: Some(max),
            rate,
            label: label.into(),
        }
    }

    pub fn open(min: f64, rate: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max: None,
            rate,
            label: label.into(),
        }
    }
}

impl Banded for RateCondition {
    fn lower(&self) -> f64 {
        self.min
    }

    fn upper(&self) -> Option<f64> {
        self.max
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub metric: String,
    pub tiers: Vec<Tier>,
}

/// Two-axis band lookup. `values[row][column]` must match the band counts exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub row_metric: String,
    pub column_metric: String,
    pub row_bands: Vec<Band>,
    pub column_bands: Vec<Band>,
    pub values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentageConfig {
    pub base_metric: String,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalPercentageConfig {
    pub condition_metric: String,
    pub base_metric: String,
    pub conditions: Vec<RateCondition>,
}

/// Weighted scorecard: `basis * sum(weight * min(attainment, cap)) / 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedKpiConfig {
    pub basis: PayoutBasis,
    pub kpis: Vec<KpiWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutBasis {
    Fixed(f64),
    Metric(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiWeight {
    pub metric: String,
    pub weight: f64,
    #[serde(default)]
    pub cap: Option<f64>,
}

/// Aggregation rule turning raw fact rows into a named numeric input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDerivation {
    pub metric: String,
    pub operation: DerivationOp,
    #[serde(default)]
    pub source_pattern: String,
    #[serde(default)]
    pub source_field: Option<String>,
    #[serde(default)]
    pub numerator_metric: Option<String>,
    #[serde(default)]
    pub denominator_metric: Option<String>,
    #[serde(default)]
    pub scale_factor: Option<f64>,
    #[serde(default)]
    pub scope: FactScope,
}

impl MetricDerivation {
    pub fn sum(
        metric: impl Into<String>,
        source_pattern: impl Into<String>,
        source_field: impl Into<String>,
    ) -> Self {
        Self {
            source_field: Some(source_field.into()),
            ..Self::bare(metric, DerivationOp::Sum, source_pattern)
        }
    }

    pub fn count(metric: impl Into<String>, source_pattern: impl Into<String>) -> Self {
        Self::bare(metric, DerivationOp::Count, source_pattern)
    }

    pub fn passthrough(
        metric: impl Into<String>,
        source_pattern: impl Into<String>,
        source_field: impl Into<String>,
    ) -> Self {
        Self {
            source_field: Some(source_field.into()),
            ..Self::bare(metric, DerivationOp::Passthrough, source_pattern)
        }
    }

    pub fn ratio(
        metric: impl Into<String>,
        numerator_metric: impl Into<String>,
        denominator_metric: impl Into<String>,
        scale_factor: f64,
    ) -> Self {
        Self {
            numerator_metric: Some(numerator_metric.into()),
            denominator_metric: Some(denominator_metric.into()),
            scale_factor: Some(scale_factor),
            ..Self::bare(metric, DerivationOp::Ratio, "")
        }
    }

    /// Reads facts regardless of period, e.g. assigned targets.
    pub fn any_period(mut self) -> Self {
        self.scope = FactScope::AnyPeriod;
        self
    }

    fn bare(
        metric: impl Into<String>,
        operation: DerivationOp,
        source_pattern: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            operation,
            source_pattern: source_pattern.into(),
            source_field: None,
            numerator_metric: None,
            denominator_metric: None,
            scale_factor: None,
            scope: FactScope::Period,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationOp {
    Sum,
    Count,
    Ratio,
    Passthrough,
}

impl DerivationOp {
    pub const fn label(self) -> &'static str {
        match self {
            DerivationOp::Sum => "sum",
            DerivationOp::Count => "count",
            DerivationOp::Ratio => "ratio",
            DerivationOp::Passthrough => "passthrough",
        }
    }
}

/// Whether a derivation reads facts for the evaluated period or for any period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactScope {
    #[default]
    Period,
    AnyPeriod,
}
