use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::evaluation::CalculationResult;
use super::plan::{Plan, RuleSetId};

/// Identifier wrapper for tenants owning plans and entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

/// Identifier wrapper for payees (people, stores, teams).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

/// Identifier wrapper for calculation periods, e.g. `2024-03`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodId(pub String);

/// Payee as seen by the engine; attributes feed variant eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            external_id: id.clone(),
            id: EntityId(id),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Committed transactional fact. Read-only input; the engine never writes facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub row_id: String,
    pub entity_id: EntityId,
    #[serde(default)]
    pub period_id: Option<PeriodId>,
    pub data_type: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FactValue>,
}

impl FactRow {
    pub fn field(&self, name: &str) -> Option<&FactValue> {
        self.fields.get(name)
    }

    /// Numeric view of a field; missing or non-numeric values read as `None`.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(FactValue::as_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl FactValue {
    /// Text is accepted when it parses after stripping currency symbols and thousands separators.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FactValue::Number(value) => Some(*value).filter(|value| value.is_finite()),
            FactValue::Flag(_) => None,
            FactValue::Text(raw) => {
                let cleaned: String = raw
                    .trim()
                    .chars()
                    .filter(|ch| !matches!(ch, ',' | '$' | '€' | ' '))
                    .collect();
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
            }
        }
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Read-only fact query used by metric derivation.
pub trait FactSource {
    /// Rows for `entity_id` with the given `data_type`. `period_id == None` means any period.
    fn fact_rows(
        &self,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError>;
}

/// Storage abstraction so the orchestrator can be exercised in isolation.
///
/// Every read and write is scoped to one tenant.
pub trait CalculationRepository: Send + Sync {
    fn entity(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Option<Entity>, RepositoryError>;
    fn entities(&self, tenant_id: &TenantId) -> Result<Vec<Entity>, RepositoryError>;
    fn fact_rows(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError>;
    fn plan(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
    ) -> Result<Option<Plan>, RepositoryError>;
    /// Replaces every stored result for `(tenant_id, rule_set_id, period_id)` as one atomic unit.
    fn replace_results(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
        results: Vec<CalculationResult>,
    ) -> Result<(), RepositoryError>;
}

/// Fact reads of one tenant, as seen by metric derivation.
pub struct TenantFacts<'a, R: ?Sized> {
    repository: &'a R,
    tenant_id: &'a TenantId,
}

impl<'a, R: ?Sized> TenantFacts<'a, R> {
    pub fn new(repository: &'a R, tenant_id: &'a TenantId) -> Self {
        Self {
            repository,
            tenant_id,
        }
    }
}

impl<R> FactSource for TenantFacts<'_, R>
where
    R: CalculationRepository + ?Sized,
{
    fn fact_rows(
        &self,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        self.repository
            .fact_rows(self.tenant_id, entity_id, period_id, data_type)
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
