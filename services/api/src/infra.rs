use chrono::NaiveDate;
use comp_engine::compensation::{
    CalculationRepository, CalculationResult, Entity, EntityId, FactRow, FactSource, FixtureSet,
    PeriodId, Plan, RepositoryError, RuleSetId, TenantId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Tenant-scoped in-memory store backing the HTTP service.
#[derive(Default, Clone)]
pub(crate) struct InMemoryCalculationRepository {
    tenants: Arc<Mutex<HashMap<TenantId, FixtureSet>>>,
    results: Arc<Mutex<HashMap<ResultKey, Vec<CalculationResult>>>>,
}

type ResultKey = (TenantId, RuleSetId, PeriodId);

impl InMemoryCalculationRepository {
    pub(crate) fn load_tenant(&self, tenant_id: TenantId, fixture: FixtureSet) {
        let mut guard = self.tenants.lock().expect("tenant mutex poisoned");
        guard.insert(tenant_id, fixture);
    }

    #[cfg(test)]
    pub(crate) fn results(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
    ) -> Option<Vec<CalculationResult>> {
        let guard = self.results.lock().expect("results mutex poisoned");
        guard
            .get(&(tenant_id.clone(), rule_set_id.clone(), period_id.clone()))
            .cloned()
    }
}

impl CalculationRepository for InMemoryCalculationRepository {
    fn entity(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Option<Entity>, RepositoryError> {
        let guard = self.tenants.lock().expect("tenant mutex poisoned");
        Ok(guard.get(tenant_id).and_then(|fixture| {
            fixture
                .entities
                .iter()
                .find(|entity| &entity.id == entity_id)
                .cloned()
        }))
    }

    fn entities(&self, tenant_id: &TenantId) -> Result<Vec<Entity>, RepositoryError> {
        let guard = self.tenants.lock().expect("tenant mutex poisoned");
        Ok(guard
            .get(tenant_id)
            .map(|fixture| fixture.entities.clone())
            .unwrap_or_default())
    }

    fn fact_rows(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        let guard = self.tenants.lock().expect("tenant mutex poisoned");
        match guard.get(tenant_id) {
            Some(fixture) => fixture.fact_rows(entity_id, period_id, data_type),
            None => Ok(Vec::new()),
        }
    }

    fn plan(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
    ) -> Result<Option<Plan>, RepositoryError> {
        let guard = self.tenants.lock().expect("tenant mutex poisoned");
        Ok(guard
            .get(tenant_id)
            .filter(|fixture| &fixture.plan.id == rule_set_id)
            .map(|fixture| fixture.plan.clone()))
    }

    fn replace_results(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
        results: Vec<CalculationResult>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.results.lock().expect("results mutex poisoned");
        guard.insert(
            (tenant_id.clone(), rule_set_id.clone(), period_id.clone()),
            results,
        );
        Ok(())
    }
}

/// Accepts calculation periods written as `YYYY-MM`.
pub(crate) fn parse_period(raw: &str) -> Result<PeriodId, String> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .map(|_| PeriodId(trimmed.to_string()))
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM ({err})"))
}
