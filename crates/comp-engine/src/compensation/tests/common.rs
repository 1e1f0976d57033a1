use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::compensation::evaluation::CalculationResult;
use crate::compensation::plan::{
    AttributeConstraint, Band, Component, ComponentKind, ConditionalPercentageConfig,
    EligibilityPredicate, MatrixConfig, MetricDerivation, Plan, PlanStatus, RateCondition,
    RuleSetId, Tier, TierConfig, Variant, VariantId,
};
use crate::compensation::repository::{
    CalculationRepository, Entity, EntityId, FactRow, FactValue, PeriodId, RepositoryError,
    TenantId,
};
use crate::compensation::{calculation_router, CalculationService};
use crate::config::EngineConfig;

pub(super) const TENANT: &str = "optica-norte";
pub(super) const RULE_SET: &str = "optical-retail-2024";
pub(super) const PERIOD: &str = "2024-03";

pub(super) fn tenant() -> TenantId {
    TenantId(TENANT.to_string())
}

pub(super) fn rule_set() -> RuleSetId {
    RuleSetId(RULE_SET.to_string())
}

pub(super) fn period() -> PeriodId {
    PeriodId(PERIOD.to_string())
}

pub(super) fn store_tiers() -> Vec<Tier> {
    vec![
        Tier::bounded(0.0, 100.0, 0.0, "below target"),
        Tier::bounded(100.0, 105.0, 150.0, "100-105%"),
        Tier::bounded(105.0, 110.0, 300.0, "105-110%"),
        Tier::open(110.0, 500.0, "110%+"),
    ]
}

fn attainment_bands() -> Vec<Band> {
    vec![
        Band::bounded(0.0, 80.0, "<80%"),
        Band::bounded(80.0, 90.0, "80-90%"),
        Band::bounded(90.0, 100.0, "90-100%"),
        Band::bounded(100.0, 150.0, "100-150%"),
        Band::open(150.0, "150%+"),
    ]
}

fn volume_bands() -> Vec<Band> {
    vec![
        Band::bounded(0.0, 60_000.0, "<$60K"),
        Band::bounded(60_000.0, 80_000.0, "$60K-$80K"),
        Band::bounded(80_000.0, 100_000.0, "$80K-$100K"),
        Band::bounded(100_000.0, 120_000.0, "$100K-$120K"),
        Band::bounded(120_000.0, 180_000.0, "$120K-$180K"),
        Band::open(180_000.0, "$180K+"),
    ]
}

pub(super) fn optical_matrix(values: Vec<Vec<f64>>) -> MatrixConfig {
    MatrixConfig {
        row_metric: "optical_attainment".to_string(),
        column_metric: "store_optical_sales".to_string(),
        row_bands: attainment_bands(),
        column_bands: volume_bands(),
        values,
    }
}

pub(super) fn certified_grid() -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        vec![200.0, 300.0, 500.0, 800.0, 1100.0, 1400.0],
        vec![300.0, 500.0, 800.0, 1100.0, 1500.0, 1800.0],
        vec![500.0, 800.0, 1100.0, 1500.0, 1800.0, 2500.0],
        vec![800.0, 1100.0, 1500.0, 1800.0, 2500.0, 3000.0],
    ]
}

fn standard_grid() -> Vec<Vec<f64>> {
    certified_grid()
        .into_iter()
        .map(|row| row.into_iter().map(|value| value / 2.0).collect())
        .collect()
}

fn warranty_commission() -> Component {
    Component::new(
        "warranty-commission",
        "Warranty Commission",
        ComponentKind::ConditionalPercentage(ConditionalPercentageConfig {
            condition_metric: "optical_attainment".to_string(),
            base_metric: "warranty_sales".to_string(),
            conditions: vec![
                RateCondition::bounded(0.0, 100.0, 0.03, "below target"),
                RateCondition::open(100.0, 0.05, "at target"),
            ],
        }),
    )
}

fn store_bonus() -> Component {
    Component::new(
        "store-bonus",
        "Store Bonus",
        ComponentKind::TierLookup(TierConfig {
            metric: "store_sales_attainment".to_string(),
            tiers: store_tiers(),
        }),
    )
}

/// Optical retail plan: certified optometrists get the full matrix, everyone else half.
pub(super) fn optical_plan() -> Plan {
    Plan {
        id: rule_set(),
        name: "Optical Retail 2024".to_string(),
        status: PlanStatus::Active,
        variants: vec![
            Variant {
                id: VariantId("certified".to_string()),
                name: "Certified Optometrist".to_string(),
                eligibility: EligibilityPredicate::any()
                    .with(AttributeConstraint::equals("role", "optometrist"))
                    .with(AttributeConstraint::equals("certified", "true")),
                components: vec![
                    Component::new(
                        "venta-optica",
                        "Venta Óptica",
                        ComponentKind::MatrixLookup(optical_matrix(certified_grid())),
                    ),
                    store_bonus(),
                    warranty_commission(),
                ],
            },
            Variant {
                id: VariantId("standard".to_string()),
                name: "Store Staff".to_string(),
                eligibility: EligibilityPredicate::any().with(AttributeConstraint::one_of(
                    "role",
                    ["optometrist", "sales_associate"],
                )),
                components: vec![
                    Component::new(
                        "venta-optica",
                        "Venta Óptica",
                        ComponentKind::MatrixLookup(optical_matrix(standard_grid())),
                    ),
                    store_bonus(),
                    warranty_commission(),
                ],
            },
        ],
        derivations: vec![
            MetricDerivation::sum("optical_sales", "optical_sales", "amount"),
            MetricDerivation::passthrough("optical_goal", "sales_goal", "optical_goal")
                .any_period(),
            MetricDerivation::ratio("optical_attainment", "optical_sales", "optical_goal", 100.0),
            MetricDerivation::passthrough(
                "store_optical_sales",
                "store_scorecard",
                "optical_volume",
            ),
            MetricDerivation::passthrough(
                "store_sales_attainment",
                "store_scorecard",
                "sales_attainment",
            ),
            MetricDerivation::sum("warranty_sales", "warranty_sales", "amount"),
        ],
    }
}

pub(super) fn entities() -> Vec<Entity> {
    vec![
        Entity::new("E-100")
            .with_attribute("role", "optometrist")
            .with_attribute("certified", "true"),
        Entity::new("E-200").with_attribute("role", "sales_associate"),
        Entity::new("E-300").with_attribute("role", "store_manager"),
        Entity::new("E-400").with_attribute("role", "sales_associate"),
    ]
}

pub(super) fn fact(
    row_id: &str,
    entity_id: &str,
    period_id: Option<&str>,
    data_type: &str,
    fields: &[(&str, f64)],
) -> FactRow {
    FactRow {
        row_id: row_id.to_string(),
        entity_id: EntityId(entity_id.to_string()),
        period_id: period_id.map(|period| PeriodId(period.to_string())),
        data_type: data_type.to_string(),
        fields: fields
            .iter()
            .map(|(name, value)| (name.to_string(), FactValue::Number(*value)))
            .collect(),
    }
}

/// E-100: attainment 116.67 on $175K store volume, store attainment 106.25, $2,000 warranty.
/// E-200: attainment 95 on $110K store volume, store attainment 101, $2,000 warranty.
/// E-300 matches no variant; E-400 has no facts at all.
pub(super) fn facts() -> Vec<FactRow> {
    vec![
        fact("s-1", "E-100", Some(PERIOD), "optical_sales", &[("amount", 20_000.0)]),
        fact("s-2", "E-100", Some(PERIOD), "optical_sales", &[("amount", 15_000.0)]),
        fact("s-3", "E-100", Some("2024-02"), "optical_sales", &[("amount", 90_000.0)]),
        fact("g-1", "E-100", None, "sales_goal", &[("optical_goal", 30_000.0)]),
        fact(
            "k-1",
            "E-100",
            Some(PERIOD),
            "store_scorecard",
            &[("optical_volume", 175_000.0), ("sales_attainment", 106.25)],
        ),
        fact("w-1", "E-100", Some(PERIOD), "warranty_sales", &[("amount", 2_000.0)]),
        fact("s-4", "E-200", Some(PERIOD), "optical_sales", &[("amount", 28_500.0)]),
        fact("g-2", "E-200", None, "sales_goal", &[("optical_goal", 30_000.0)]),
        fact(
            "k-2",
            "E-200",
            Some(PERIOD),
            "store_scorecard",
            &[("optical_volume", 110_000.0), ("sales_attainment", 101.0)],
        ),
        fact("w-2", "E-200", Some(PERIOD), "warranty_sales", &[("amount", 2_000.0)]),
        fact("s-5", "E-300", Some(PERIOD), "optical_sales", &[("amount", 50_000.0)]),
    ]
}

/// Tenant-scoped in-memory repository that records every persisted batch.
#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    plans: Arc<Mutex<BTreeMap<(TenantId, RuleSetId), Plan>>>,
    entities: Arc<Mutex<BTreeMap<TenantId, Vec<Entity>>>>,
    facts: Arc<Mutex<BTreeMap<TenantId, Vec<FactRow>>>>,
    results: Arc<Mutex<BTreeMap<(TenantId, RuleSetId, PeriodId), Vec<CalculationResult>>>>,
    replace_calls: Arc<AtomicUsize>,
}

impl MemoryRepository {
    pub(super) fn seeded() -> Self {
        Self::with_plan(optical_plan())
    }

    pub(super) fn with_plan(plan: Plan) -> Self {
        let repository = Self::default();
        repository.load_tenant(tenant(), plan, entities(), facts());
        repository
    }

    pub(super) fn load_tenant(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        entities: Vec<Entity>,
        facts: Vec<FactRow>,
    ) {
        self.plans
            .lock()
            .expect("plans mutex poisoned")
            .insert((tenant_id.clone(), plan.id.clone()), plan);
        self.entities
            .lock()
            .expect("entities mutex poisoned")
            .insert(tenant_id.clone(), entities);
        self.facts
            .lock()
            .expect("facts mutex poisoned")
            .insert(tenant_id, facts);
    }

    pub(super) fn push_fact(&self, row: FactRow) {
        self.facts
            .lock()
            .expect("facts mutex poisoned")
            .entry(tenant())
            .or_default()
            .push(row);
    }

    pub(super) fn set_entities(&self, entities: Vec<Entity>) {
        self.entities
            .lock()
            .expect("entities mutex poisoned")
            .insert(tenant(), entities);
    }

    pub(super) fn stored(&self) -> Option<Vec<CalculationResult>> {
        self.stored_for(&tenant())
    }

    pub(super) fn stored_for(&self, tenant_id: &TenantId) -> Option<Vec<CalculationResult>> {
        self.results
            .lock()
            .expect("results mutex poisoned")
            .get(&(tenant_id.clone(), rule_set(), period()))
            .cloned()
    }

    pub(super) fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }
}

impl CalculationRepository for MemoryRepository {
    fn entity(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Option<Entity>, RepositoryError> {
        let guard = self.entities.lock().expect("entities mutex poisoned");
        Ok(guard
            .get(tenant_id)
            .and_then(|entities| entities.iter().find(|entity| &entity.id == entity_id))
            .cloned())
    }

    fn entities(&self, tenant_id: &TenantId) -> Result<Vec<Entity>, RepositoryError> {
        let guard = self.entities.lock().expect("entities mutex poisoned");
        Ok(guard.get(tenant_id).cloned().unwrap_or_default())
    }

    fn fact_rows(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        let guard = self.facts.lock().expect("facts mutex poisoned");
        Ok(guard
            .get(tenant_id)
            .into_iter()
            .flatten()
            .filter(|row| &row.entity_id == entity_id && row.data_type == data_type)
            .filter(|row| period_id.map_or(true, |period| row.period_id.as_ref() == Some(period)))
            .cloned()
            .collect())
    }

    fn plan(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
    ) -> Result<Option<Plan>, RepositoryError> {
        let guard = self.plans.lock().expect("plans mutex poisoned");
        Ok(guard
            .get(&(tenant_id.clone(), rule_set_id.clone()))
            .cloned())
    }

    fn replace_results(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
        results: Vec<CalculationResult>,
    ) -> Result<(), RepositoryError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.results.lock().expect("results mutex poisoned").insert(
            (tenant_id.clone(), rule_set_id.clone(), period_id.clone()),
            results,
        );
        Ok(())
    }
}

/// Every call fails as if the backing store were down.
pub(super) struct UnavailableRepository;

impl CalculationRepository for UnavailableRepository {
    fn entity(
        &self,
        _tenant_id: &TenantId,
        _entity_id: &EntityId,
    ) -> Result<Option<Entity>, RepositoryError> {
        Err(RepositoryError::Unavailable("entity store offline".to_string()))
    }

    fn entities(&self, _tenant_id: &TenantId) -> Result<Vec<Entity>, RepositoryError> {
        Err(RepositoryError::Unavailable("entity store offline".to_string()))
    }

    fn fact_rows(
        &self,
        _tenant_id: &TenantId,
        _entity_id: &EntityId,
        _period_id: Option<&PeriodId>,
        _data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        Err(RepositoryError::Unavailable("fact store offline".to_string()))
    }

    fn plan(
        &self,
        _tenant_id: &TenantId,
        _rule_set_id: &RuleSetId,
    ) -> Result<Option<Plan>, RepositoryError> {
        Err(RepositoryError::Unavailable("plan store offline".to_string()))
    }

    fn replace_results(
        &self,
        _tenant_id: &TenantId,
        _rule_set_id: &RuleSetId,
        _period_id: &PeriodId,
        _results: Vec<CalculationResult>,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("result store offline".to_string()))
    }
}

/// Serves plans and entities but fails fact reads for one entity mid-batch.
#[derive(Default, Clone)]
pub(super) struct FlakyFactsRepository {
    pub(super) inner: MemoryRepository,
}

impl CalculationRepository for FlakyFactsRepository {
    fn entity(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Option<Entity>, RepositoryError> {
        self.inner.entity(tenant_id, entity_id)
    }

    fn entities(&self, tenant_id: &TenantId) -> Result<Vec<Entity>, RepositoryError> {
        self.inner.entities(tenant_id)
    }

    fn fact_rows(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        if entity_id.0 == "E-200" {
            return Err(RepositoryError::Unavailable("fact shard timeout".to_string()));
        }
        self.inner
            .fact_rows(tenant_id, entity_id, period_id, data_type)
    }

    fn plan(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
    ) -> Result<Option<Plan>, RepositoryError> {
        self.inner.plan(tenant_id, rule_set_id)
    }

    fn replace_results(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
        results: Vec<CalculationResult>,
    ) -> Result<(), RepositoryError> {
        self.inner
            .replace_results(tenant_id, rule_set_id, period_id, results)
    }
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        max_concurrency: 2,
        batch_timeout: None,
    }
}

pub(super) fn build_service(
    repository: MemoryRepository,
) -> Arc<CalculationService<MemoryRepository>> {
    Arc::new(CalculationService::new(
        Arc::new(repository),
        engine_config(),
    ))
}

pub(super) fn router_with_service(
    service: Arc<CalculationService<MemoryRepository>>,
) -> axum::Router {
    calculation_router(service)
}

pub(super) fn result_for<'a>(
    results: &'a [CalculationResult],
    entity_id: &str,
) -> &'a CalculationResult {
    results
        .iter()
        .find(|result| result.entity_id.0 == entity_id)
        .expect("result present for entity")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
