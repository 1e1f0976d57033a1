//! File-backed snapshots for ad-hoc runs: a plan (`plan.json`), the payees (`entities.json`)
//! and committed facts (`facts.csv`).
//!
//! `facts.csv` carries `entity_id`, `period_id` and `data_type` columns plus an optional
//! `row_id`; every other column becomes a fact field. Empty cells are dropped and an empty
//! `period_id` marks a period-less fact.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::evaluation::CalculationResult;
use super::plan::{Plan, RuleSetId};
use super::repository::{
    CalculationRepository, Entity, EntityId, FactRow, FactSource, FactValue, PeriodId,
    RepositoryError, TenantId,
};

pub const PLAN_FILE: &str = "plan.json";
pub const ENTITIES_FILE: &str = "entities.json";
pub const FACTS_FILE: &str = "facts.csv";

#[derive(Debug)]
pub enum FixtureError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
    MissingColumn(&'static str),
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixtureError::Io(err) => write!(f, "failed to read fixture: {}", err),
            FixtureError::Json(err) => write!(f, "invalid fixture JSON: {}", err),
            FixtureError::Csv(err) => write!(f, "invalid fact CSV data: {}", err),
            FixtureError::MissingColumn(column) => {
                write!(f, "fact CSV is missing the `{}` column", column)
            }
        }
    }
}

impl std::error::Error for FixtureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FixtureError::Io(err) => Some(err),
            FixtureError::Json(err) => Some(err),
            FixtureError::Csv(err) => Some(err),
            FixtureError::MissingColumn(_) => None,
        }
    }
}

impl From<std::io::Error> for FixtureError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for FixtureError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<csv::Error> for FixtureError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Plan, entities and facts loaded from one fixture directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureSet {
    pub plan: Plan,
    pub entities: Vec<Entity>,
    pub facts: Vec<FactRow>,
}

impl FixtureSet {
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, FixtureError> {
        let dir = dir.as_ref();
        Self::from_readers(
            std::fs::File::open(dir.join(PLAN_FILE))?,
            std::fs::File::open(dir.join(ENTITIES_FILE))?,
            std::fs::File::open(dir.join(FACTS_FILE))?,
        )
    }

    pub fn from_readers<P, E, F>(plan: P, entities: E, facts: F) -> Result<Self, FixtureError>
    where
        P: Read,
        E: Read,
        F: Read,
    {
        Ok(Self {
            plan: serde_json::from_reader(plan)?,
            entities: serde_json::from_reader(entities)?,
            facts: parse_fact_rows(facts)?,
        })
    }

    pub fn into_repository(self, tenant_id: TenantId) -> FixtureRepository {
        FixtureRepository {
            tenant_id,
            fixture: self,
            results: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl FactSource for FixtureSet {
    fn fact_rows(
        &self,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        Ok(self
            .facts
            .iter()
            .filter(|row| &row.entity_id == entity_id && row.data_type == data_type)
            .filter(|row| period_id.map_or(true, |period| row.period_id.as_ref() == Some(period)))
            .cloned()
            .collect())
    }
}

/// Reads fact rows from CSV. Rows without a `row_id` column are numbered by position.
pub fn parse_fact_rows<R: Read>(reader: R) -> Result<Vec<FactRow>, FixtureError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or(FixtureError::MissingColumn(name))
    };
    let entity_column = column("entity_id")?;
    let period_column = column("period_id")?;
    let type_column = column("data_type")?;
    let row_id_column = headers.iter().position(|header| header == "row_id");

    let mut rows = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let cell = |position: usize| record.get(position).unwrap_or_default();

        let fields = headers
            .iter()
            .enumerate()
            .filter(|(position, _)| {
                ![Some(entity_column), Some(period_column), Some(type_column), row_id_column]
                    .contains(&Some(*position))
            })
            .filter(|(position, _)| !cell(*position).is_empty())
            .map(|(position, header)| (header.to_string(), parse_cell(cell(position))))
            .collect();

        let period = cell(period_column);
        rows.push(FactRow {
            row_id: row_id_column
                .map(|position| cell(position).to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("row-{:05}", index + 1)),
            entity_id: EntityId(cell(entity_column).to_string()),
            period_id: (!period.is_empty()).then(|| PeriodId(period.to_string())),
            data_type: cell(type_column).to_string(),
            fields,
        });
    }

    Ok(rows)
}

fn parse_cell(raw: &str) -> FactValue {
    match raw.to_ascii_lowercase().as_str() {
        "true" => FactValue::Flag(true),
        "false" => FactValue::Flag(false),
        _ => raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(FactValue::Number)
            .unwrap_or_else(|| FactValue::Text(raw.to_string())),
    }
}

/// Single-tenant repository over a [`FixtureSet`]; results are kept in memory.
#[derive(Debug, Clone)]
pub struct FixtureRepository {
    tenant_id: TenantId,
    fixture: FixtureSet,
    results: Arc<Mutex<BTreeMap<(RuleSetId, PeriodId), Vec<CalculationResult>>>>,
}

impl FixtureRepository {
    pub fn fixture(&self) -> &FixtureSet {
        &self.fixture
    }

    pub fn stored_results(
        &self,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
    ) -> Option<Vec<CalculationResult>> {
        let guard = self.results.lock().expect("results mutex poisoned");
        guard
            .get(&(rule_set_id.clone(), period_id.clone()))
            .cloned()
    }
}

impl CalculationRepository for FixtureRepository {
    fn entity(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Option<Entity>, RepositoryError> {
        if tenant_id != &self.tenant_id {
            return Ok(None);
        }
        Ok(self
            .fixture
            .entities
            .iter()
            .find(|entity| &entity.id == entity_id)
            .cloned())
    }

    fn entities(&self, tenant_id: &TenantId) -> Result<Vec<Entity>, RepositoryError> {
        if tenant_id != &self.tenant_id {
            return Ok(Vec::new());
        }
        Ok(self.fixture.entities.clone())
    }

    fn fact_rows(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        period_id: Option<&PeriodId>,
        data_type: &str,
    ) -> Result<Vec<FactRow>, RepositoryError> {
        if tenant_id != &self.tenant_id {
            return Ok(Vec::new());
        }
        self.fixture.fact_rows(entity_id, period_id, data_type)
    }

    fn plan(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
    ) -> Result<Option<Plan>, RepositoryError> {
        if tenant_id != &self.tenant_id || &self.fixture.plan.id != rule_set_id {
            return Ok(None);
        }
        Ok(Some(self.fixture.plan.clone()))
    }

    fn replace_results(
        &self,
        tenant_id: &TenantId,
        rule_set_id: &RuleSetId,
        period_id: &PeriodId,
        results: Vec<CalculationResult>,
    ) -> Result<(), RepositoryError> {
        if tenant_id != &self.tenant_id {
            return Err(RepositoryError::NotFound);
        }
        let mut guard = self.results.lock().expect("results mutex poisoned");
        guard.insert((rule_set_id.clone(), period_id.clone()), results);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACTS: &str = "\
row_id,entity_id,period_id,data_type,amount,store,certified
s-1,E-1,2024-03,optical_sales,\"1,200\",Centro,true
s-2,E-1,2024-03,optical_sales,800.5,,
,E-2,,store_profile,,Norte,false
";

    #[test]
    fn parses_fact_columns_into_fields() {
        let rows = parse_fact_rows(FACTS.as_bytes()).expect("facts parse");
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].row_id, "s-1");
        assert_eq!(rows[0].field("amount"), Some(&FactValue::Text("1,200".to_string())));
        assert_eq!(rows[0].number("amount"), Some(1200.0));
        assert_eq!(rows[0].field("certified"), Some(&FactValue::Flag(true)));

        assert_eq!(rows[1].number("amount"), Some(800.5));
        assert!(rows[1].field("store").is_none());

        assert_eq!(rows[2].row_id, "row-00003");
        assert!(rows[2].period_id.is_none());
        assert_eq!(rows[2].field("store"), Some(&FactValue::Text("Norte".to_string())));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let error = parse_fact_rows("entity_id,data_type\nE-1,sales\n".as_bytes())
            .expect_err("period column missing");
        assert!(matches!(error, FixtureError::MissingColumn("period_id")));
    }

    #[test]
    fn fact_queries_respect_period_scope() {
        let plan: Plan = serde_json::from_value(serde_json::json!({
            "id": "plan",
            "name": "Plan",
            "variants": []
        }))
        .expect("plan parses");
        let fixture = FixtureSet {
            plan,
            entities: vec![Entity::new("E-1")],
            facts: parse_fact_rows(FACTS.as_bytes()).expect("facts parse"),
        };

        let entity = EntityId("E-1".to_string());
        let march = PeriodId("2024-03".to_string());
        let april = PeriodId("2024-04".to_string());

        assert_eq!(
            fixture
                .fact_rows(&entity, Some(&march), "optical_sales")
                .expect("query")
                .len(),
            2
        );
        assert!(fixture
            .fact_rows(&entity, Some(&april), "optical_sales")
            .expect("query")
            .is_empty());
        assert_eq!(
            fixture
                .fact_rows(&EntityId("E-2".to_string()), None, "store_profile")
                .expect("query")
                .len(),
            1
        );
    }

    #[test]
    fn repository_serves_only_its_own_tenant() {
        let plan: Plan = serde_json::from_value(serde_json::json!({
            "id": "plan",
            "name": "Plan",
            "variants": []
        }))
        .expect("plan parses");
        let fixture = FixtureSet {
            plan,
            entities: vec![Entity::new("E-1")],
            facts: parse_fact_rows(FACTS.as_bytes()).expect("facts parse"),
        };
        let repository = fixture.into_repository(TenantId("norte".to_string()));
        let entity = EntityId("E-1".to_string());
        let march = PeriodId("2024-03".to_string());
        let rule_set = RuleSetId("plan".to_string());

        let home = TenantId("norte".to_string());
        let other = TenantId("sur".to_string());

        assert_eq!(
            repository
                .fact_rows(&home, &entity, Some(&march), "optical_sales")
                .expect("query")
                .len(),
            2
        );
        assert!(repository
            .fact_rows(&other, &entity, Some(&march), "optical_sales")
            .expect("query")
            .is_empty());

        let rejected = repository.replace_results(&other, &rule_set, &march, Vec::new());
        assert!(matches!(rejected, Err(RepositoryError::NotFound)));
        assert!(repository.stored_results(&rule_set, &march).is_none());
    }
}
