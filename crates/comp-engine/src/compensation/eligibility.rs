use serde::{Deserialize, Serialize};

use super::plan::{AttributeConstraint, EligibilityPredicate, Variant, VariantId};
use super::repository::{Entity, EntityId};

/// Variant chosen for an entity. `ambiguous_with` lists later variants that also matched.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSelection<'a> {
    pub variant: &'a Variant,
    pub ambiguous_with: Vec<VariantId>,
}

/// No variant admitted the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("entity `{}` matched no plan variant", .entity_id.0)]
pub struct EligibilityFailure {
    pub entity_id: EntityId,
    pub mismatches: Vec<VariantMismatch>,
}

impl EligibilityFailure {
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .mismatches
            .iter()
            .map(|mismatch| format!("{}: {}", mismatch.variant_id.0, mismatch.unmet.join(", ")))
            .collect();
        format!("no eligible variant ({})", parts.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMismatch {
    pub variant_id: VariantId,
    pub unmet: Vec<String>,
}

/// First eligible variant in plan order wins.
pub fn select_variant<'a>(
    entity: &Entity,
    variants: &'a [Variant],
) -> Result<VariantSelection<'a>, EligibilityFailure> {
    let mut selected: Option<&'a Variant> = None;
    let mut ambiguous_with = Vec::new();
    let mut mismatches = Vec::new();

    for variant in variants {
        let unmet = unmet_constraints(entity, &variant.eligibility);
        if unmet.is_empty() {
            match selected {
                None => selected = Some(variant),
                Some(_) => ambiguous_with.push(variant.id.clone()),
            }
        } else if selected.is_none() {
            mismatches.push(VariantMismatch {
                variant_id: variant.id.clone(),
                unmet,
            });
        }
    }

    match selected {
        Some(variant) => Ok(VariantSelection {
            variant,
            ambiguous_with,
        }),
        None => Err(EligibilityFailure {
            entity_id: entity.id.clone(),
            mismatches,
        }),
    }
}

fn unmet_constraints(entity: &Entity, predicate: &EligibilityPredicate) -> Vec<String> {
    predicate
        .constraints
        .iter()
        .filter(|constraint| !satisfies(entity, constraint))
        .map(AttributeConstraint::describe)
        .collect()
}

fn satisfies(entity: &Entity, constraint: &AttributeConstraint) -> bool {
    let Some(actual) = entity.attributes.get(constraint.attribute()) else {
        return false;
    };
    match constraint {
        AttributeConstraint::Equals { value, .. } => actual == value,
        AttributeConstraint::OneOf { values, .. } => values.iter().any(|value| value == actual),
    }
}
