//! Consistency checks over a populated model. Checks never fail and never
//! mutate the model; they return every violation found and log each one.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::construct::{Cardinality, ClassDescriptor, IdHasher, InstanceId, Model, RelId};
use crate::datatype::Value;

// ------------- Violation -------------
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// An instance reaches too few or too many peers across a link.
    Cardinality {
        rel_id: RelId,
        from_kind: String,
        to_kind: String,
        phrase: String,
        instance: InstanceId,
        label: String,
        count: usize,
        cardinality: Cardinality,
    },
    /// Several instances share the values of a unique index.
    Uniqueness {
        kind: String,
        index: String,
        key: Vec<String>,
        members: Vec<InstanceId>,
    },
    NullIdentifier {
        kind: String,
        attribute: String,
        instance: InstanceId,
        label: String,
    },
    Subtype {
        kind: String,
        rel_id: RelId,
        instance: InstanceId,
        label: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Violation::Cardinality {
                rel_id,
                to_kind,
                phrase,
                label,
                count,
                cardinality,
                ..
            } => {
                let phrase = if phrase.is_empty() {
                    String::new()
                } else {
                    format!(" '{phrase}'")
                };
                write!(
                    f,
                    "{label} reaches {count} {to_kind} across {rel_id}{phrase}, cardinality is {cardinality}"
                )
            }
            Violation::Uniqueness {
                kind,
                index,
                key,
                members,
            } => write!(
                f,
                "{} instances of {kind} share ({}) in index {index}",
                members.len(),
                key.join(", ")
            ),
            Violation::NullIdentifier {
                attribute, label, ..
            } => write!(f, "{label} has a null identifying attribute {attribute}"),
            Violation::Subtype { rel_id, label, .. } => {
                write!(f, "{label} has no subtype across {rel_id}")
            }
        }
    }
}

fn report(violations: &mut Vec<Violation>, violation: Violation) {
    warn!("{}", violation);
    violations.push(violation);
}

// ------------- Checks -------------
/// Counts peers across both links of every association (or only `rel_id`)
/// and reports instances whose count breaks the link's cardinality.
pub fn check_association_integrity(model: &Model, rel_id: Option<RelId>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let associations = model
        .associations()
        .iter()
        .filter(|association| rel_id.is_none_or(|r| association.rel_id() == r));
    for association in associations {
        for link in [association.source_link(), association.target_link()] {
            let link = model.link(link);
            let from = model.class(link.from());
            let to = model.class(link.to());
            for id in from.instances() {
                let count = link.navigate(id).len();
                if (count < 1 && !link.conditional()) || (count > 1 && !link.many()) {
                    report(
                        &mut violations,
                        Violation::Cardinality {
                            rel_id: link.rel_id(),
                            from_kind: from.kind().to_string(),
                            to_kind: to.kind().to_string(),
                            phrase: link.phrase().to_string(),
                            instance: id,
                            label: model.describe(id),
                            count,
                            cardinality: link.cardinality(),
                        },
                    );
                }
            }
        }
    }
    debug!("association integrity: {} violations", violations.len());
    violations
}

/// Groups instances by every unique index and reports groups of more than
/// one member, plus identifying attributes holding a null value.
pub fn check_uniqueness_constraint(model: &Model, kind: Option<&str>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let classes: Vec<&ClassDescriptor> = match kind {
        Some(kind) => match model.find_class(kind) {
            Ok(class) => vec![class],
            Err(e) => {
                warn!("{}", e);
                return violations;
            }
        },
        None => model.classes().iter().collect(),
    };
    for class in classes {
        for index in class.indices() {
            let slots: Vec<usize> = index
                .attributes()
                .iter()
                .filter_map(|attribute| class.slot(attribute))
                .collect();
            let mut order: Vec<Vec<Value>> = Vec::new();
            let mut groups: HashMap<Vec<Value>, Vec<InstanceId>, IdHasher> = HashMap::default();
            for id in class.instances() {
                let key: Vec<Value> = slots.iter().map(|slot| model.read(id, *slot)).collect();
                let members = groups.entry(key.clone()).or_default();
                if members.is_empty() {
                    order.push(key);
                }
                members.push(id);
            }
            for key in order {
                let members = &groups[&key];
                if members.len() > 1 {
                    report(
                        &mut violations,
                        Violation::Uniqueness {
                            kind: class.kind().to_string(),
                            index: index.name().to_string(),
                            key: key.iter().map(Value::to_string).collect(),
                            members: members.clone(),
                        },
                    );
                }
            }
        }
        for attribute in class.identifying_attributes() {
            let Some(slot) = class.slot(attribute.name()) else {
                continue;
            };
            for id in class.instances() {
                let value = model.read(id, slot);
                if value.is_null() || value == Value::UniqueId(0) {
                    report(
                        &mut violations,
                        Violation::NullIdentifier {
                            kind: class.kind().to_string(),
                            attribute: attribute.name().to_string(),
                            instance: id,
                            label: model.describe(id),
                        },
                    );
                }
            }
        }
    }
    debug!("uniqueness: {} violations", violations.len());
    violations
}

/// Reports every instance of `super_kind` without a subtype across `rel_id`.
pub fn check_subtype_integrity(model: &Model, super_kind: &str, rel_id: RelId) -> Vec<Violation> {
    let mut violations = Vec::new();
    let class = match model.find_class(super_kind) {
        Ok(class) => class,
        Err(e) => {
            warn!("{}", e);
            return violations;
        }
    };
    for id in class.instances() {
        if model.navigate_subtype(id, rel_id).is_none() {
            report(
                &mut violations,
                Violation::Subtype {
                    kind: class.kind().to_string(),
                    rel_id,
                    instance: id,
                    label: model.describe(id),
                },
            );
        }
    }
    violations
}

pub fn is_consistent(model: &Model) -> bool {
    check_association_integrity(model, None).is_empty()
        && check_uniqueness_constraint(model, None).is_empty()
}
