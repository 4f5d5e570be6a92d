// Serialization of a model back into the SQL format it was loaded from.
// Loading the output and serializing again gives the same text.
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::construct::{Association, ClassDescriptor, InstanceId, Model};
use crate::error::{ModelError, Result};

fn quote(phrase: &str) -> String {
    format!("'{}'", phrase.replace('\'', "''"))
}

// classes in a stable order, independent of definition order
fn sorted_classes(model: &Model) -> Vec<&ClassDescriptor> {
    let mut classes: Vec<&ClassDescriptor> = model.classes().iter().collect();
    classes.sort_by_key(|class| class.kind().to_uppercase());
    classes
}

fn sorted_associations(model: &Model) -> Vec<&Association> {
    let mut associations: Vec<&Association> = model.associations().iter().collect();
    associations.sort_by_key(|association| association.rel_id());
    associations
}

pub fn serialize_class(class: &ClassDescriptor) -> String {
    let columns: Vec<String> = class
        .attributes()
        .iter()
        .map(|attribute| format!("{} {}", attribute.name(), attribute.data_type()))
        .collect();
    format!("CREATE TABLE {} (\n    {}\n);\n", class.kind(), columns.join(",\n    "))
}

pub fn serialize_association(model: &Model, association: &Association) -> String {
    let source_link = model.link(association.source_link());
    let target_link = model.link(association.target_link());
    let mut from = format!(
        "{} {} ({})",
        source_link.cardinality(),
        model.class(association.source()).kind(),
        association.source_keys().join(", ")
    );
    if !target_link.phrase().is_empty() {
        from += &format!(" PHRASE {}", quote(target_link.phrase()));
    }
    let mut to = format!(
        "{} {} ({})",
        target_link.cardinality(),
        model.class(association.target()).kind(),
        association.target_keys().join(", ")
    );
    if !source_link.phrase().is_empty() {
        to += &format!(" PHRASE {}", quote(source_link.phrase()));
    }
    format!(
        "CREATE ROP REF_ID {} FROM {} TO {};\n",
        association.rel_id(),
        from,
        to
    )
}

pub fn serialize_unique_identifiers(class: &ClassDescriptor) -> String {
    class
        .indices()
        .iter()
        .map(|index| {
            format!(
                "CREATE UNIQUE INDEX {} ON {} ({});\n",
                index.name(),
                class.kind(),
                index.attributes().join(", ")
            )
        })
        .collect()
}

pub fn serialize_instance(model: &Model, id: InstanceId) -> Result<String> {
    let class = model.class_of(id)?;
    let attributes = class.attributes();
    let mut s = format!("INSERT INTO {} VALUES (", class.kind());
    for (slot, attribute) in attributes.iter().enumerate() {
        let separator = if slot + 1 < attributes.len() { "," } else { "" };
        s += &format!(
            "\n    {}{} -- {} : {}",
            model.read(id, slot).serialize(attribute.data_type()),
            separator,
            attribute.name(),
            attribute.data_type()
        );
    }
    s += "\n);\n";
    Ok(s)
}

pub fn serialize_schema(model: &Model) -> String {
    let mut s = String::new();
    for class in sorted_classes(model) {
        s += &serialize_class(class);
        s += &serialize_unique_identifiers(class);
    }
    for association in sorted_associations(model) {
        s += &serialize_association(model, association);
    }
    s
}

pub fn serialize_instances(model: &Model) -> Result<String> {
    let mut s = String::new();
    for class in sorted_classes(model) {
        for id in class.instances() {
            s += &serialize_instance(model, id)?;
        }
    }
    Ok(s)
}

pub fn serialize_database(model: &Model) -> Result<String> {
    Ok(serialize_schema(model) + &serialize_instances(model)?)
}

pub fn persist_schema(model: &Model, path: impl AsRef<Path>) -> Result<()> {
    write(path.as_ref(), &serialize_schema(model))
}

pub fn persist_database(model: &Model, path: impl AsRef<Path>) -> Result<()> {
    write(path.as_ref(), &serialize_database(model)?)
}

fn write(path: &Path, text: &str) -> Result<()> {
    debug!("writing {} bytes to {}", text.len(), path.display());
    fs::write(path, text).map_err(|e| ModelError::Io(format!("{}: {}", path.display(), e)))
}
