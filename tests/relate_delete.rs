use xtmodel::construct::{AssociationEnd, Cardinality, InstanceId, Model, RelId};
use xtmodel::datatype::{DataType, Value};
use xtmodel::error::ModelError;
use xtmodel::query::Selector;

fn schema(model: &mut Model) {
    model.define_class("X", [("Id", DataType::UniqueId)]).unwrap();
    model
        .define_class(
            "Y",
            [("Id", DataType::UniqueId), ("X_Id", DataType::UniqueId)],
        )
        .unwrap();
    model
        .define_association(
            1,
            AssociationEnd::new("Y", ["X_Id"], Cardinality::MANY_CONDITIONAL),
            AssociationEnd::new("X", ["Id"], Cardinality::ONE),
        )
        .unwrap();
}

fn setup() -> (Model, InstanceId, InstanceId) {
    let mut model = Model::new();
    schema(&mut model);
    let x = model.new_instance("X").create().unwrap();
    let y = model.new_instance("Y").create().unwrap();
    model.relate(x, y, 1, "").unwrap();
    (model, x, y)
}

fn x_of(model: &Model, y: InstanceId) -> Option<InstanceId> {
    model.navigate_one(y).nav("X", 1, "").unwrap().one()
}

#[test]
fn unrelate_restores_empty_navigation() {
    let (mut model, x, y) = setup();
    assert_eq!(x_of(&model, y), Some(x));
    model.unrelate(y, x, 1, "").unwrap();
    assert_eq!(x_of(&model, y), None);
    assert!(model.navigate_one(x).nav("Y", 1, "").unwrap().many().is_empty());
    assert_eq!(model.get(y, "X_Id").unwrap(), Value::UniqueId(0));
}

#[test]
fn unrelate_of_unconnected_instances_fails() {
    let (mut model, x, _) = setup();
    let other = model.new_instance("Y").create().unwrap();
    assert!(matches!(
        model.unrelate(x, other, 1, ""),
        Err(ModelError::UnrelateConflict { .. })
    ));
}

#[test]
fn relate_conflicts_leave_the_model_unchanged() {
    let (mut model, x, y) = setup();
    let x2 = model.new_instance("X").create().unwrap();
    let before = model.get(y, "X_Id").unwrap();
    assert!(matches!(
        model.relate(y, x2, 1, ""),
        Err(ModelError::RelateConflict { .. })
    ));
    assert_eq!(x_of(&model, y), Some(x));
    assert!(model.navigate_one(x2).nav("Y", 1, "").unwrap().many().is_empty());
    assert_eq!(model.get(y, "X_Id").unwrap(), before);

    // relating an already related pair again changes nothing
    model.relate(y, x, 1, "").unwrap();
    assert_eq!(model.navigate_one(x).nav("Y", 1, "").unwrap().many().len(), 1);
}

#[test]
fn relate_needs_a_known_association() {
    let (mut model, x, y) = setup();
    assert!(matches!(
        model.relate(x, y, 9, ""),
        Err(ModelError::UnknownLink { .. })
    ));
    assert!(matches!(
        model.relate(x, x, 1, ""),
        Err(ModelError::UnknownLink { .. })
    ));
}

#[test]
fn phrases_must_match_when_given() {
    let mut model = Model::new();
    model.define_class("X", [("Id", DataType::UniqueId)]).unwrap();
    model
        .define_class("Y", [("Id", DataType::UniqueId), ("X_Id", DataType::UniqueId)])
        .unwrap();
    model
        .define_association(
            1,
            AssociationEnd::new("Y", ["X_Id"], Cardinality::MANY_CONDITIONAL).phrase("is owned by"),
            AssociationEnd::new("X", ["Id"], Cardinality::ONE).phrase("owns"),
        )
        .unwrap();
    let x = model.new_instance("X").create().unwrap();
    let y = model.new_instance("Y").create().unwrap();

    assert!(matches!(
        model.relate(y, x, 1, "no such phrase"),
        Err(ModelError::UnknownLink { .. })
    ));
    assert!(matches!(
        model.navigate_one(y).nav("X", 1, "no such phrase"),
        Err(ModelError::UnknownLink { .. })
    ));
    assert_eq!(x_of(&model, y), None);

    // an empty phrase finds the only link, the right phrase finds it by name
    model.relate(y, x, 1, "").unwrap();
    assert_eq!(x_of(&model, y), Some(x));
    assert_eq!(
        model.navigate_one(y).nav("X", 1, "is owned by").unwrap().one(),
        Some(x)
    );
    assert_eq!(model.navigate_one(x).nav("Y", 1, "owns").unwrap().many().len(), 1);
}

#[test]
fn association_ids_are_unsigned() {
    assert_eq!("R12".parse::<RelId>(), Ok(RelId(12)));
    assert_eq!("12".parse::<RelId>(), Ok(RelId(12)));
    assert!("R-1".parse::<RelId>().is_err());
    assert!("-1".parse::<RelId>().is_err());
    let (mut model, x, y) = setup();
    model.unrelate(y, x, 1u32, "").unwrap();
    model.relate(x, y, RelId::from(1u32), "").unwrap();
    assert_eq!(x_of(&model, y), Some(x));
}

#[test]
fn delete_disconnects_every_link() {
    let (mut model, x, y) = setup();
    model.delete(x).unwrap();
    assert!(!model.is_live(x));
    assert_eq!(x_of(&model, y), None);
    assert_eq!(model.get(y, "X_Id").unwrap(), Value::UniqueId(0));
    assert!(model.select_many("X", &Selector::new()).unwrap().is_empty());
    assert!(matches!(model.delete(x), Err(ModelError::NotFound(_))));
    assert!(matches!(model.get(x, "Id"), Err(ModelError::NotFound(_))));

    // ids are never reused
    let x2 = model.new_instance("X").create().unwrap();
    assert!(x2 > y);
}

#[test]
fn deleting_the_referring_side_keeps_the_peer() {
    let (mut model, x, y) = setup();
    model.delete(y).unwrap();
    assert!(model.navigate_one(x).nav("Y", 1, "").unwrap().many().is_empty());
    assert!(model.is_live(x));
}

#[test]
fn attributes_can_be_added_and_removed() {
    let (mut model, x, y) = setup();
    let x_id = model.get(x, "Id").unwrap();
    model.insert_attribute("Y", 0, "Name", DataType::String).unwrap();
    model.append_attribute("Y", "Size", DataType::Integer).unwrap();
    let names: Vec<&str> = model
        .find_class("Y")
        .unwrap()
        .attributes()
        .iter()
        .map(|a| a.name())
        .collect();
    assert_eq!(names, vec!["Name", "Id", "X_Id", "Size"]);
    assert_eq!(model.get(y, "Name").unwrap(), Value::from(""));
    assert_eq!(model.get(y, "X_Id").unwrap(), x_id);

    model.set(y, "Size", 3).unwrap();
    model.delete_attribute("Y", "Name").unwrap();
    assert_eq!(model.get(y, "Size").unwrap(), Value::Integer(3));
    assert_eq!(model.get(y, "X_Id").unwrap(), x_id);

    assert!(matches!(
        model.delete_attribute("Y", "X_Id"),
        Err(ModelError::AttributeInUse { .. })
    ));
    assert!(matches!(
        model.delete_attribute("X", "Id"),
        Err(ModelError::AttributeInUse { .. })
    ));
    assert!(matches!(
        model.append_attribute("Y", "size", DataType::Real),
        Err(ModelError::DuplicateAttribute { .. })
    ));
}

#[test]
fn schema_definitions_are_checked() {
    let mut model = Model::new();
    schema(&mut model);
    assert!(matches!(
        model.define_class("x", [("Id", DataType::UniqueId)]),
        Err(ModelError::DuplicateClass(_))
    ));
    assert!(matches!(
        model.define_class("Z", [("A", DataType::Integer), ("a", DataType::Real)]),
        Err(ModelError::DuplicateAttribute { .. })
    ));
    model.define_unique_identifier("X", "I1", ["Id"]).unwrap();
    assert!(matches!(
        model.define_unique_identifier("X", "i1", ["Id"]),
        Err(ModelError::DuplicateIndex { .. })
    ));
    assert!(matches!(
        model.define_unique_identifier("X", "I2", ["Nope"]),
        Err(ModelError::UnknownAttribute { .. })
    ));
    assert!(matches!(
        model.define_association(
            2,
            AssociationEnd::new("Y", ["X_Id", "Id"], Cardinality::MANY),
            AssociationEnd::new("X", ["Id"], Cardinality::ONE),
        ),
        Err(ModelError::InvalidAssociation { .. })
    ));
    assert!(matches!(
        model.define_association(
            1,
            AssociationEnd::new("Y", ["X_Id"], Cardinality::MANY),
            AssociationEnd::new("X", ["Id"], Cardinality::ONE),
        ),
        Err(ModelError::InvalidAssociation { .. })
    ));
    assert!(matches!(
        model.new_instance("Nope").create(),
        Err(ModelError::UnknownClass(_))
    ));
}

#[test]
fn clones_relate_like_their_original() {
    let (mut model, x, y) = setup();
    let copy = model.clone_instance(y).unwrap();
    assert_ne!(copy, y);
    assert_eq!(model.get(copy, "Id").unwrap(), model.get(y, "Id").unwrap());
    assert_eq!(x_of(&model, copy), Some(x));
    assert_eq!(model.navigate_one(x).nav("Y", 1, "").unwrap().many().len(), 2);

    let mut other = Model::new();
    schema(&mut other);
    let moved = model.clone_into(x, &mut other).unwrap();
    assert_eq!(other.get(moved, "Id").unwrap(), model.get(x, "Id").unwrap());
    // finds the copied X in the other model
    let stray = model.clone_into(y, &mut other).unwrap();
    assert_eq!(
        other.navigate_one(stray).nav("X", 1, "").unwrap().one(),
        Some(moved)
    );
}
