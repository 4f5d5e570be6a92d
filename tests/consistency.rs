use xtmodel::check::{
    Violation, check_association_integrity, check_subtype_integrity, check_uniqueness_constraint,
    is_consistent,
};
use xtmodel::construct::{Model, RelId};
use xtmodel::datatype::Value;
use xtmodel::loader::ModelLoader;

fn setup(text: &str) -> Model {
    let mut loader = ModelLoader::new();
    loader.input(text, "consistency.sql").unwrap();
    loader.build_model().unwrap()
}

const XY: &str = "
    CREATE TABLE X (Id UNIQUE_ID);
    CREATE TABLE Y (Id UNIQUE_ID, X_Id UNIQUE_ID);
    CREATE ROP REF_ID R1 FROM MC Y (X_Id) TO 1 X (Id);
";

#[test]
fn unconnected_mandatory_links_are_flagged() {
    let mut model = setup(XY);
    let x = model.new_instance("X").create().unwrap();
    let y = model.new_instance("Y").create().unwrap();

    let violations = check_association_integrity(&model, None);
    assert_eq!(violations.len(), 1);
    match &violations[0] {
        Violation::Cardinality {
            instance,
            count,
            to_kind,
            ..
        } => {
            assert_eq!(*instance, y);
            assert_eq!(*count, 0);
            assert_eq!(to_kind, "X");
        }
        other => panic!("unexpected {other}"),
    }
    assert!(!is_consistent(&model));

    model.relate(x, y, 1, "").unwrap();
    assert!(check_association_integrity(&model, None).is_empty());
    assert!(is_consistent(&model));
}

#[test]
fn loaded_cardinality_breaches_are_kept_for_the_checker() {
    let model = setup(
        "CREATE TABLE Head (Id INTEGER);
         CREATE TABLE Tail (Id INTEGER, Head_Id INTEGER);
         CREATE ROP REF_ID R4 FROM 1C Tail (Head_Id) TO 1 Head (Id);
         INSERT INTO Head VALUES (1);
         INSERT INTO Tail VALUES (10, 1);
         INSERT INTO Tail VALUES (11, 1);",
    );
    let violations = check_association_integrity(&model, Some(RelId(4)));
    assert_eq!(violations.len(), 1);
    assert!(matches!(
        &violations[0],
        Violation::Cardinality { count: 2, from_kind, .. } if from_kind == "Head"
    ));
    assert!(check_association_integrity(&model, Some(RelId(99))).is_empty());
}

#[test]
fn duplicate_keys_form_one_group() {
    let model = setup(
        "CREATE TABLE P (Id INTEGER, Name STRING);
         CREATE UNIQUE INDEX I1 ON P (Id);
         INSERT INTO P VALUES (1, 'a');
         INSERT INTO P VALUES (2, 'b');
         INSERT INTO P VALUES (1, 'c');
         INSERT INTO P VALUES (1, 'd');",
    );
    let violations = check_uniqueness_constraint(&model, None);
    assert_eq!(violations.len(), 1);
    match &violations[0] {
        Violation::Uniqueness {
            kind,
            index,
            members,
            ..
        } => {
            assert_eq!(kind, "P");
            assert_eq!(index, "I1");
            assert_eq!(members.len(), 3);
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(check_uniqueness_constraint(&model, Some("p")).len(), 1);
    assert!(check_uniqueness_constraint(&model, Some("Nope")).is_empty());
}

#[test]
fn null_identifiers_are_flagged() {
    let mut model = setup(XY);
    let x = model.new_instance("X").create().unwrap();
    assert!(check_uniqueness_constraint(&model, None).is_empty());
    model.set(x, "Id", Value::UniqueId(0)).unwrap();
    let violations = check_uniqueness_constraint(&model, Some("X"));
    assert_eq!(violations.len(), 1);
    assert!(matches!(
        &violations[0],
        Violation::NullIdentifier { attribute, .. } if attribute == "Id"
    ));
}

#[test]
fn supertypes_without_subtypes_are_flagged() {
    let model = setup(
        "CREATE TABLE S (Id INTEGER);
         CREATE TABLE A (Id INTEGER);
         CREATE TABLE B (Id INTEGER);
         CREATE ROP REF_ID R2 FROM 1C A (Id) TO 1 S (Id);
         CREATE ROP REF_ID R2 FROM 1C B (Id) TO 1 S (Id);
         INSERT INTO S VALUES (1);
         INSERT INTO S VALUES (2);
         INSERT INTO S VALUES (3);
         INSERT INTO A VALUES (1);
         INSERT INTO B VALUES (3);",
    );
    let violations = check_subtype_integrity(&model, "S", RelId(2));
    assert_eq!(violations.len(), 1);
    match &violations[0] {
        Violation::Subtype { label, .. } => assert_eq!(label, "S(Id=2)"),
        other => panic!("unexpected {other}"),
    }
    assert!(check_subtype_integrity(&model, "Nope", RelId(2)).is_empty());
}

#[test]
fn violations_serialize_to_json() {
    let mut model = setup(XY);
    model.new_instance("Y").create().unwrap();
    let violations = check_association_integrity(&model, None);
    let json = serde_json::to_value(&violations).unwrap();
    assert_eq!(json[0]["violation"], "cardinality");
    assert_eq!(json[0]["rel_id"], 1);
    assert_eq!(json[0]["cardinality"]["many"], false);
}
