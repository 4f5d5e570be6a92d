use proptest::collection::vec;
use proptest::prelude::*;

use xtmodel::construct::Model;
use xtmodel::datatype::{DataType, Value};
use xtmodel::error::ModelError;
use xtmodel::loader::{ModelLoader, load_model};
use xtmodel::persist::{
    persist_database, serialize_association, serialize_class, serialize_database,
    serialize_instance, serialize_schema,
};

fn setup(text: &str) -> Model {
    let mut loader = ModelLoader::new();
    loader.input(text, "round_trip.sql").unwrap();
    loader.build_model().unwrap()
}

fn reload(text: &str) -> String {
    serialize_database(&setup(text)).unwrap()
}

const LIST: &str = r#"
CREATE TABLE A (Id UNIQUE_ID, Next_Id UNIQUE_ID);
CREATE UNIQUE INDEX I1 ON A (Id);
CREATE ROP REF_ID R3 FROM 1C A (Next_Id) PHRASE 'precedes' TO 1C A (Id) PHRASE 'succeeds';
INSERT INTO A VALUES ("00000000-0000-0000-0000-000000000001", "00000000-0000-0000-0000-000000000002");
INSERT INTO A VALUES ("00000000-0000-0000-0000-000000000002", "00000000-0000-0000-0000-000000000000");
"#;

#[test]
fn database_text_has_a_fixed_layout() {
    let expected = r#"CREATE TABLE A (
    Id UNIQUE_ID,
    Next_Id UNIQUE_ID
);
CREATE UNIQUE INDEX I1 ON A (Id);
CREATE ROP REF_ID R3 FROM 1C A (Next_Id) PHRASE 'precedes' TO 1C A (Id) PHRASE 'succeeds';
INSERT INTO A VALUES (
    "00000000-0000-0000-0000-000000000001", -- Id : UNIQUE_ID
    "00000000-0000-0000-0000-000000000002" -- Next_Id : UNIQUE_ID
);
INSERT INTO A VALUES (
    "00000000-0000-0000-0000-000000000002", -- Id : UNIQUE_ID
    "00000000-0000-0000-0000-000000000000" -- Next_Id : UNIQUE_ID
);
"#;
    assert_eq!(reload(LIST), expected);
}

#[test]
fn values_serialize_per_declared_type() {
    let mut model = setup(
        "CREATE TABLE T (Flag BOOLEAN, Count INTEGER, Ratio REAL, Label STRING);
         INSERT INTO T VALUES (TRUE, -5, 0.5, 'it''s');",
    );
    let t = model.find_class("T").unwrap().instances().next().unwrap();
    assert_eq!(
        serialize_instance(&model, t).unwrap(),
        "INSERT INTO T VALUES (
    1, -- Flag : BOOLEAN
    -5, -- Count : INTEGER
    0.500000, -- Ratio : REAL
    'it''s' -- Label : STRING
);
"
    );
    model.set(t, "Label", Value::Null).unwrap();
    assert!(serialize_instance(&model, t).unwrap().contains("    '' -- Label : STRING"));
    assert_eq!(
        serialize_class(model.find_class("T").unwrap()),
        "CREATE TABLE T (\n    Flag BOOLEAN,\n    Count INTEGER,\n    Ratio REAL,\n    Label STRING\n);\n"
    );
}

#[test]
fn schema_is_sorted_by_kind_and_association() {
    let model = setup(
        "CREATE TABLE zeta (Id INTEGER, Alpha_Id INTEGER);
         CREATE TABLE Alpha (Id INTEGER, Beta_Id INTEGER);
         CREATE TABLE beta (Id INTEGER);
         CREATE ROP REF_ID R10 FROM M zeta (Alpha_Id) TO 1 Alpha (Id);
         CREATE ROP REF_ID R2 FROM MC Alpha (Beta_Id) TO 1C beta (Id);",
    );
    let schema = serialize_schema(&model);
    let alpha = schema.find("CREATE TABLE Alpha").unwrap();
    let beta = schema.find("CREATE TABLE beta").unwrap();
    let zeta = schema.find("CREATE TABLE zeta").unwrap();
    assert!(alpha < beta && beta < zeta);
    let r2 = schema.find("REF_ID R2 ").unwrap();
    let r10 = schema.find("REF_ID R10 ").unwrap();
    assert!(zeta < r2 && r2 < r10);
    assert_eq!(
        serialize_association(&model, &model.associations()[1]),
        "CREATE ROP REF_ID R2 FROM MC Alpha (Beta_Id) TO 1C beta (Id);\n"
    );
}

#[test]
fn loading_serialized_text_is_lossless() {
    let source = r#"
        CREATE TABLE Y (Id UNIQUE_ID, X_Id UNIQUE_ID, Note STRING);
        CREATE TABLE X (Id UNIQUE_ID, Weight REAL, Big BOOLEAN);
        CREATE ROP REF_ID R1 FROM MC Y (X_Id) TO 1 X (Id);
        INSERT INTO X VALUES ("00000000-0000-0000-0000-000000000001", 2.25, FALSE);
        INSERT INTO Y VALUES ("00000000-0000-0000-0000-000000000002", "00000000-0000-0000-0000-000000000001", 'one');
        -- refers to an X that is not there
        INSERT INTO Y VALUES ("00000000-0000-0000-0000-000000000003", "00000000-0000-0000-0000-000000000009", 'dangling');
        INSERT INTO Loose VALUES (7, 'synthesized', 1.5);
    "#;
    let first = reload(source);
    let second = reload(&first);
    assert_eq!(first, second);
    assert!(first.contains("\"00000000-0000-0000-0000-000000000009\", -- X_Id : UNIQUE_ID"));
    assert!(first.contains("CREATE TABLE Loose (\n    _0 INTEGER,\n    _1 STRING,\n    _2 REAL\n);"));
}

#[test]
fn persisted_databases_load_back() {
    let model = setup(LIST);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("list.sql");
    persist_database(&model, &path).unwrap();
    let loaded = load_model([&path]).unwrap();
    assert_eq!(
        serialize_database(&loaded).unwrap(),
        serialize_database(&model).unwrap()
    );
    let head = loaded.find_class("A").unwrap().instances().next().unwrap();
    assert_eq!(
        loaded.navigate_one(head).nav("A", 3, "precedes").unwrap().one(),
        loaded.find_class("A").unwrap().instances().nth(1)
    );
}

#[test]
fn non_finite_reals_are_refused() {
    let mut model = Model::new();
    model.define_class("R", [("V", DataType::Real)]).unwrap();
    assert!(matches!(
        model.new_instance("R").arg(f64::NAN).create(),
        Err(ModelError::TypeMismatch { .. })
    ));
    let r = model.new_instance("R").arg(2.5).create().unwrap();
    assert!(matches!(
        model.set(r, "V", f64::INFINITY),
        Err(ModelError::TypeMismatch { .. })
    ));
    let text = serialize_database(&model).unwrap();
    assert_eq!(reload(&text), text);
}

proptest! {
    /// Rows built through the API survive serialization and loading.
    #[test]
    fn rows_survive_a_round_trip(
        rows in vec((any::<u128>(), any::<i64>(), -4000i32..4000, "[a-zA-Z' ]{0,12}", any::<bool>()), 0..20)
    ) {
        let mut model = Model::new();
        model.define_class("Row", [
            ("Id", DataType::UniqueId),
            ("Count", DataType::Integer),
            ("Ratio", DataType::Real),
            ("Label", DataType::String),
            ("Flag", DataType::Boolean),
        ]).expect("define");
        for (id, count, quarters, label, flag) in &rows {
            model
                .new_instance("Row")
                .arg(Value::UniqueId(*id))
                .arg(*count)
                .arg(*quarters as f64 / 4.0)
                .arg(label.as_str())
                .arg(*flag)
                .create()
                .expect("create");
        }
        let text = serialize_database(&model).expect("serialize");
        let mut loader = ModelLoader::new();
        loader.input(&text, "prop.sql").expect("parse");
        let reloaded = loader.build_model().expect("load");
        prop_assert_eq!(serialize_database(&reloaded).expect("serialize"), text);

        let values = |m: &Model| -> Vec<Vec<Value>> {
            m.find_class("Row")
                .map(|class| class.instances().filter_map(|id| m.view(id)).map(|v| v.values()).collect())
                .unwrap_or_default()
        };
        prop_assert_eq!(values(&reloaded), values(&model));
    }
}
