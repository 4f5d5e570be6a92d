//! xtmodel – load, navigate, check and re-serialize xtUML models stored in a
//! SQL-flavoured text format.
//!
//! A model file declares classes with `CREATE TABLE`, associations between
//! them with `CREATE ROP REF_ID`, identifiers with `CREATE UNIQUE INDEX`, and
//! holds rows as `INSERT INTO ... VALUES` statements:
//!
//! ```sql
//! CREATE TABLE X (Id UNIQUE_ID);
//! CREATE TABLE Y (Id UNIQUE_ID, X_Id UNIQUE_ID);
//! CREATE ROP REF_ID R1 FROM MC Y (X_Id) TO 1 X (Id);
//! ```
//!
//! Loading turns this into a [`construct::Model`]: an arena of instances,
//! one class descriptor per kind, and a pair of links per association. Each
//! link maps an instance to its peers, so the instance graph is a set of
//! id-to-ids maps with no ownership cycles.
//!
//! ## Modules
//! * [`construct`] – ids, class descriptors, links, associations and the [`construct::Model`].
//! * [`datatype`] – the five attribute types and the [`datatype::Value`] they hold.
//! * [`query`] – selection, navigation chains and reflexive sorting.
//! * [`check`] – association, uniqueness and subtype consistency checks.
//! * [`persist`] – serialization back into the source format.
//! * [`parse`] – the pest grammar and the statements it produces.
//! * [`loader`] – the [`loader::ModelLoader`] applying statements to a model.
//! * [`settings`] – layered configuration.
//!
//! ## Quick Start
//! ```
//! use xtmodel::{check, loader::ModelLoader, persist};
//! let mut loader = ModelLoader::new();
//! loader.input("
//!     CREATE TABLE X (Id UNIQUE_ID);
//!     CREATE TABLE Y (Id UNIQUE_ID, X_Id UNIQUE_ID);
//!     CREATE ROP REF_ID R1 FROM MC Y (X_Id) TO 1 X (Id);
//!     INSERT INTO X VALUES (\"00000000-0000-0000-0000-000000000001\");
//!     INSERT INTO Y VALUES (\"00000000-0000-0000-0000-000000000002\", \"00000000-0000-0000-0000-000000000001\");
//! ", "quick.sql").unwrap();
//! let model = loader.build_model().unwrap();
//! let x = model.find_class("X").unwrap().instances().next().unwrap();
//! let ys = model.navigate_one(x).nav("Y", 1, "").unwrap().many();
//! assert_eq!(ys.len(), 1);
//! assert!(check::is_consistent(&model));
//! assert!(persist::serialize_database(&model).unwrap().contains("CREATE ROP REF_ID R1"));
//! ```

pub mod check;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod loader;
pub mod parse;
pub mod persist;
pub mod query;
pub mod settings;

pub use construct::{AssociationEnd, Cardinality, InstanceId, Model, RelId};
pub use datatype::{DataType, Value};
pub use error::{ModelError, Result};
pub use loader::{ModelLoader, load_model};
pub use query::{QuerySet, Selector};
