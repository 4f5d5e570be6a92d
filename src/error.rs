use thiserror::Error;

use crate::construct::RelId;
use crate::datatype::DataType;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Parse error: {file}:{line}: {message}")]
    Parse {
        message: String,
        file: String,
        line: usize,
    },
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),
    #[error("Duplicate index {index} on {kind}")]
    DuplicateIndex { kind: String, index: String },
    #[error("Duplicate attribute {kind}.{attribute}")]
    DuplicateAttribute { kind: String, attribute: String },
    #[error("Unknown class: {0}")]
    UnknownClass(String),
    #[error("Unknown attribute {kind}.{attribute}")]
    UnknownAttribute { kind: String, attribute: String },
    #[error("Unknown link from {from} to {to} across {rel_id} '{phrase}'")]
    UnknownLink {
        from: String,
        to: String,
        rel_id: RelId,
        phrase: String,
    },
    #[error("Invalid association {rel_id}: {message}")]
    InvalidAssociation { rel_id: RelId, message: String },
    #[error("Unable to relate {from} to {to} across {rel_id} '{phrase}'")]
    RelateConflict {
        from: String,
        to: String,
        rel_id: RelId,
        phrase: String,
    },
    #[error("Unable to unrelate {from} from {to} across {rel_id} '{phrase}'")]
    UnrelateConflict {
        from: String,
        to: String,
        rel_id: RelId,
        phrase: String,
    },
    #[error("Instance not found: {0}")]
    NotFound(String),
    #[error("Type mismatch on {kind}.{attribute}: expected {expected}, found {found}")]
    TypeMismatch {
        kind: String,
        attribute: String,
        expected: DataType,
        found: String,
    },
    #[error("{kind}.{attribute} is a referential attribute and cannot be assigned directly")]
    ReferentialAssignment { kind: String, attribute: String },
    #[error("{kind}.{attribute} is part of an index or association")]
    AttributeInUse { kind: String, attribute: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;

// Helper conversions
impl From<std::io::Error> for ModelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<config::ConfigError> for ModelError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
