// used for the canonical text of unique identifiers
use uuid::Uuid;

// used to order values in query results
use std::cmp::Ordering;
// used to print out readable forms of a data type
use std::fmt;
// values are grouped by identifying tuples, so they need to be hashable
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::Serialize;

// ------------- DataType -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DataType {
    Boolean,
    Integer,
    Real,
    String,
    UniqueId,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Boolean,
        DataType::Integer,
        DataType::Real,
        DataType::String,
        DataType::UniqueId,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::String => "STRING",
            DataType::UniqueId => "UNIQUE_ID",
        }
    }
    /// The value an attribute of this type holds when nothing was assigned
    /// and when a reference cannot be resolved.
    pub fn null_value(&self) -> Value {
        match self {
            DataType::Boolean => Value::Boolean(false),
            DataType::Integer => Value::Integer(0),
            DataType::Real => Value::Real(0.0),
            DataType::String => Value::String(String::new()),
            DataType::UniqueId => Value::UniqueId(0),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DataType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|data_type| data_type.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown data type '{s}'"))
    }
}

// ------------- Value -------------
/// A dynamically typed attribute value.
///
/// `Null` only shows up when an assignment explicitly clears a value; it
/// serializes as the null value of the attribute's declared type.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    UniqueId(u128),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Real(_) => Some(DataType::Real),
            Value::String(_) => Some(DataType::String),
            Value::UniqueId(_) => Some(DataType::UniqueId),
        }
    }
    pub fn type_name(&self) -> &'static str {
        self.data_type().map(|t| t.name()).unwrap_or("NULL")
    }
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    /// Null as far as references go: an empty string or the zero identifier
    /// never points at anything.
    pub fn is_null_reference(&self) -> bool {
        match self {
            Value::Null => true,
            Value::UniqueId(id) => *id == 0,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_unique_id(&self) -> Option<u128> {
        match self {
            Value::UniqueId(id) => Some(*id),
            _ => None,
        }
    }

    /// Converts the value to the given type where this can be done without
    /// loss, e.g. integers are accepted by real and unique-id attributes.
    pub fn coerce(self, data_type: DataType) -> Option<Value> {
        match (self, data_type) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Boolean(b), DataType::Boolean) => Some(Value::Boolean(b)),
            (Value::Integer(i), DataType::Integer) => Some(Value::Integer(i)),
            (Value::Integer(i), DataType::Real) => Some(Value::Real(i as f64)),
            (Value::Integer(i), DataType::UniqueId) => u128::try_from(i).ok().map(Value::UniqueId),
            // NaN and infinities have no literal form
            (Value::Real(r), DataType::Real) if r.is_finite() => Some(Value::Real(r)),
            (Value::String(s), DataType::String) => Some(Value::String(s)),
            (Value::UniqueId(id), DataType::UniqueId) => Some(Value::UniqueId(id)),
            (Value::UniqueId(id), DataType::Integer) => i64::try_from(id).ok().map(Value::Integer),
            _ => None,
        }
    }

    /// Reads the text of a literal as a value of the given type. Returns
    /// `None` when the literal cannot represent such a value.
    pub fn deserialize(data_type: DataType, text: &str) -> Option<Value> {
        let text = text.trim();
        match data_type {
            DataType::Boolean => {
                if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                    text.parse::<u64>().ok().map(|n| Value::Boolean(n != 0))
                } else if text.eq_ignore_ascii_case("TRUE") {
                    Some(Value::Boolean(true))
                } else if text.eq_ignore_ascii_case("FALSE") {
                    Some(Value::Boolean(false))
                } else {
                    None
                }
            }
            DataType::Integer => match unquote_identifier(text) {
                Some(inner) => parse_unique_id(inner)
                    .and_then(|id| i64::try_from(id).ok())
                    .map(Value::Integer),
                None => text.parse::<i64>().ok().map(Value::Integer),
            },
            DataType::Real => text
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite())
                .map(Value::Real),
            DataType::String => {
                let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
                Some(Value::String(inner.replace("''", "'")))
            }
            DataType::UniqueId => match unquote_identifier(text) {
                Some(inner) => parse_unique_id(inner).map(Value::UniqueId),
                None => text.parse::<u128>().ok().map(Value::UniqueId),
            },
        }
    }

    /// Renders the value as a literal of the given type. Nulls and values of
    /// another type that cannot be coerced render as the type's null value.
    pub fn serialize(&self, data_type: DataType) -> String {
        let value = self
            .clone()
            .coerce(data_type)
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| data_type.null_value());
        match value {
            Value::Boolean(b) => format!("{}", b as u8),
            Value::Integer(i) => format!("{i}"),
            Value::Real(r) => format!("{r:.6}"),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::UniqueId(id) => format!("\"{}\"", Uuid::from_u128(id)),
            Value::Null => String::new(),
        }
    }

    /// Total order used when sorting query results; nulls sort first and
    /// values of different types sort by type.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Real(b)) => (*a as f64).total_cmp(b),
            (Value::Real(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::UniqueId(a), Value::UniqueId(b)) => a.cmp(b),
            (a, b) => a.data_type().cmp(&b.data_type()),
        }
    }
}

fn unquote_identifier(text: &str) -> Option<&str> {
    text.strip_prefix('"')?.strip_suffix('"')
}

fn parse_unique_id(text: &str) -> Option<u128> {
    Uuid::parse_str(text)
        .map(|uuid| uuid.as_u128())
        .ok()
        .or_else(|| text.parse::<u128>().ok())
}

// reals compare by bit pattern so that values can key hash maps
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::UniqueId(a), Value::UniqueId(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => (),
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Real(r) => r.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::UniqueId(id) => id.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::UniqueId(id) => write!(f, "\"{}\"", Uuid::from_u128(*id)),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}
impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<Uuid> for Value {
    fn from(uuid: Uuid) -> Self {
        Value::UniqueId(uuid.as_u128())
    }
}
