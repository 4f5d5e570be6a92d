//! Parsing of model source text into [`Statement`]s.
//!
//! The grammar lives in `grammar.pest`. Parsing is all-or-nothing: a
//! malformed chunk yields a single [`ModelError::Parse`] and no statements.

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::construct::{AssociationEnd, Cardinality, RelId};
use crate::datatype::DataType;
use crate::error::{ModelError, Result};

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct SqlParser;

// ------------- Statement -------------
/// A literal as written, together with the type its lexical shape suggests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub text: String,
    pub shape: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceValues {
    Positional(Vec<Literal>),
    Named(Vec<(String, Literal)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateClass {
        kind: String,
        attributes: Vec<(String, DataType)>,
    },
    CreateAssociation {
        rel_id: RelId,
        source: AssociationEnd,
        target: AssociationEnd,
    },
    CreateUniqueIndex {
        name: String,
        kind: String,
        attributes: Vec<String>,
    },
    CreateInstance {
        kind: String,
        values: InstanceValues,
    },
}

/// A statement and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub file: String,
    pub line: usize,
    pub statement: Statement,
}

// ------------- Parsing -------------
pub fn parse(text: &str, file: &str) -> Result<Vec<Located>> {
    let mut pairs = SqlParser::parse(Rule::file, text).map_err(|e| {
        let line = match e.line_col {
            LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
        };
        ModelError::Parse {
            message: e.variant.message().to_string(),
            file: file.to_string(),
            line,
        }
    })?;
    let mut statements = Vec::new();
    let Some(root) = pairs.next() else {
        return Ok(statements);
    };
    for pair in root.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        let line = pair.as_span().start_pos().line_col().0;
        let fail = |message: String| ModelError::Parse {
            message,
            file: file.to_string(),
            line,
        };
        let statement = match pair.as_rule() {
            Rule::create_table => create_table(pair).map_err(fail)?,
            Rule::create_rop => create_rop(pair).map_err(fail)?,
            Rule::create_index => create_index(pair),
            Rule::insert => insert(pair).map_err(fail)?,
            rule => return Err(fail(format!("unexpected {rule:?}"))),
        };
        statements.push(Located {
            file: file.to_string(),
            line,
            statement,
        });
    }
    Ok(statements)
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_create
            | Rule::kw_table
            | Rule::kw_insert
            | Rule::kw_into
            | Rule::kw_values
            | Rule::kw_rop
            | Rule::kw_ref_id
            | Rule::kw_from
            | Rule::kw_to
            | Rule::kw_phrase
            | Rule::kw_unique
            | Rule::kw_index
            | Rule::kw_on
    )
}

// inner pairs with the keywords left out
fn parts(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn names(pair: Pair<'_, Rule>) -> Vec<String> {
    pair.into_inner().map(|p| p.as_str().to_string()).collect()
}

fn unquote(text: &str) -> String {
    text[1..text.len() - 1].replace("''", "'")
}

fn create_table(pair: Pair<'_, Rule>) -> std::result::Result<Statement, String> {
    let mut parts = parts(pair);
    let kind = parts.next().map(|p| p.as_str().to_string()).unwrap_or_default();
    let mut attributes = Vec::new();
    for column in parts {
        let mut inner = column.into_inner();
        let (Some(name), Some(type_name)) = (inner.next(), inner.next()) else {
            continue;
        };
        let data_type = type_name
            .as_str()
            .parse::<DataType>()
            .map_err(|e| format!("{e} for {kind}.{}", name.as_str()))?;
        attributes.push((name.as_str().to_string(), data_type));
    }
    Ok(Statement::CreateClass { kind, attributes })
}

fn association_end(pair: Pair<'_, Rule>) -> std::result::Result<AssociationEnd, String> {
    let mut cardinality = Cardinality::ONE;
    let mut kind = "";
    let mut keys = Vec::new();
    let mut phrase = String::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::cardinality => cardinality = part.as_str().parse()?,
            Rule::identifier => kind = part.as_str(),
            Rule::name_list => keys = names(part),
            Rule::phrase => {
                phrase = parts(part)
                    .next()
                    .map(|s| unquote(s.as_str()))
                    .unwrap_or_default()
            }
            _ => (),
        }
    }
    Ok(AssociationEnd::new(kind, keys, cardinality).phrase(&phrase))
}

fn create_rop(pair: Pair<'_, Rule>) -> std::result::Result<Statement, String> {
    let mut rel_id = None;
    let mut ends = Vec::new();
    for part in parts(pair) {
        match part.as_rule() {
            Rule::rel_id => rel_id = Some(part.as_str().parse::<RelId>()?),
            Rule::rop_end => ends.push(association_end(part)?),
            _ => (),
        }
    }
    let mut ends = ends.into_iter();
    match (rel_id, ends.next(), ends.next()) {
        (Some(rel_id), Some(source), Some(target)) => Ok(Statement::CreateAssociation {
            rel_id,
            source,
            target,
        }),
        _ => Err("incomplete association".to_string()),
    }
}

fn create_index(pair: Pair<'_, Rule>) -> Statement {
    let mut name = String::new();
    let mut kind = String::new();
    let mut attributes = Vec::new();
    for part in parts(pair) {
        match part.as_rule() {
            Rule::identifier if name.is_empty() => name = part.as_str().to_string(),
            Rule::identifier => kind = part.as_str().to_string(),
            Rule::name_list => attributes = names(part),
            _ => (),
        }
    }
    Statement::CreateUniqueIndex {
        name,
        kind,
        attributes,
    }
}

fn literal(pair: Pair<'_, Rule>) -> Literal {
    let shape = match pair.as_rule() {
        Rule::boolean => DataType::Boolean,
        Rule::real => DataType::Real,
        Rule::integer => DataType::Integer,
        Rule::string => DataType::String,
        _ => DataType::UniqueId,
    };
    Literal {
        text: pair.as_str().to_string(),
        shape,
    }
}

fn insert(pair: Pair<'_, Rule>) -> std::result::Result<Statement, String> {
    let mut kind = String::new();
    let mut columns: Option<Vec<String>> = None;
    let mut values = Vec::new();
    for part in parts(pair) {
        match part.as_rule() {
            Rule::identifier => kind = part.as_str().to_string(),
            Rule::name_list => columns = Some(names(part)),
            Rule::value_list => values = part.into_inner().map(literal).collect(),
            _ => (),
        }
    }
    let values = match columns {
        None => InstanceValues::Positional(values),
        Some(columns) if columns.len() == values.len() => {
            InstanceValues::Named(columns.into_iter().zip(values).collect())
        }
        Some(columns) => {
            return Err(format!(
                "{} names but {} values in insert into {kind}",
                columns.len(),
                values.len()
            ));
        }
    };
    Ok(Statement::CreateInstance { kind, values })
}
