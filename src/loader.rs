//! Loading of model source files into a [`Model`].
//!
//! A [`ModelLoader`] collects statements from any number of inputs and
//! applies them in a fixed order: classes, associations, unique indices and
//! finally rows, so a file may refer to tables defined further down (or in
//! another file). Rows are connected across every association once all of
//! them are loaded.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::construct::{ClassId, Model};
use crate::datatype::{DataType, Value};
use crate::error::{ModelError, Result};
use crate::parse::{self, InstanceValues, Literal, Located, Statement};
use crate::settings::{DEFAULT_INPUT_PATTERN, Settings};

lazy_static! {
    static ref SQL_FILE: Regex = Regex::new(DEFAULT_INPUT_PATTERN).unwrap();
}

#[derive(Debug)]
pub struct ModelLoader {
    statements: Vec<Located>,
    settings: Settings,
    pattern: Regex,
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader {
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
            settings: Settings::default(),
            pattern: SQL_FILE.clone(),
        }
    }
    pub fn with_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            statements: Vec::new(),
            pattern: settings.input_pattern()?,
            settings: settings.clone(),
        })
    }
    pub fn statements(&self) -> &[Located] {
        &self.statements
    }

    // ------------- inputs -------------
    /// Parses `text`; `name` is used in error locations.
    pub fn input(&mut self, text: &str, name: &str) -> Result<()> {
        let statements = parse::parse(text, name)?;
        debug!("{} statements read from {}", statements.len(), name);
        self.statements.extend(statements);
        Ok(())
    }
    pub fn file_input(&mut self, mut reader: impl Read, name: &str) -> Result<()> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| ModelError::Io(format!("{name}: {e}")))?;
        self.input(&text, name)
    }
    /// Reads a file, or every file below a directory whose name matches the
    /// input pattern, in sorted path order.
    pub fn filename_input(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.is_dir() {
            let mut files = Vec::new();
            self.scan(path, &mut files)?;
            files.sort();
            for file in files {
                self.read_file(&file)?;
            }
            Ok(())
        } else {
            self.read_file(path)
        }
    }
    fn scan(&self, directory: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        let entries = fs::read_dir(directory)
            .map_err(|e| ModelError::Io(format!("{}: {}", directory.display(), e)))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                self.scan(&path, files)?;
            } else if path
                .file_name()
                .is_some_and(|name| self.pattern.is_match(&name.to_string_lossy()))
            {
                files.push(path);
            }
        }
        Ok(())
    }
    fn read_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .map_err(|e| ModelError::Io(format!("{}: {}", path.display(), e)))?;
        self.input(&text, &path.display().to_string())
    }

    // ------------- populate -------------
    /// Applies every statement read so far to `model`.
    pub fn populate(&self, model: &mut Model) -> Result<()> {
        for located in &self.statements {
            if let Statement::CreateClass { kind, attributes } = &located.statement {
                model.define_class(kind, attributes.iter().cloned())?;
            }
        }
        for located in &self.statements {
            if let Statement::CreateAssociation {
                rel_id,
                source,
                target,
            } = &located.statement
            {
                model.define_association(*rel_id, source.clone(), target.clone())?;
            }
        }
        for located in &self.statements {
            if let Statement::CreateUniqueIndex {
                name,
                kind,
                attributes,
            } = &located.statement
            {
                model.define_unique_identifier(kind, name, attributes)?;
            }
        }
        let mut rows = 0;
        for located in &self.statements {
            if let Statement::CreateInstance { kind, values } = &located.statement {
                self.insert(model, located, kind, values)?;
                rows += 1;
            }
        }
        model.batch_relate();
        debug!("populated {} classes and {} rows", model.classes().len(), rows);
        Ok(())
    }
    /// A new model, with the configured id generator, holding every
    /// statement read so far.
    pub fn build_model(&self) -> Result<Model> {
        let mut model = Model::with_id_generator(self.settings.id_generator());
        self.populate(&mut model)?;
        Ok(model)
    }

    fn insert(
        &self,
        model: &mut Model,
        located: &Located,
        kind: &str,
        values: &InstanceValues,
    ) -> Result<()> {
        let fail = |message: String| ModelError::Parse {
            message,
            file: located.file.clone(),
            line: located.line,
        };
        let class_id = match model.class_id(kind) {
            Ok(class_id) => class_id,
            Err(_) => synthesize(model, kind, values)?,
        };
        let class = model.class(class_id);
        let count = class.attributes().len();
        let mut row: Vec<Option<Value>> = vec![None; count];
        let mut assign = |slot: usize, literal: &Literal| -> Result<()> {
            let attribute = &class.attributes()[slot];
            let value = Value::deserialize(attribute.data_type(), &literal.text).ok_or_else(|| {
                fail(format!(
                    "cannot read {} as {} for {}.{}",
                    literal.text,
                    attribute.data_type(),
                    class.kind(),
                    attribute.name()
                ))
            })?;
            row[slot] = Some(value);
            Ok(())
        };
        match values {
            InstanceValues::Positional(literals) => {
                if literals.len() != count {
                    let message = format!(
                        "{} values given for {} which has {} attributes",
                        literals.len(),
                        class.kind(),
                        count
                    );
                    if self.settings.strict_arity {
                        return Err(fail(message));
                    }
                    warn!("{}:{}: {}", located.file, located.line, message);
                }
                for (slot, literal) in literals.iter().enumerate().take(count) {
                    assign(slot, literal)?;
                }
            }
            InstanceValues::Named(pairs) => {
                for (name, literal) in pairs {
                    match class.slot(name) {
                        Some(slot) => assign(slot, literal)?,
                        None => {
                            let message = format!("{} has no attribute {}", class.kind(), name);
                            if self.settings.strict_arity {
                                return Err(fail(message));
                            }
                            warn!("{}:{}: {}", located.file, located.line, message);
                        }
                    }
                }
            }
        }
        let defaults: Vec<(DataType, bool)> = class
            .attributes()
            .iter()
            .map(|attribute| (attribute.data_type(), attribute.is_referential()))
            .collect();
        let values = row
            .into_iter()
            .zip(defaults)
            .map(|(value, (data_type, referential))| match value {
                Some(value) => value,
                None if data_type == DataType::UniqueId && !referential => {
                    Value::UniqueId(model.next_id())
                }
                None => data_type.null_value(),
            })
            .collect();
        model.load_instance(class_id, values);
        Ok(())
    }
}

// undeclared kinds get a class shaped after their first row
fn synthesize(model: &mut Model, kind: &str, values: &InstanceValues) -> Result<ClassId> {
    let attributes: Vec<(String, DataType)> = match values {
        InstanceValues::Positional(literals) => literals
            .iter()
            .enumerate()
            .map(|(i, literal)| (format!("_{i}"), literal.shape))
            .collect(),
        InstanceValues::Named(pairs) => pairs
            .iter()
            .map(|(name, literal)| (name.clone(), literal.shape))
            .collect(),
    };
    debug!("synthesizing class {} from its rows", kind);
    model.define_class(kind, attributes)
}

/// Loads every path (files or directories) into a new model.
pub fn load_model<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Model> {
    let mut loader = ModelLoader::new();
    for path in paths {
        loader.filename_input(path)?;
    }
    loader.build_model()
}
