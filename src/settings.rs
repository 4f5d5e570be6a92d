// Layered configuration: built-in defaults, then an optional xtmodel.json
// (or the file given on the command line), then XTMODEL_* environment variables.
use std::path::Path;

use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;

use crate::construct::{IdGenerator, IntegerGenerator, UuidGenerator};
use crate::error::{ModelError, Result};

pub const DEFAULT_INPUT_PATTERN: &str = r"(?i)\.sql$";
pub const DEFAULT_LOG_FILTER: &str = "xtmodel=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// How unique-id attributes of new instances get their values.
    pub id_generator: IdStrategy,
    /// File names a directory scan picks up.
    pub input_pattern: String,
    /// Turns lenient insert mismatches into parse errors.
    pub strict_arity: bool,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id_generator: IdStrategy::Uuid,
            input_pattern: DEFAULT_INPUT_PATTERN.to_string(),
            strict_arity: false,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = Config::builder()
            .set_default("id_generator", "uuid")?
            .set_default("input_pattern", DEFAULT_INPUT_PATTERN)?
            .set_default("strict_arity", false)?
            .set_default("log_filter", DEFAULT_LOG_FILTER)?;
        let builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("xtmodel").required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("XTMODEL").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.input_pattern()?;
        Ok(settings)
    }
    pub fn id_generator(&self) -> Box<dyn IdGenerator> {
        match self.id_generator {
            IdStrategy::Uuid => Box::new(UuidGenerator),
            IdStrategy::Integer => Box::new(IntegerGenerator::new()),
        }
    }
    pub fn input_pattern(&self) -> Result<Regex> {
        Regex::new(&self.input_pattern)
            .map_err(|e| ModelError::Config(format!("input_pattern: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_overrides_defaults() {
        let file = settings_file(r#"{ "id_generator": "integer", "strict_arity": true }"#);
        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.id_generator, IdStrategy::Integer);
        assert!(settings.strict_arity);
        assert_eq!(settings.input_pattern, DEFAULT_INPUT_PATTERN);
        assert_eq!(settings.id_generator().generate(), 1);
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let file = settings_file(r#"{ "input_pattern": "([" }"#);
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(ModelError::Config(_))
        ));
    }

    #[test]
    fn default_pattern_matches_sql_files() {
        let pattern = Settings::default().input_pattern().unwrap();
        assert!(pattern.is_match("model.SQL"));
        assert!(!pattern.is_match("model.sql.bak"));
    }
}
