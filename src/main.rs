//! `xtmodel` loads model files, checks their consistency and optionally
//! writes the loaded model back out.
//!
//! Exit status is 0 for a consistent model, 1 when violations were found and
//! 2 when the model or the configuration could not be loaded.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xtmodel::check::{self, Violation};
use xtmodel::construct::RelId;
use xtmodel::error::{ModelError, Result};
use xtmodel::loader::ModelLoader;
use xtmodel::persist;
use xtmodel::settings::Settings;

/// Check xtUML SQL model files for consistency
#[derive(Parser, Debug)]
#[command(name = "xtmodel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Model files or directories to load
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Only check the integrity of this association (e.g. R12)
    #[arg(short = 'r', visible_short_alias = 'R', long = "rel-id")]
    rel_ids: Vec<RelId>,

    /// Only check the uniqueness constraints of this kind
    #[arg(short = 'k', long = "kind")]
    kinds: Vec<String>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file (defaults to ./xtmodel.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the loaded model back out to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print violations as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new(&settings.log_filter),
        1 => EnvFilter::new("xtmodel=debug"),
        _ => EnvFilter::new("xtmodel=trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli, &settings) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli, settings: &Settings) -> Result<usize> {
    let mut loader = ModelLoader::with_settings(settings)?;
    for input in &cli.inputs {
        loader.filename_input(input)?;
    }
    let model = loader.build_model()?;
    info!(
        "loaded {} instances of {} classes",
        model.len(),
        model.classes().len()
    );

    let mut violations: Vec<Violation> = Vec::new();
    if cli.rel_ids.is_empty() {
        violations.extend(check::check_association_integrity(&model, None));
    } else {
        for rel_id in &cli.rel_ids {
            violations.extend(check::check_association_integrity(&model, Some(*rel_id)));
        }
    }
    if cli.kinds.is_empty() {
        violations.extend(check::check_uniqueness_constraint(&model, None));
    } else {
        for kind in &cli.kinds {
            violations.extend(check::check_uniqueness_constraint(&model, Some(kind)));
        }
    }

    if let Some(output) = &cli.output {
        persist::persist_database(&model, output)?;
    }
    if cli.json {
        let json = serde_json::to_string_pretty(&violations)
            .map_err(|e| ModelError::Io(e.to_string()))?;
        println!("{json}");
    } else {
        for violation in &violations {
            println!("{violation}");
        }
        println!("{} violations", violations.len());
    }
    Ok(violations.len())
}
