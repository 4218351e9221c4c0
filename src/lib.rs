//! Ingests FPN-style geotechnical model files and synthesizes the
//! multi-point constraints that couple anchor rods to walls and soil.

use std::path::Path;

pub mod config;
pub mod constraints;
pub mod coupling;
pub mod datatypes;
pub mod encoding;
pub mod error;
pub mod head_selector;
pub mod model;
pub mod offset;
pub mod parser;
pub mod post_processor;
pub mod record;
pub mod spatial;
pub mod topology;

pub use config::RunConfig;
pub use coupling::{synthesize, ConstraintDataset, CouplingConfig};
pub use error::{Diagnostics, GeoanchorError, Warning, WarningKind};
pub use model::Model;
pub use parser::{parse, parse_bytes, parse_file, ParseObserver, ParseOptions, ParseProgress};

/// Output of a full pipeline run
#[derive(Debug)]
pub struct RunOutput {
    pub model: Model,
    /// Warnings from parsing, assembly and stage validation
    pub parse_warnings: Vec<Warning>,
    pub dataset: ConstraintDataset,
}

/// Parses `model_path`, validates its stages and synthesizes constraints
///
/// # Arguments
/// * `model_path` - The model source file
/// * `config` - Run configuration
/// * `observer` - Receives parse progress
pub fn run<O>(model_path: &Path, config: &RunConfig, observer: &mut O) -> Result<RunOutput, GeoanchorError>
where
    O: ParseObserver + ?Sized,
{
    let (model, mut diagnostics) = parse_file(model_path, &config.parse, observer)?;
    model.validate_stages(config.stage_policy, &mut diagnostics)?;
    diagnostics.summarize("parse");

    let dataset = synthesize(&model, &config.coupling)?;

    Ok(RunOutput {
        model,
        parse_warnings: diagnostics.into_warnings(),
        dataset,
    })
}
