use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use geoanchor::{config, parser::ProgressBarObserver, post_processor, GeoanchorError};

#[derive(Parser)]
#[command(name = "geoanchor")]
#[command(about = "Anchor coupling constraints for geotechnical FPN models", long_about = None)]
#[command(version)]
struct Cli {
    /// Model file (.fpn)
    model: PathBuf,

    /// Run configuration (.json)
    config: PathBuf,

    /// Where to write the constraint dataset
    #[arg(short, long, default_value = "constraints.json")]
    output: PathBuf,

    /// Print the active groups of one stage (by stage id)
    #[arg(long)]
    stage: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn run(cli: &Cli) -> Result<(), GeoanchorError> {
    let config = config::load(&cli.config)?;

    let mut observer = if cli.quiet {
        ProgressBarObserver::hidden()
    } else {
        ProgressBarObserver::new()
    };
    let output = geoanchor::run(&cli.model, &config, &mut observer)?;

    post_processor::write_dataset(&cli.output, &output.model, &output.dataset, &output.parse_warnings)?;

    for stage in output.model.stage_summary() {
        if cli.stage.is_some_and(|id| id != stage.id) {
            continue;
        }
        let line = format!(
            "stage {} '{}': materials {:?}, loads {:?}, boundaries {:?}",
            stage.id, stage.name, stage.active.materials, stage.active.loads, stage.active.boundaries
        );
        match cli.stage {
            Some(_) => println!("{line}"),
            None => log::info!("{line}"),
        }
    }
    if let Some(id) = cli.stage {
        if output.model.stage_position(id).is_none() {
            return Err(GeoanchorError::Input(format!("Model has no stage {id}")));
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
