use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sluice::assemble::{check_pipeline, run_pipeline};
use sluice::config::PipelineConfig;

#[derive(Parser)]
#[command(name = "sluice", version, about = "Push-based pipes-and-filters engine for tabular data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a pipeline from a TOML definition and pump its sources
    Run {
        /// Path to the pipeline definition
        pipeline: PathBuf,
    },
    /// Assemble and validate a pipeline without running it
    Check {
        /// Path to the pipeline definition
        pipeline: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sluice=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { pipeline } => {
            let config = PipelineConfig::load(&pipeline)?;
            run_pipeline(&config)?;
            info!("pipeline complete");
        }
        Commands::Check { pipeline } => {
            let config = PipelineConfig::load(&pipeline)?;
            let graph = check_pipeline(&config)?;
            println!(
                "ok: {} vertices, {} edges",
                graph.vertex_names().count(),
                graph.edge_names().count()
            );
        }
    }
    Ok(())
}
