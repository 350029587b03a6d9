// Analysis Runner - Analyze one finished relay simulation
//
// Usage:
//   cargo run --release --bin analysis_runner -- /data/simulations/run-01
//   cargo run --release --bin analysis_runner -- /data/simulations/run-01 --config analysis.yaml
//   cargo run --release --bin analysis_runner -- /data/simulations/run-01 --verbose --no-export

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser;
use log::{error, info, LevelFilter};
use ra_rust::{AnalysisConfig, AnalysisRunner};
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "analysis_runner")]
#[command(about = "Delivery, latency and resource analysis of a relay simulation")]
struct Cli {
    /// Simulation output directory
    simulation_path: PathBuf,

    /// Analyzer configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug level logging
    #[arg(short, long)]
    verbose: bool,

    /// Do not write the summary file
    #[arg(long)]
    no_export: bool,
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AnalysisConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Failed to load {}: {}", path.display(), e);
            process::exit(1);
        }),
        None => AnalysisConfig::default(),
    };

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        config.level_filter()
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {}", e);
    }

    if !cli.simulation_path.is_dir() {
        error!("Simulation path does not exist: {}", cli.simulation_path.display());
        process::exit(1);
    }

    let start = Instant::now();
    let runner = AnalysisRunner::new(&cli.simulation_path, config);
    let result = if cli.no_export {
        runner.run()
    } else {
        runner.run_and_export()
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("Analysis failed: {}", e);
            process::exit(1);
        }
    };

    summary.print_summary();

    info!("Analysis took {:.3?}", start.elapsed());
    println!("\n✓ Analysis complete!\n");
}
