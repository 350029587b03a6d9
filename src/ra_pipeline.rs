// Analysis Runner
//
// One complete pass over a finished simulation directory:
// load inputs, ingest container logs, compute delivery and latency,
// correlate resource metrics, build the summary.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::ra_config::AnalysisConfig;
use crate::ra_delivery::{
    compute_delivery_rate, compute_injection_times, compute_latencies, compute_propagation_times,
};
use crate::ra_error::Result;
use crate::ra_ingest::ingest_containers;
use crate::ra_inputs::{load_ledger, load_run_config, load_topology};
use crate::ra_metrics::load_process_metrics;
use crate::ra_store::EventStore;
use crate::ra_summary::{RunSummary, SummaryInputs};

pub struct AnalysisRunner {
    simulation: PathBuf,
    config: AnalysisConfig,
}

impl AnalysisRunner {
    pub fn new(simulation: impl Into<PathBuf>, config: AnalysisConfig) -> Self {
        Self {
            simulation: simulation.into(),
            config,
        }
    }

    fn input(&self, name: &str) -> PathBuf {
        self.simulation.join(name)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.input(&self.config.files.summary)
    }

    /// Analyze the simulation; every fatal error ends the run
    pub fn run(&self) -> Result<RunSummary> {
        let files = &self.config.files;
        info!("Analyzing simulation in {}", self.simulation.display());

        // all inputs up front so a missing file fails before any log is read
        let topology = load_topology(&self.input(&files.topology))?;
        let ledger = load_ledger(&self.input(&files.ledger))?;
        let parameters = load_run_config(&self.input(&files.run_config))?;
        let metrics = load_process_metrics(&self.input(&files.metrics))?;

        let containers: Vec<String> = topology.containers.keys().cloned().collect();
        let mut outcome = ingest_containers(
            &self.simulation,
            &containers,
            EventStore::from_topology(&topology),
            &self.config,
        )?;

        match (outcome.window.min(), outcome.window.max()) {
            (Some(min), Some(max)) => info!(
                "Simulation window {} .. {} ({:.3} ms)",
                min,
                max,
                outcome.window.duration_ms()
            ),
            _ => info!("No relay events found, simulation window is empty"),
        }

        for (node_id, (published, received)) in outcome.store.node_activity() {
            debug!("{}: {} published, {} received", node_id, published, received);
        }

        let delivery = compute_delivery_rate(
            &outcome.store.messages,
            &ledger,
            self.config.delivery_denominator,
        );
        let latency = compute_latencies(&mut outcome.store.messages, self.config.negative_latencies);
        let propagation = compute_propagation_times(&outcome.store.messages);
        let injection_times = compute_injection_times(&ledger, self.config.delivery_denominator);

        Ok(RunSummary::build(SummaryInputs {
            store: &outcome.store,
            window: outcome.window,
            ingest: outcome.diagnostics,
            latency,
            delivery,
            propagation: &propagation,
            injection_times: &injection_times,
            metrics: &metrics,
            parameters,
        }))
    }

    /// Run and write the summary next to the inputs
    pub fn run_and_export(&self) -> Result<RunSummary> {
        let summary = self.run()?;
        summary.export(&self.summary_path())?;
        Ok(summary)
    }
}

/// Convenience wrapper for a single analysis
pub fn analyze(simulation: &Path, config: &AnalysisConfig) -> Result<RunSummary> {
    AnalysisRunner::new(simulation, config.clone()).run()
}
