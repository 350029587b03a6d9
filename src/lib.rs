//! # raRust - Relay Simulation Analysis
//!
//! Offline analysis of a finished pub/sub relay simulation. The library reads
//! the per-container node logs, the injected message ledger and the process
//! metrics capture, and reduces them to one run summary: delivery rate,
//! per-message latency and propagation time, and per-node resource peaks.
//!
//! ## Core Components
//!
//! - **RelayLineParser**: turns a node log line into a typed `RelayEvent`
//! - **EventStore**: node and message tables filled by the ingestion pass
//! - **SimulationWindow**: earliest and latest relay timestamp
//! - **Delivery/Latency**: delivery rate, latencies and propagation times
//! - **Metrics**: per-process samples folded into per-node resource summaries
//! - **RunSummary**: the record written to `summary.json`
//!
//! ## Usage
//!
//! ```no_run
//! use ra_rust::{AnalysisConfig, AnalysisRunner};
//!
//! let runner = AnalysisRunner::new("/data/simulation", AnalysisConfig::default());
//! match runner.run_and_export() {
//!     Ok(summary) => summary.print_summary(),
//!     Err(e) => eprintln!("analysis failed: {}", e),
//! }
//! ```
//!
//! The `analysis_runner` binary in `analyzer/` wraps the same runner with a
//! command line.

// Shared types and errors
pub mod ra_error;
pub mod ra_interface;

// Ingestion
pub mod ra_event;
pub mod ra_ingest;
pub mod ra_inputs;
pub mod ra_store;
pub mod ra_window;

// Computation
pub mod ra_delivery;
pub mod ra_metrics;
pub mod ra_summary;

// Configuration and orchestration
pub mod ra_config;
pub mod ra_pipeline;

// Re-export commonly used types
pub use ra_config::{AnalysisConfig, DeliveryDenominator, MalformedLinePolicy, NegativeLatencyPolicy};
pub use ra_error::{AnalysisError, Result};
pub use ra_event::RelayLineParser;
pub use ra_interface::{
    MessageHash, MessageRecord, NodeId, NodeRecord, PeerKey, RelayDirection, RelayEvent, Timestamp,
};
pub use ra_pipeline::{analyze, AnalysisRunner};
pub use ra_store::EventStore;
pub use ra_summary::RunSummary;
pub use ra_window::SimulationWindow;
