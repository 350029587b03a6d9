// Analyzer Configuration
//
// Loaded from an optional YAML file; every field has a default so an empty
// file (or no file) gives the standard analysis.

use std::fs;
use std::path::Path;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::ra_error::{AnalysisError, Result};
use crate::ra_event::DEFAULT_RELAY_MARKER;

// ============================================================================
// Policies
// ============================================================================

/// What to do with a relay line that is missing a required field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Warn, count and carry on with the next line
    #[default]
    Skip,
    /// Stop the whole run
    Abort,
}

/// What to do with a receipt timestamped before its publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativeLatencyPolicy {
    /// Drop it from the latency sequence
    #[default]
    Discard,
    /// Record it as zero
    Clamp,
    /// Keep the negative value
    Retain,
}

/// Which ledger entries count as injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryDenominator {
    /// Entries the node accepted (status 200)
    #[default]
    Successful,
    /// Every ledger entry
    All,
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// error | warn | info | debug | trace
    pub log_level: String,

    pub malformed_lines: MalformedLinePolicy,
    pub negative_latencies: NegativeLatencyPolicy,
    pub delivery_denominator: DeliveryDenominator,

    /// Read containers concurrently and merge afterwards
    pub parallel_ingest: bool,

    /// Marker identifying relay subsystem lines
    pub relay_marker: String,

    /// Input and output file names, relative to the simulation directory
    pub files: FileNames,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FileNames {
    pub topology: String,
    pub ledger: String,
    pub metrics: String,
    pub run_config: String,
    /// Name of the log inside each `<container>--*` directory
    pub container_log: String,
    pub summary: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            malformed_lines: MalformedLinePolicy::default(),
            negative_latencies: NegativeLatencyPolicy::default(),
            delivery_denominator: DeliveryDenominator::default(),
            parallel_ingest: true,
            relay_marker: DEFAULT_RELAY_MARKER.to_string(),
            files: FileNames::default(),
        }
    }
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            topology: "network_data.json".to_string(),
            ledger: "messages.json".to_string(),
            metrics: "cproc_metrics.json".to_string(),
            run_config: "config/config.json".to_string(),
            container_log: "output.log".to_string(),
            summary: "summary.json".to_string(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|source| AnalysisError::Yaml {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Self::from_yaml_str(&yaml, path)
    }

    /// Level for the logger; unknown names fall back to info
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}
