//! Error taxonomy for the analysis engine
//!
//! Record-level variants (a single line, process or sample) are logged and
//! counted by the caller, which then carries on. Run-level variants make the
//! whole run's data ambiguous and are propagated to the binary.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A relay line is missing a required field
    #[error("malformed relay line: missing or invalid `{field}` in: {line}")]
    MalformedEvent { field: &'static str, line: String },

    /// No injected messages to compare against
    #[error("injected message ledger is empty, delivery rate is undefined")]
    EmptyDenominator,

    /// A sample refers to a pid that was not resolved to a node
    #[error("no node id for pid {pid} in container {container}")]
    UnresolvedProcessId { container: String, pid: u32 },

    /// A process binary does not follow the node naming convention
    #[error("could not match {binary} to a node id in container {container}")]
    UnmatchedBinary { container: String, binary: String },

    /// More than one log directory matches a container
    #[error("multiple log directories for container {container}: {candidates:?}")]
    AmbiguousContainerMatch {
        container: String,
        candidates: Vec<PathBuf>,
    },

    /// No log directory matches a container
    #[error("no log directory found for container {container}")]
    MissingContainerLog { container: String },

    #[error("input file not found: {}", path.display())]
    MissingInputFile { path: PathBuf },

    #[error("metrics header declares {declared} containers but capture holds {found}")]
    MetricsHeaderMismatch { declared: usize, found: usize },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("YAML error in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl AnalysisError {
    /// Wrap an IO error, mapping "not found" to `MissingInputFile`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            AnalysisError::MissingInputFile { path }
        } else {
            AnalysisError::Io { path, source }
        }
    }

    /// Whether the error only affects a single record
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::MalformedEvent { .. }
                | AnalysisError::EmptyDenominator
                | AnalysisError::UnresolvedProcessId { .. }
                | AnalysisError::UnmatchedBinary { .. }
        )
    }
}
