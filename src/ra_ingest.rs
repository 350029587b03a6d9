//! Log ingestion pass
//!
//! Streams every container's node log through the relay parser, filling an
//! [`EventStore`] and a [`SimulationWindow`]. Containers are independent, so
//! they can be read concurrently: each worker fills its own partial store and
//! window, and the partials are merged in container order afterwards. The
//! merged result is identical to a sequential pass.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::ra_config::{AnalysisConfig, MalformedLinePolicy};
use crate::ra_error::{AnalysisError, Result};
use crate::ra_event::RelayLineParser;
use crate::ra_interface::RelayDirection;
use crate::ra_store::EventStore;
use crate::ra_window::SimulationWindow;

/// Line level counters for one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestDiagnostics {
    pub containers: usize,
    pub lines_read: usize,
    pub published_events: usize,
    pub received_events: usize,
    pub malformed_lines: usize,
}

impl IngestDiagnostics {
    pub fn merge(&mut self, other: &IngestDiagnostics) {
        self.containers += other.containers;
        self.lines_read += other.lines_read;
        self.published_events += other.published_events;
        self.received_events += other.received_events;
        self.malformed_lines += other.malformed_lines;
    }

    pub fn relay_events(&self) -> usize {
        self.published_events + self.received_events
    }
}

/// Everything one ingestion pass produces
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub store: EventStore,
    pub window: SimulationWindow,
    pub diagnostics: IngestDiagnostics,
}

// ============================================================================
// Line Streaming
// ============================================================================

/// Feed every line of `reader` into the store and window
///
/// `source` only names the stream in log messages.
pub fn ingest_lines<R: BufRead>(
    reader: R,
    source: &str,
    parser: &RelayLineParser,
    policy: MalformedLinePolicy,
    store: &mut EventStore,
    window: &mut SimulationWindow,
    diagnostics: &mut IngestDiagnostics,
) -> Result<()> {
    for (index, raw) in reader.split(b'\n').enumerate() {
        let raw = raw.map_err(|e| AnalysisError::io(source, e))?;
        let line = String::from_utf8_lossy(&raw);
        diagnostics.lines_read += 1;

        let event = match parser.parse(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(err) => match policy {
                MalformedLinePolicy::Abort => return Err(err),
                MalformedLinePolicy::Skip => {
                    warn!("{}:{}: {}", source, index + 1, err);
                    diagnostics.malformed_lines += 1;
                    continue;
                }
            },
        };

        match event.direction {
            RelayDirection::Publish => diagnostics.published_events += 1,
            RelayDirection::Receive => diagnostics.received_events += 1,
        }
        window.observe(event.timestamp);
        store.record(&event);
    }

    Ok(())
}

// ============================================================================
// Container Logs
// ============================================================================

/// Locate `<simulation>/<container>--*/<log_file>`
///
/// Exactly one directory must match the container's prefix.
pub fn find_container_log(simulation: &Path, container: &str, log_file: &str) -> Result<PathBuf> {
    let prefix = format!("{}--", container);
    let entries = fs::read_dir(simulation).map_err(|e| AnalysisError::io(simulation, e))?;

    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(AnalysisError::MissingContainerLog {
            container: container.to_string(),
        }),
        1 => Ok(candidates.remove(0).join(log_file)),
        _ => Err(AnalysisError::AmbiguousContainerMatch {
            container: container.to_string(),
            candidates,
        }),
    }
}

fn ingest_container(
    container: &str,
    log_path: &Path,
    parser: &RelayLineParser,
    policy: MalformedLinePolicy,
    store: &mut EventStore,
    window: &mut SimulationWindow,
    diagnostics: &mut IngestDiagnostics,
) -> Result<()> {
    let file = File::open(log_path).map_err(|e| AnalysisError::io(log_path, e))?;
    let before = diagnostics.relay_events();

    ingest_lines(
        BufReader::new(file),
        &log_path.display().to_string(),
        parser,
        policy,
        store,
        window,
        diagnostics,
    )?;
    diagnostics.containers += 1;

    info!(
        "Parsed log of container {}: {} relay events",
        container,
        diagnostics.relay_events() - before
    );
    Ok(())
}

/// Ingest every container of the topology
///
/// `base` must already hold the node table; it receives the merged result.
/// All log paths are resolved before any log is read, so an ambiguous or
/// missing container fails the run up front.
pub fn ingest_containers(
    simulation: &Path,
    containers: &[String],
    base: EventStore,
    config: &AnalysisConfig,
) -> Result<IngestOutcome> {
    let parser = RelayLineParser::new(config.relay_marker.as_str());
    let policy = config.malformed_lines;

    let logs = containers
        .iter()
        .map(|name| {
            find_container_log(simulation, name, &config.files.container_log)
                .map(|path| (name.as_str(), path))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut outcome = IngestOutcome {
        store: base,
        window: SimulationWindow::new(),
        diagnostics: IngestDiagnostics::default(),
    };

    if config.parallel_ingest && logs.len() > 1 {
        debug!("Ingesting {} containers in parallel", logs.len());
        let template = outcome.store.partition();

        let partials = logs
            .par_iter()
            .map(|(name, path)| -> Result<(EventStore, SimulationWindow, IngestDiagnostics)> {
                let mut store = template.partition();
                let mut window = SimulationWindow::new();
                let mut diagnostics = IngestDiagnostics::default();
                ingest_container(
                    name,
                    path,
                    &parser,
                    policy,
                    &mut store,
                    &mut window,
                    &mut diagnostics,
                )?;
                Ok((store, window, diagnostics))
            })
            .collect::<Result<Vec<_>>>()?;

        for (store, window, diagnostics) in partials {
            outcome.store.merge(store);
            outcome.window.merge(&window);
            outcome.diagnostics.merge(&diagnostics);
        }
    } else {
        for (name, path) in &logs {
            ingest_container(
                name,
                path,
                &parser,
                policy,
                &mut outcome.store,
                &mut outcome.window,
                &mut outcome.diagnostics,
            )?;
        }
    }

    if outcome.diagnostics.malformed_lines > 0 {
        warn!(
            "Skipped {} malformed relay lines",
            outcome.diagnostics.malformed_lines
        );
    }
    Ok(outcome)
}
