// Summary Builder
//
// Folds every product of a run into one RunSummary, written once to
// summary.json and optionally printed to the console.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;

use crate::ra_delivery::{
    latencies_ms, DeliveryStats, Distribution, LatencyDiagnostics, PropagationTimes,
};
use crate::ra_error::{AnalysisError, Result};
use crate::ra_ingest::IngestDiagnostics;
use crate::ra_interface::{NodeId, Timestamp, MILLIS_PER_SECOND};
use crate::ra_metrics::{
    summarize_nodes, MetricsDiagnostics, MetricsHeader, NodeResourceSummary, ProcessMetrics,
    ResourceAggregate,
};
use crate::ra_store::{EventStore, StoreDiagnostics};
use crate::ra_window::SimulationWindow;

// ============================================================================
// Summary Record
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub general: GeneralSection,
    pub nodes: IndexMap<NodeId, NodeSummary>,
    pub messages: MessageSection,
    pub diagnostics: RunDiagnostics,
    /// The run's own configuration, untouched
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneralSection {
    pub datetime: String,
    pub num_messages: usize,
    pub num_nodes: usize,
    pub num_topics: usize,
    pub topics: Vec<String>,
    pub simulation_start_ts: Option<Timestamp>,
    pub simulation_end_ts: Option<Timestamp>,
    pub simulation_time_ms: f64,
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSection {
    #[serde(flatten)]
    pub header: MetricsHeader,
    #[serde(flatten)]
    pub resources: ResourceAggregate,
    /// Samples per node per second of simulated time
    pub esr: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeSummary {
    pub container: Option<String>,
    pub published: usize,
    pub received: usize,
    #[serde(flatten)]
    pub resources: Option<NodeResourceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageSection {
    pub delivery: DeliveryStats,
    pub injection_time: Option<Distribution>,
    pub latency_ms: Option<Distribution>,
    pub propagation_ms: Option<Distribution>,
    pub propagation_times: IndexMap<String, Option<f64>>,
}

/// Every recovered anomaly of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunDiagnostics {
    #[serde(flatten)]
    pub ingest: IngestDiagnostics,
    #[serde(flatten)]
    pub store: StoreDiagnostics,
    #[serde(flatten)]
    pub latency: LatencyDiagnostics,
    #[serde(flatten)]
    pub metrics: MetricsDiagnostics,
    pub empty_denominator: bool,
}

// ============================================================================
// Building
// ============================================================================

/// Products of a run the summary is built from
pub struct SummaryInputs<'a> {
    pub store: &'a EventStore,
    pub window: SimulationWindow,
    pub ingest: IngestDiagnostics,
    pub latency: LatencyDiagnostics,
    pub delivery: DeliveryStats,
    pub propagation: &'a PropagationTimes,
    pub injection_times: &'a [f64],
    pub metrics: &'a ProcessMetrics,
    pub parameters: serde_json::Value,
}

/// `None` for an empty window
pub fn effective_sampling_rate(avg_samples_per_node: Option<f64>, duration_ms: f64) -> Option<f64> {
    let avg = avg_samples_per_node?;
    if duration_ms <= 0.0 {
        return None;
    }
    Some(avg / (duration_ms / MILLIS_PER_SECOND))
}

/// Keys of the metrics block computed by the analysis
const COMPUTED_METRIC_KEYS: [&str; 8] = [
    "max_cpu_usage",
    "max_memory_usage",
    "rx_mbytes",
    "tx_mbytes",
    "disk_read_mbytes",
    "disk_write_mbytes",
    "avg_samples_per_node",
    "esr",
];

/// Capture header without the keys the analysis writes itself
fn passthrough_header(header: &MetricsHeader) -> MetricsHeader {
    let mut header = header.clone();
    let shadowed: Vec<&str> = COMPUTED_METRIC_KEYS
        .iter()
        .copied()
        .filter(|key| header.extra.remove(*key).is_some())
        .collect();

    if !shadowed.is_empty() {
        warn!(
            "Metrics header keys replaced by computed values: {}",
            shadowed.join(", ")
        );
    }
    header
}

fn node_summaries(
    store: &EventStore,
    resources: &IndexMap<NodeId, NodeResourceSummary>,
) -> IndexMap<NodeId, NodeSummary> {
    let mut nodes: IndexMap<NodeId, NodeSummary> = store
        .nodes
        .values()
        .map(|node| {
            (
                node.node_id.clone(),
                NodeSummary {
                    container: Some(node.container_name.clone()),
                    published: node.published.len(),
                    received: node.received.len(),
                    resources: resources.get(&node.node_id).copied(),
                },
            )
        })
        .collect();

    // sampled processes the topology did not list
    for (node_id, summary) in resources {
        nodes.entry(node_id.clone()).or_insert_with(|| NodeSummary {
            resources: Some(*summary),
            ..Default::default()
        });
    }
    nodes
}

impl RunSummary {
    pub fn build(inputs: SummaryInputs<'_>) -> Self {
        Self::build_at(inputs, chrono::Local::now().to_rfc3339())
    }

    pub fn build_at(inputs: SummaryInputs<'_>, datetime: String) -> Self {
        let store = inputs.store;
        let duration_ms = inputs.window.duration_ms();

        let resources = summarize_nodes(&inputs.metrics.nodes);
        let aggregate = ResourceAggregate::from_summaries(&resources);
        let esr = effective_sampling_rate(aggregate.avg_samples_per_node, duration_ms);

        let topics: Vec<String> = store.topics.iter().cloned().collect();

        let general = GeneralSection {
            datetime,
            num_messages: store.messages.len(),
            num_nodes: store.nodes.len(),
            num_topics: topics.len(),
            topics,
            simulation_start_ts: inputs.window.min(),
            simulation_end_ts: inputs.window.max(),
            simulation_time_ms: duration_ms,
            metrics: MetricsSection {
                header: passthrough_header(&inputs.metrics.header),
                resources: aggregate,
                esr,
            },
        };

        let messages = MessageSection {
            delivery: inputs.delivery,
            injection_time: Distribution::from_values(inputs.injection_times),
            latency_ms: Distribution::from_values(&latencies_ms(&store.messages)),
            propagation_ms: Distribution::from_values(&inputs.propagation.values()),
            propagation_times: inputs.propagation.per_message.clone(),
        };

        let mut latency = inputs.latency;
        latency.unpropagated_messages = inputs.propagation.unpropagated();

        let diagnostics = RunDiagnostics {
            ingest: inputs.ingest,
            store: store.diagnostics,
            latency,
            metrics: inputs.metrics.diagnostics,
            empty_denominator: inputs.delivery.rate.is_none(),
        };

        RunSummary {
            general,
            nodes: node_summaries(store, &resources),
            messages,
            diagnostics,
            parameters: inputs.parameters,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        Ok(buf)
    }

    /// Write the summary as JSON with four-space indentation
    pub fn export(&self, path: &Path) -> Result<()> {
        let json = self.to_json().map_err(|source| AnalysisError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|e| AnalysisError::io(path, e))?;
        info!("Analysis summary saved in {}", path.display());
        Ok(())
    }

    // ========================================================================
    // Console Report
    // ========================================================================

    pub fn print_summary(&self) {
        let general = &self.general;
        let messages = &self.messages;
        let diag = &self.diagnostics;

        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Relay Simulation Analysis                       ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("═══ Simulation ═══");
        println!("  Analyzed at: {}", general.datetime);
        println!("  Nodes: {}", general.num_nodes);
        println!("  Messages: {}", general.num_messages);
        println!("  Topics ({}): {}", general.num_topics, general.topics.join(", "));
        match (general.simulation_start_ts, general.simulation_end_ts) {
            (Some(start), Some(end)) => {
                println!("  Window: {} .. {}", start, end);
                println!("  Duration: {:.3} ms", general.simulation_time_ms);
            }
            _ => println!("  Window: empty"),
        }
        println!();

        println!("═══ Delivery ═══");
        println!(
            "  Delivered: {} / {} (lost {})",
            messages.delivery.delivered, messages.delivery.total, messages.delivery.lost
        );
        match messages.delivery.rate {
            Some(rate) => println!("  Delivery rate: {:.2}%", rate),
            None => println!("  Delivery rate: undefined (empty ledger)"),
        }
        println!();

        println!("═══ Latency ═══");
        print_distribution("Latency (ms)", messages.latency_ms.as_ref());
        print_distribution("Propagation (ms)", messages.propagation_ms.as_ref());
        print_distribution("Injection time", messages.injection_time.as_ref());
        println!();

        let metrics = &general.metrics;
        println!("═══ Resources ═══");
        println!("  Sampled nodes: {}", metrics.resources.max_cpu_usage.len());
        if let Some(avg) = metrics.resources.avg_samples_per_node {
            println!("  Avg samples/node: {:.1}", avg);
        }
        match metrics.esr {
            Some(esr) => println!("  Effective sampling rate: {:.3} samples/s", esr),
            None => println!("  Effective sampling rate: undefined"),
        }
        if let Some(peak) = metrics.resources.max_cpu_usage.iter().copied().reduce(f64::max) {
            println!("  Peak CPU: {:.1}%", peak);
        }
        if let Some(peak) = metrics.resources.max_memory_usage.iter().copied().reduce(f64::max) {
            println!("  Peak memory: {:.1} MB", peak);
        }
        println!();

        println!("═══ Diagnostics ═══");
        println!(
            "  Lines read: {} ({} relay events, {} malformed)",
            diag.ingest.lines_read,
            diag.ingest.relay_events(),
            diag.ingest.malformed_lines
        );
        println!(
            "  Unknown peer events: {}, key collisions: {}, unlisted nodes: {}",
            diag.store.unknown_peer_events,
            diag.store.peer_key_collisions,
            diag.store.unlisted_topology_nodes
        );
        println!(
            "  Multiple publishers: {}, missing publisher: {}, self receipts: {}",
            diag.latency.multiple_publishers,
            diag.latency.missing_publisher,
            diag.latency.self_receipts
        );
        println!(
            "  Negative latencies: {}, unpropagated: {}",
            diag.latency.negative_latencies, diag.latency.unpropagated_messages
        );
        println!(
            "  Unmatched binaries: {}, duplicate pids: {}, unattributed samples: {}",
            diag.metrics.unmatched_binaries,
            diag.metrics.duplicate_processes,
            diag.metrics.unattributed_samples
        );
    }
}

fn print_distribution(label: &str, dist: Option<&Distribution>) {
    match dist {
        Some(d) => println!(
            "  {}: n={} min={:.3} median={:.3} mean={:.3} p95={:.3} max={:.3}",
            label, d.count, d.min, d.median, d.mean, d.p95, d.max
        ),
        None => println!("  {}: no data", label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ra_delivery::{compute_latencies, compute_propagation_times};
    use crate::ra_config::NegativeLatencyPolicy;
    use crate::ra_metrics::{NodeMetrics, ProcessSample};

    const HASH: &str = "0x12208ff2358cd9e488cd5f2806c9859dbd28768c52b6f52614c3148e45c5c12edadc";

    fn store() -> EventStore {
        let mut store = EventStore::new();
        store.add_node("A", "node_0", "cid_0");
        store.add_node("B", "node_1", "cid_0");
        store.record_publish("A", HASH, 1_000_000, "topic_C", "waku node");
        store.record_receive("B", HASH, 3_000_000, "topic_C", "waku node");
        store
    }

    fn metrics(samples_per_node: usize) -> ProcessMetrics {
        let mut metrics = ProcessMetrics::default();
        metrics.header.num_containers = 1;
        metrics.nodes.insert(
            "node_0".to_string(),
            NodeMetrics {
                samples: vec![ProcessSample { cpu_percentage: 12.0, ..Default::default() }; samples_per_node],
            },
        );
        metrics
    }

    fn delivery() -> DeliveryStats {
        DeliveryStats {
            delivered: 1,
            total: 1,
            lost: 0,
            rate: Some(100.0),
        }
    }

    fn summary_for(store: &mut EventStore, window: SimulationWindow, metrics: &ProcessMetrics) -> RunSummary {
        let latency = compute_latencies(&mut store.messages, NegativeLatencyPolicy::Discard);
        let propagation = compute_propagation_times(&store.messages);
        RunSummary::build_at(
            SummaryInputs {
                store,
                window,
                ingest: IngestDiagnostics::default(),
                latency,
                delivery: delivery(),
                propagation: &propagation,
                injection_times: &[1.0, 2.0],
                metrics,
                parameters: serde_json::json!({ "general": { "backend": "waku" } }),
            },
            "2023-04-18T08:31:28+00:00".to_string(),
        )
    }

    #[test]
    fn test_effective_sampling_rate() {
        assert_eq!(effective_sampling_rate(Some(10.0), 2000.0), Some(5.0));
        assert_eq!(effective_sampling_rate(Some(10.0), 0.0), None);
        assert_eq!(effective_sampling_rate(None, 2000.0), None);
    }

    #[test]
    fn test_build_summary() {
        let mut store = store();
        let metrics = metrics(4);
        let summary = summary_for(&mut store, SimulationWindow::seeded(0, 2_000_000_000), &metrics);

        assert_eq!(summary.general.num_messages, 1);
        assert_eq!(summary.general.num_nodes, 2);
        assert_eq!(summary.general.topics, vec!["topic_C".to_string()]);
        assert_eq!(summary.general.simulation_time_ms, 2000.0);
        assert_eq!(summary.general.metrics.resources.avg_samples_per_node, Some(4.0));
        assert_eq!(summary.general.metrics.esr, Some(2.0));

        assert_eq!(summary.messages.propagation_times[HASH], Some(2.0));
        assert_eq!(summary.messages.latency_ms.unwrap().max, 2.0);

        let node = &summary.nodes["node_0"];
        assert_eq!((node.published, node.received), (1, 0));
        assert_eq!(node.resources.unwrap().peak_cpu_percent, 12.0);
        assert!(summary.nodes["node_1"].resources.is_none());
    }

    #[test]
    fn test_empty_window_has_no_esr() {
        let mut store = EventStore::new();
        let metrics = metrics(2);
        let summary = summary_for(&mut store, SimulationWindow::new(), &metrics);
        assert_eq!(summary.general.simulation_time_ms, 0.0);
        assert_eq!(summary.general.simulation_start_ts, None);
        assert_eq!(summary.general.metrics.esr, None);
    }

    #[test]
    fn test_header_keys_do_not_shadow_computed_metrics() {
        let mut store = store();
        let mut metrics = metrics(1);
        metrics.header.extra.insert("esr".to_string(), serde_json::json!("from-header"));
        metrics.header.extra.insert("max_cpu_usage".to_string(), serde_json::json!(99));
        metrics.header.extra.insert("sampling_interval_ms".to_string(), serde_json::json!(500));

        let summary = summary_for(&mut store, SimulationWindow::seeded(0, 1_000_000), &metrics);
        let json = String::from_utf8(summary.to_json().unwrap()).unwrap();
        assert_eq!(json.matches("\"esr\"").count(), 1);
        assert_eq!(json.matches("\"max_cpu_usage\"").count(), 1);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let block = &value["general"]["metrics"];
        assert_eq!(block["esr"], 1000.0);
        assert_eq!(block["max_cpu_usage"], serde_json::json!([12.0]));
        assert_eq!(block["sampling_interval_ms"], 500);
    }

    #[test]
    fn test_summary_layout() {
        let mut store = store();
        let metrics = metrics(1);
        let summary = summary_for(&mut store, SimulationWindow::seeded(0, 1_000_000), &metrics);
        let value = serde_json::to_value(&summary).unwrap();

        let general = &value["general"];
        assert_eq!(general["num_topics"], 1);
        assert_eq!(general["metrics"]["num_containers"], 1);
        assert_eq!(general["metrics"]["avg_samples_per_node"], 1.0);
        assert!(general["metrics"]["max_cpu_usage"].is_array());
        assert_eq!(value["diagnostics"]["malformed_lines"], 0);
        assert_eq!(value["diagnostics"]["empty_denominator"], false);
        assert_eq!(value["parameters"]["general"]["backend"], "waku");
        assert_eq!(value["nodes"]["node_0"]["num_samples"], 1);
    }

    #[test]
    fn test_export_uses_four_space_indent() {
        let mut store = store();
        let metrics = metrics(1);
        let summary = summary_for(&mut store, SimulationWindow::seeded(0, 1_000_000), &metrics);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        summary.export(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("{\n    \"general\": {\n        \"datetime\""));
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["general"]["num_messages"], 1);
    }
}
