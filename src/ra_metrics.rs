// Resource Metrics Correlator
//
// The process monitor samples every node process by pid. Samples are tied
// back to logical nodes through the node's configuration file name, which
// appears in the process binary path (`.../node-<N>.toml`).

use std::path::Path;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ra_error::{AnalysisError, Result};
use crate::ra_inputs::load_json;
use crate::ra_interface::{NodeId, BYTES_PER_MB};

static NODE_CONFIG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"node-(\d+)\.toml").unwrap());

// ============================================================================
// Capture Format
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsCapture {
    pub header: MetricsHeader,
    #[serde(default)]
    pub containers: IndexMap<String, ContainerCapture>,
}

/// Capture header; fields besides `num_containers` are passed through
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MetricsHeader {
    pub num_containers: usize,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerCapture {
    #[serde(default)]
    pub info: ContainerProcesses,
    #[serde(default)]
    pub samples: Vec<ProcessSample>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerProcesses {
    #[serde(default)]
    pub processes: Vec<ProcessDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub binary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProcessSample {
    #[serde(rename = "PID")]
    pub pid: u32,
    #[serde(rename = "CPUPercentage", default)]
    pub cpu_percentage: f64,
    #[serde(rename = "MemoryUsageMB", default)]
    pub memory_usage_mb: f64,
    #[serde(rename = "NetStats", default)]
    pub net_stats: NetStats,
    /// Cumulative bytes read
    #[serde(rename = "DiskIORChar", default)]
    pub disk_read_bytes: f64,
    /// Cumulative bytes written
    #[serde(rename = "DiskIOWChar", default)]
    pub disk_write_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NetStats {
    #[serde(default)]
    pub all: NetCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NetCounters {
    #[serde(default)]
    pub total_received: f64,
    #[serde(default)]
    pub total_sent: f64,
}

// ============================================================================
// Correlation
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsDiagnostics {
    pub unmatched_binaries: usize,
    pub duplicate_processes: usize,
    pub unattributed_samples: usize,
}

/// Samples attributed to one logical node, in capture order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetrics {
    pub samples: Vec<ProcessSample>,
}

/// Correlated capture: header plus per-node samples
#[derive(Debug, Clone, Default)]
pub struct ProcessMetrics {
    pub header: MetricsHeader,
    pub nodes: IndexMap<NodeId, NodeMetrics>,
    pub diagnostics: MetricsDiagnostics,
}

/// Canonical node id from a process binary path
///
/// # Returns
/// `node_<N>` for the first `node-<N>.toml` in the path, `None` otherwise
pub fn extract_node_id(binary: &str) -> Option<NodeId> {
    NODE_CONFIG_RE
        .captures(binary)
        .map(|caps| format!("node_{}", &caps[1]))
}

/// Map each process of a container to its node id
///
/// Processes whose binary does not name a node, repeated pids, and further
/// processes naming a node already mapped are dropped with a warning.
pub fn build_process_to_node_map(
    container: &str,
    processes: &[ProcessDescriptor],
    diagnostics: &mut MetricsDiagnostics,
) -> HashMap<u32, NodeId> {
    let mut map = HashMap::with_capacity(processes.len());
    let mut assigned: HashSet<NodeId> = HashSet::with_capacity(processes.len());

    for process in processes {
        let Some(node_id) = extract_node_id(&process.binary) else {
            let err = AnalysisError::UnmatchedBinary {
                container: container.to_string(),
                binary: process.binary.clone(),
            };
            warn!("{}", err);
            diagnostics.unmatched_binaries += 1;
            continue;
        };

        if let Some(existing) = map.get(&process.pid) {
            warn!(
                "Duplicate pid {} in container {} (already {}), dropping {}",
                process.pid, container, existing, node_id
            );
            diagnostics.duplicate_processes += 1;
            continue;
        }

        // a wrapper process and the node itself can both name the same config
        if assigned.contains(&node_id) {
            warn!(
                "Pid {} in container {} also maps to {}, dropping it",
                process.pid, container, node_id
            );
            diagnostics.duplicate_processes += 1;
            continue;
        }
        assigned.insert(node_id.clone());
        map.insert(process.pid, node_id);
    }

    map
}

/// Append each sample to the node owning its pid
///
/// # Returns
/// Number of samples attributed to a node
pub fn fold_samples_by_node(
    container: &str,
    samples: &[ProcessSample],
    process_map: &HashMap<u32, NodeId>,
    nodes: &mut IndexMap<NodeId, NodeMetrics>,
    diagnostics: &mut MetricsDiagnostics,
) -> usize {
    let mut attributed = 0;

    for sample in samples {
        let Some(node_id) = process_map.get(&sample.pid) else {
            let err = AnalysisError::UnresolvedProcessId {
                container: container.to_string(),
                pid: sample.pid,
            };
            warn!("{}", err);
            diagnostics.unattributed_samples += 1;
            continue;
        };

        nodes
            .entry(node_id.clone())
            .or_default()
            .samples
            .push(sample.clone());
        attributed += 1;
    }

    attributed
}

/// Check the header and attribute every container's samples
pub fn correlate(capture: MetricsCapture) -> Result<ProcessMetrics> {
    let found = capture.containers.len();
    if capture.header.num_containers != found {
        return Err(AnalysisError::MetricsHeaderMismatch {
            declared: capture.header.num_containers,
            found,
        });
    }

    let mut metrics = ProcessMetrics {
        header: capture.header,
        ..Default::default()
    };

    for (container, data) in &capture.containers {
        let process_map =
            build_process_to_node_map(container, &data.info.processes, &mut metrics.diagnostics);
        fold_samples_by_node(
            container,
            &data.samples,
            &process_map,
            &mut metrics.nodes,
            &mut metrics.diagnostics,
        );
    }

    info!("Loaded metrics for {} nodes.", metrics.nodes.len());
    Ok(metrics)
}

pub fn load_process_metrics(path: &Path) -> Result<ProcessMetrics> {
    let capture: MetricsCapture = load_json(path)?;
    correlate(capture)
}

// ============================================================================
// Summaries
// ============================================================================

/// Peak and cumulative resource usage of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeResourceSummary {
    pub num_samples: usize,
    pub peak_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub rx_mbytes: f64,
    pub tx_mbytes: f64,
    pub disk_read_mbytes: f64,
    pub disk_write_mbytes: f64,
}

fn peak<'a>(samples: &'a [ProcessSample], field: impl Fn(&'a ProcessSample) -> f64) -> f64 {
    samples.iter().map(field).fold(0.0, f64::max)
}

/// Counters only grow, so the largest reading is the total
pub fn summarize_node(metrics: &NodeMetrics) -> NodeResourceSummary {
    let samples = &metrics.samples;
    NodeResourceSummary {
        num_samples: samples.len(),
        peak_cpu_percent: peak(samples, |s| s.cpu_percentage),
        peak_memory_mb: peak(samples, |s| s.memory_usage_mb),
        rx_mbytes: peak(samples, |s| s.net_stats.all.total_received) / BYTES_PER_MB,
        tx_mbytes: peak(samples, |s| s.net_stats.all.total_sent) / BYTES_PER_MB,
        disk_read_mbytes: peak(samples, |s| s.disk_read_bytes) / BYTES_PER_MB,
        disk_write_mbytes: peak(samples, |s| s.disk_write_bytes) / BYTES_PER_MB,
    }
}

pub fn summarize_nodes(nodes: &IndexMap<NodeId, NodeMetrics>) -> IndexMap<NodeId, NodeResourceSummary> {
    nodes
        .iter()
        .map(|(node_id, metrics)| (node_id.clone(), summarize_node(metrics)))
        .collect()
}

/// One value per node per metric, in node order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceAggregate {
    pub max_cpu_usage: Vec<f64>,
    pub max_memory_usage: Vec<f64>,
    pub rx_mbytes: Vec<f64>,
    pub tx_mbytes: Vec<f64>,
    pub disk_read_mbytes: Vec<f64>,
    pub disk_write_mbytes: Vec<f64>,
    /// `None` when no node has samples
    pub avg_samples_per_node: Option<f64>,
}

impl ResourceAggregate {
    pub fn from_summaries(summaries: &IndexMap<NodeId, NodeResourceSummary>) -> Self {
        let mut aggregate = ResourceAggregate::default();
        let mut total_samples = 0;

        for summary in summaries.values() {
            total_samples += summary.num_samples;
            aggregate.max_cpu_usage.push(summary.peak_cpu_percent);
            aggregate.max_memory_usage.push(summary.peak_memory_mb);
            aggregate.rx_mbytes.push(summary.rx_mbytes);
            aggregate.tx_mbytes.push(summary.tx_mbytes);
            aggregate.disk_read_mbytes.push(summary.disk_read_mbytes);
            aggregate.disk_write_mbytes.push(summary.disk_write_mbytes);
        }

        if !summaries.is_empty() {
            aggregate.avg_samples_per_node = Some(total_samples as f64 / summaries.len() as f64);
        }
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32, cpu: f64, mem: f64, bytes: f64) -> ProcessSample {
        ProcessSample {
            pid,
            cpu_percentage: cpu,
            memory_usage_mb: mem,
            net_stats: NetStats {
                all: NetCounters {
                    total_received: bytes,
                    total_sent: bytes,
                },
            },
            disk_read_bytes: bytes,
            disk_write_bytes: bytes,
        }
    }

    fn process(pid: u32, binary: &str) -> ProcessDescriptor {
        ProcessDescriptor {
            pid,
            binary: binary.to_string(),
        }
    }

    #[test]
    fn test_extract_node_id() {
        assert_eq!(extract_node_id("node-123.toml").as_deref(), Some("node_123"));
        assert_eq!(
            extract_node_id("prefix-node-456.toml-suffix").as_deref(),
            Some("node_456")
        );
        assert_eq!(extract_node_id("node.toml"), None);
        assert_eq!(extract_node_id(""), None);
    }

    #[test]
    fn test_build_process_to_node_map() {
        let mut diagnostics = MetricsDiagnostics::default();
        let processes = vec![
            process(1, "/usr/bin/wakunode --config-file=/node/tomls/node-0.toml"),
            process(2, "/usr/bin/wakunode --config-file=/node/tomls/node-1.toml"),
            process(3, "/bin/sh"),
            process(2, "/usr/bin/wakunode --config-file=/node/tomls/node-7.toml"),
        ];

        let map = build_process_to_node_map("cid_0", &processes, &mut diagnostics);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1], "node_0");
        assert_eq!(map[&2], "node_1");
        assert_eq!(diagnostics.unmatched_binaries, 1);
        assert_eq!(diagnostics.duplicate_processes, 1);
    }

    #[test]
    fn test_duplicate_node_id_is_dropped() {
        let mut diagnostics = MetricsDiagnostics::default();
        let processes = vec![
            process(1, "/usr/bin/wakunode --config-file=/node/tomls/node-0.toml"),
            process(2, "sh -c wakunode --config-file=/node/tomls/node-0.toml"),
        ];

        let map = build_process_to_node_map("cid_0", &processes, &mut diagnostics);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&1], "node_0");
        assert!(!map.contains_key(&2));
        assert_eq!(diagnostics.duplicate_processes, 1);

        let mut nodes = IndexMap::new();
        let samples = vec![sample(1, 1.0, 1.0, 0.0), sample(2, 2.0, 2.0, 0.0)];
        let attributed = fold_samples_by_node("cid_0", &samples, &map, &mut nodes, &mut diagnostics);
        assert_eq!(attributed, 1);
        assert_eq!(nodes["node_0"].samples.len(), 1);
        assert_eq!(diagnostics.unattributed_samples, 1);
    }

    #[test]
    fn test_fold_samples_by_node() {
        let mut diagnostics = MetricsDiagnostics::default();
        let mut map = HashMap::new();
        map.insert(1, "node_1".to_string());
        map.insert(2, "node_2".to_string());

        let samples = vec![sample(1, 1.0, 1.0, 0.0), sample(2, 2.0, 2.0, 0.0), sample(1, 3.0, 3.0, 0.0)];
        let mut nodes = IndexMap::new();
        let attributed = fold_samples_by_node("cid_0", &samples, &map, &mut nodes, &mut diagnostics);
        assert_eq!(attributed, 3);
        assert_eq!(nodes["node_1"].samples.len(), 2);
        assert_eq!(nodes["node_2"].samples.len(), 1);

        let attributed = fold_samples_by_node("cid_1", &[sample(3, 0.0, 0.0, 0.0)], &map, &mut nodes, &mut diagnostics);
        assert_eq!(attributed, 0);
        assert_eq!(diagnostics.unattributed_samples, 1);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_summarize_node_single_sample() {
        let metrics = NodeMetrics {
            samples: vec![sample(1, 10.0, 500.0, 2048.0)],
        };
        let summary = summarize_node(&metrics);
        assert_eq!(summary.num_samples, 1);
        assert_eq!(summary.peak_cpu_percent, 10.0);
        assert_eq!(summary.peak_memory_mb, 500.0);
        assert_eq!(summary.rx_mbytes, 0.001953125);
        assert_eq!(summary.tx_mbytes, 0.001953125);
        assert_eq!(summary.disk_read_mbytes, 0.001953125);
        assert_eq!(summary.disk_write_mbytes, 0.001953125);
    }

    #[test]
    fn test_summarize_node_takes_peaks() {
        let metrics = NodeMetrics {
            samples: vec![
                sample(1, 10.0, 500.0, 1_048_576.0),
                sample(1, 80.0, 300.0, 3_145_728.0),
                sample(1, 20.0, 700.0, 2_097_152.0),
            ],
        };
        let summary = summarize_node(&metrics);
        assert_eq!(summary.peak_cpu_percent, 80.0);
        assert_eq!(summary.peak_memory_mb, 700.0);
        assert_eq!(summary.rx_mbytes, 3.0);
    }

    #[test]
    fn test_resource_aggregate() {
        let mut nodes = IndexMap::new();
        nodes.insert("node_0".to_string(), NodeMetrics { samples: vec![sample(1, 10.0, 1.0, 0.0)] });
        nodes.insert(
            "node_1".to_string(),
            NodeMetrics {
                samples: vec![sample(2, 30.0, 2.0, 0.0), sample(2, 40.0, 2.0, 0.0), sample(2, 5.0, 2.0, 0.0)],
            },
        );

        let aggregate = ResourceAggregate::from_summaries(&summarize_nodes(&nodes));
        assert_eq!(aggregate.max_cpu_usage, vec![10.0, 40.0]);
        assert_eq!(aggregate.avg_samples_per_node, Some(2.0));

        let empty = ResourceAggregate::from_summaries(&IndexMap::new());
        assert_eq!(empty.avg_samples_per_node, None);
    }

    #[test]
    fn test_load_process_metrics() {
        let json = r#"{
            "header": { "num_containers": 1, "sampling_interval": 1 },
            "containers": {
                "cid_0": {
                    "info": { "processes": [
                        { "pid": 10, "binary": "/node/tomls/node-3.toml" },
                        { "pid": 11, "binary": "/bin/monitor" }
                    ] },
                    "samples": [
                        { "PID": 10, "CPUPercentage": 10, "MemoryUsageMB": 500,
                          "NetStats": { "all": { "total_received": 2048, "total_sent": 2048 } },
                          "DiskIORChar": 2048, "DiskIOWChar": 2048 },
                        { "PID": 11, "CPUPercentage": 1, "MemoryUsageMB": 5 }
                    ]
                }
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cproc_metrics.json");
        std::fs::write(&path, json).unwrap();

        let metrics = load_process_metrics(&path).unwrap();
        assert_eq!(metrics.header.num_containers, 1);
        assert_eq!(metrics.header.extra["sampling_interval"], 1);
        assert_eq!(metrics.nodes.len(), 1);
        assert_eq!(metrics.nodes["node_3"].samples.len(), 1);
        assert_eq!(metrics.diagnostics.unmatched_binaries, 1);
        assert_eq!(metrics.diagnostics.unattributed_samples, 1);
    }

    #[test]
    fn test_header_mismatch_is_fatal() {
        let capture: MetricsCapture = serde_json::from_str(
            r#"{ "header": { "num_containers": 2 }, "containers": { "cid_0": {} } }"#,
        )
        .unwrap();
        assert!(matches!(
            correlate(capture),
            Err(AnalysisError::MetricsHeaderMismatch { declared: 2, found: 1 })
        ));
    }
}
