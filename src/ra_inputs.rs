// Input loaders
//
// Thin serde wrappers for the files a finished run leaves behind: the
// topology, the load generator's ledger, the process metrics capture and
// the run's own configuration. All are JSON.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ra_error::{AnalysisError, Result};
use crate::ra_interface::{MessageHash, NodeId, HTTP_OK};

// ============================================================================
// Topology
// ============================================================================

/// Network layout produced by the network generator
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Topology {
    #[serde(default)]
    pub containers: IndexMap<String, ContainerInfo>,
    #[serde(default)]
    pub nodes: IndexMap<NodeId, TopologyNode>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContainerInfo {
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    #[serde(default, alias = "kurtosisIp")]
    pub kurtosis_ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TopologyNode {
    pub peer_id: String,
    #[serde(default)]
    pub node_config: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

// ============================================================================
// Injected Message Ledger
// ============================================================================

/// One message the load generator believes it injected
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InjectedMessage {
    #[serde(default)]
    pub injection_time: f64,
    #[serde(default)]
    pub payload_size: u64,
    #[serde(default)]
    pub status: Option<u16>,
}

impl InjectedMessage {
    pub fn succeeded(&self) -> bool {
        self.status == Some(HTTP_OK)
    }
}

pub type InjectedLedger = IndexMap<MessageHash, InjectedMessage>;

// ============================================================================
// Loading
// ============================================================================

/// Read and deserialize one JSON file
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
    let value = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
        AnalysisError::Json {
            path: path.to_path_buf(),
            source,
        }
    })?;
    debug!("{} loaded", path.display());
    Ok(value)
}

pub fn load_topology(path: &Path) -> Result<Topology> {
    let topology: Topology = load_json(path)?;
    info!(
        "Loaded topology with {} containers and {} nodes",
        topology.containers.len(),
        topology.nodes.len()
    );
    Ok(topology)
}

pub fn load_ledger(path: &Path) -> Result<InjectedLedger> {
    let ledger: InjectedLedger = load_json(path)?;
    info!("Loaded {} messages.", ledger.len());
    Ok(ledger)
}

/// Run configuration, kept opaque and copied through to the summary
pub fn load_run_config(path: &Path) -> Result<serde_json::Value> {
    load_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_ledger() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "0xaa": {{ "injection_time": 1651372800, "payload_size": 100, "status": 200 }},
                "0xbb": {{ "injection_time": 1651376400, "payload_size": 120, "status": 404 }}
            }}"#
        )
        .unwrap();

        let ledger = load_ledger(file.path()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger["0xaa"].succeeded());
        assert!(!ledger["0xbb"].succeeded());
        assert_eq!(ledger["0xbb"].payload_size, 120);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_ledger(&dir.path().join("messages.json"));
        assert!(matches!(result, Err(AnalysisError::MissingInputFile { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            load_topology(file.path()),
            Err(AnalysisError::Json { .. })
        ));
    }

    #[test]
    fn test_topology_accepts_camel_case_ip() {
        let json = r#"{
            "containers": { "cid_0": { "nodes": ["node_0"], "kurtosisIp": "10.1.0.2" } },
            "nodes": { "node_0": { "peer_id": "16Uiu2HAm" } }
        }"#;
        let topology: Topology = serde_json::from_str(json).unwrap();
        assert_eq!(
            topology.containers["cid_0"].kurtosis_ip.as_deref(),
            Some("10.1.0.2")
        );
        assert!(topology.nodes["node_0"].image.is_none());
    }
}
