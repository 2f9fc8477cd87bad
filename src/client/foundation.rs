//! Foundation node imaging API
//!
//! Foundation runs on a standalone VM next to the bare-metal nodes and has no
//! authentication. An imaging run is started with `image_nodes` and tracked
//! through the `progress` endpoint until every node and cluster is done.

use super::NutanixClient;
use crate::error::Result;
use crate::poll::{Observation, PollTiming, StateChangeConf, StatusMessages};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const IMAGING_PENDING: &[&str] = &["PENDING"];
pub const IMAGING_TARGET: &[&str] = &["COMPLETED"];
pub const IMAGING_FAILED: &str = "FAILED";

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsoDetails {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Per-node imaging request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
    pub hypervisor_hostname: String,
    pub hypervisor_ip: String,
    pub cvm_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi_password: Option<String>,
    pub node_position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvm_gb_ram: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_now: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub nodes: Vec<NodeRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub cluster_name: String,
    pub cluster_members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_external_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redundancy_factor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_init_now: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvm_dns_servers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvm_ntp_servers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Body of `image_nodes`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageNodesInput {
    pub nos_package: String,
    pub cvm_gateway: String,
    pub cvm_netmask: String,
    pub hypervisor_gateway: String,
    pub hypervisor_netmask: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipmi_gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipmi_netmask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipmi_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipmi_password: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hypervisor_iso: BTreeMap<String, IsoDetails>,
    pub blocks: Vec<BlockRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterRequest>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ImageNodesResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProgress {
    #[serde(default)]
    pub cvm_ip: Option<String>,
    #[serde(default)]
    pub hypervisor_ip: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub percent_complete: f64,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterProgress {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub percent_complete: f64,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Body of `progress`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagingProgress {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub abort_session: bool,
    #[serde(default)]
    pub imaging_stopped: bool,
    #[serde(default)]
    pub aggregate_percent_complete: f64,
    #[serde(default)]
    pub nodes: Vec<NodeProgress>,
    #[serde(default)]
    pub clusters: Vec<ClusterProgress>,
    #[serde(default, skip_serializing)]
    pub results: Option<Value>,
}

fn status_failed(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    status.contains("fail") || status.contains("fatal")
}

impl ImagingProgress {
    /// Map the progress document onto the imaging vocabulary
    pub fn state(&self) -> &'static str {
        let any_failed = self.nodes.iter().any(|n| status_failed(&n.status))
            || self.clusters.iter().any(|c| status_failed(&c.status));

        if self.abort_session || any_failed {
            IMAGING_FAILED
        } else if self.aggregate_percent_complete >= 100.0 {
            "COMPLETED"
        } else if self.imaging_stopped {
            // stopped short of 100% without naming a failed item
            IMAGING_FAILED
        } else {
            "PENDING"
        }
    }
}

impl StatusMessages for ImagingProgress {
    fn status_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.abort_session {
            messages.push("imaging session was aborted".to_string());
        }
        for node in self.nodes.iter().filter(|n| status_failed(&n.status)) {
            let node_id = node
                .hypervisor_ip
                .as_deref()
                .or(node.cvm_ip.as_deref())
                .unwrap_or("unknown");
            messages.push(format!(
                "node {} failed at {:.0}%: {} ({})",
                node_id,
                node.percent_complete,
                node.status,
                node.messages.join(" | ")
            ));
        }
        for cluster in self.clusters.iter().filter(|c| status_failed(&c.status)) {
            messages.push(format!(
                "cluster {} failed at {:.0}%: {} ({})",
                cluster.cluster_name.as_deref().unwrap_or("unknown"),
                cluster.percent_complete,
                cluster.status,
                cluster.messages.join(" | ")
            ));
        }
        if messages.is_empty() && self.imaging_stopped {
            messages.push(format!(
                "imaging stopped at {:.0}%",
                self.aggregate_percent_complete
            ));
        }
        messages
    }
}

/// Query imaging progress for the poller
pub async fn foundation_progress_refresh(
    client: &NutanixClient,
    session_id: &str,
) -> Result<Observation<ImagingProgress>> {
    let progress = client.foundation_progress(session_id).await?;
    tracing::debug!(
        "Foundation session {}: {:.0}% complete",
        session_id,
        progress.aggregate_percent_complete
    );
    let state = progress.state();
    Ok(Observation::new(progress, state))
}

impl NutanixClient {
    /// Start imaging, returning the session id
    pub async fn image_nodes(&self, input: &ImageNodesInput) -> Result<ImageNodesResponse> {
        let url = self.foundation_url("image_nodes")?;
        tracing::info!(
            "Starting Foundation imaging of {} block(s)",
            input.blocks.len()
        );
        self.post_anonymous(&url, input).await
    }

    /// Progress of an imaging session
    pub async fn foundation_progress(&self, session_id: &str) -> Result<ImagingProgress> {
        let url = self.foundation_url(&format!(
            "progress?session_id={}",
            urlencoding::encode(session_id)
        ))?;
        self.get_anonymous(&url).await
    }

    /// Wait for an imaging session to complete
    pub async fn wait_for_imaging(&self, session_id: &str, timing: &PollTiming) -> Result<ImagingProgress> {
        StateChangeConf::new(format!("foundation imaging session {}", session_id))
            .pending(IMAGING_PENDING)
            .target(IMAGING_TARGET)
            .timing(timing)
            .wait_for_state(|| foundation_progress_refresh(self, session_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress(value: serde_json::Value) -> ImagingProgress {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_state_pending_then_completed() {
        let running = progress(json!({
            "aggregate_percent_complete": 40.0,
            "nodes": [{"hypervisor_ip": "10.0.0.1", "status": "Installing", "percent_complete": 40}]
        }));
        assert_eq!(running.state(), "PENDING");

        let done = progress(json!({"aggregate_percent_complete": 100}));
        assert_eq!(done.state(), "COMPLETED");
    }

    #[test]
    fn test_failure_aggregates_every_failed_item() {
        let failed = progress(json!({
            "aggregate_percent_complete": 55,
            "nodes": [
                {"hypervisor_ip": "10.0.0.1", "status": "Imaging failed", "percent_complete": 30, "messages": ["phoenix timeout"]},
                {"hypervisor_ip": "10.0.0.2", "status": "Installing", "percent_complete": 80},
                {"cvm_ip": "10.0.0.13", "status": "FATAL", "percent_complete": 10}
            ],
            "clusters": [{"cluster_name": "c1", "status": "Cluster creation failed", "percent_complete": 0}]
        }));
        assert_eq!(failed.state(), IMAGING_FAILED);

        let messages = failed.status_messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("10.0.0.1") && messages[0].contains("phoenix timeout"));
        assert!(messages[1].contains("10.0.0.13"));
        assert!(messages[2].contains("cluster c1"));
    }

    #[test]
    fn test_abort_and_stop_are_failures() {
        let aborted = progress(json!({"abort_session": true, "aggregate_percent_complete": 20}));
        assert_eq!(aborted.state(), IMAGING_FAILED);
        assert_eq!(aborted.status_messages(), vec!["imaging session was aborted".to_string()]);

        let stopped = progress(json!({"imaging_stopped": true, "aggregate_percent_complete": 60}));
        assert_eq!(stopped.state(), IMAGING_FAILED);
    }

    #[test]
    fn test_iso_map_serialization() {
        let mut input = ImageNodesInput::default();
        input.hypervisor_iso.insert(
            "kvm".to_string(),
            IsoDetails {
                filename: "AHV.iso".to_string(),
                checksum: None,
            },
        );
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(body["hypervisor_iso"]["kvm"]["filename"], "AHV.iso");
        assert!(body.get("clusters").is_none());
    }
}
