//! Foundation Central API
//!
//! Foundation Central lives on Prism Central. Nodes that phoned home show up
//! as imaged nodes; an imaged cluster request images a set of them and forms
//! a cluster.

use super::NutanixClient;
use crate::error::{ProviderError, Result};
use crate::poll::{Observation, PollTiming, StateChangeConf, StatusMessages};
use serde::{Deserialize, Serialize};

pub const NODE_PENDING: &[&str] = &["UNAVAILABLE"];
pub const NODE_TARGET: &[&str] = &["AVAILABLE"];
pub const IMAGING_PENDING: &[&str] = &["PENDING"];
pub const IMAGING_TARGET: &[&str] = &["COMPLETED"];

const LIST_PAGE_SIZE: i64 = 100;

// =============================================================================
// Imaged nodes
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagedNode {
    pub imaged_node_uuid: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub node_serial: Option<String>,
    #[serde(default)]
    pub block_serial: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub node_state: Option<String>,
    #[serde(default)]
    pub cvm_ip: Option<String>,
    #[serde(default)]
    pub hypervisor_ip: Option<String>,
    #[serde(default)]
    pub ipmi_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ListInput {
    length: i64,
    offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListMetadata {
    #[serde(default)]
    total_matches: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ImagedNodesList {
    #[serde(default)]
    imaged_nodes: Vec<ImagedNode>,
    #[serde(default)]
    metadata: ListMetadata,
}

/// Availability of the requested nodes, as seen by one refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAvailability {
    pub available: Vec<String>,
    pub unavailable: Vec<String>,
}

impl NodeAvailability {
    pub fn state(&self) -> &'static str {
        if self.unavailable.is_empty() {
            "AVAILABLE"
        } else {
            "UNAVAILABLE"
        }
    }
}

impl StatusMessages for NodeAvailability {
    fn status_messages(&self) -> Vec<String> {
        self.unavailable
            .iter()
            .map(|uuid| format!("imaged node {} is not available", uuid))
            .collect()
    }
}

// =============================================================================
// Imaged clusters
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonNetworkSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cvm_dns_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hypervisor_dns_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cvm_ntp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hypervisor_ntp_servers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypervisorIsoDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperv_sku: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub imaged_node_uuid: String,
    pub cvm_ip: String,
    pub cvm_gateway: String,
    pub cvm_netmask: String,
    pub hypervisor_ip: String,
    pub hypervisor_gateway: String,
    pub hypervisor_netmask: String,
    pub hypervisor_hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi_netmask: Option<String>,
    #[serde(default)]
    pub image_now: bool,
    #[serde(default)]
    pub use_existing_network_settings: bool,
}

fn default_redundancy_factor() -> i64 {
    2
}

/// Body of the imaged cluster create call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagedClusterInput {
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_external_ip: Option<String>,
    #[serde(default)]
    pub common_network_settings: CommonNetworkSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_iso_details: Option<HypervisorIsoDetails>,
    pub aos_package_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aos_package_sha256sum: Option<String>,
    #[serde(default = "default_redundancy_factor")]
    pub redundancy_factor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub skip_cluster_creation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_node_count: Option<i64>,
    pub nodes_list: Vec<ClusterNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateImagedClusterResponse {
    pub imaged_cluster_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressDetails {
    #[serde(default)]
    pub imaged_node_uuid: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub percent_complete: f64,
    #[serde(default)]
    pub imaging_stopped: bool,
    #[serde(default)]
    pub intent_picked_up: bool,
    #[serde(default)]
    pub message_list: Vec<String>,
}

impl ProgressDetails {
    fn failed(&self) -> bool {
        (self.imaging_stopped && self.percent_complete < 100.0)
            || self
                .status
                .as_deref()
                .map(|s| {
                    let s = s.to_ascii_lowercase();
                    s.contains("fail") || s.contains("fatal")
                })
                .unwrap_or(false)
    }

    fn describe(&self, what: &str) -> String {
        let mut text = format!(
            "{} failed at {:.0}%",
            what, self.percent_complete
        );
        if let Some(status) = &self.status {
            text.push_str(&format!(": {}", status));
        }
        if !self.message_list.is_empty() {
            text.push_str(&format!(" ({})", self.message_list.join(" | ")));
        }
        text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub intent_picked_up: bool,
    #[serde(default)]
    pub imaging_stopped: bool,
    #[serde(default)]
    pub aggregate_percent_complete: f64,
    #[serde(default)]
    pub cluster_creation_started: bool,
    #[serde(default)]
    pub current_foundation_ip: Option<String>,
    #[serde(default)]
    pub foundation_session_id: Option<String>,
    #[serde(default)]
    pub cluster_progress_details: Option<ProgressDetails>,
    #[serde(default)]
    pub node_progress_details: Vec<ProgressDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagedCluster {
    #[serde(default)]
    pub imaged_cluster_uuid: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub cluster_external_ip: Option<String>,
    #[serde(default)]
    pub redundancy_factor: Option<i64>,
    #[serde(default)]
    pub aos_package_url: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub created_timestamp: Option<String>,
    #[serde(default)]
    pub cluster_status: Option<ClusterStatus>,
}

impl ImagedCluster {
    pub fn state(&self) -> &'static str {
        let Some(status) = &self.cluster_status else {
            return "PENDING";
        };
        let cluster_failed = status
            .cluster_progress_details
            .as_ref()
            .map(ProgressDetails::failed)
            .unwrap_or(false);
        let node_failed = status.node_progress_details.iter().any(ProgressDetails::failed);

        let stopped_early = status.imaging_stopped && status.aggregate_percent_complete < 100.0;

        if cluster_failed || node_failed || stopped_early {
            "FAILED"
        } else if status.intent_picked_up && status.aggregate_percent_complete >= 100.0 {
            "COMPLETED"
        } else {
            "PENDING"
        }
    }
}

impl StatusMessages for ImagedCluster {
    fn status_messages(&self) -> Vec<String> {
        let Some(status) = &self.cluster_status else {
            return Vec::new();
        };
        let mut messages: Vec<String> = status
            .node_progress_details
            .iter()
            .filter(|n| n.failed())
            .map(|n| {
                n.describe(&format!(
                    "node {}",
                    n.imaged_node_uuid.as_deref().unwrap_or("unknown")
                ))
            })
            .collect();
        if let Some(cluster) = status.cluster_progress_details.as_ref().filter(|c| c.failed()) {
            messages.push(cluster.describe(&format!(
                "cluster {}",
                cluster
                    .cluster_name
                    .as_deref()
                    .or(self.cluster_name.as_deref())
                    .unwrap_or("unknown")
            )));
        }
        if messages.is_empty() && status.imaging_stopped {
            messages.push(format!(
                "imaging stopped at {:.0}%",
                status.aggregate_percent_complete
            ));
        }
        messages
    }
}

// =============================================================================
// Refresh functions
// =============================================================================

/// Availability of a set of imaged nodes
pub async fn fc_node_availability_refresh(
    client: &NutanixClient,
    node_uuids: &[String],
) -> Result<Observation<NodeAvailability>> {
    let nodes = client.list_imaged_nodes().await?;
    let mut availability = NodeAvailability::default();
    for uuid in node_uuids {
        let available = nodes
            .iter()
            .any(|n| &n.imaged_node_uuid == uuid && n.available);
        if available {
            availability.available.push(uuid.clone());
        } else {
            availability.unavailable.push(uuid.clone());
        }
    }
    let state = availability.state();
    Ok(Observation::new(availability, state))
}

/// Imaging progress of one imaged cluster
pub async fn fc_imaging_refresh(
    client: &NutanixClient,
    imaged_cluster_uuid: &str,
) -> Result<Observation<ImagedCluster>> {
    let cluster = client.get_imaged_cluster(imaged_cluster_uuid).await?;
    if let Some(status) = &cluster.cluster_status {
        tracing::debug!(
            "Imaged cluster {}: picked up={}, {:.0}% complete",
            imaged_cluster_uuid,
            status.intent_picked_up,
            status.aggregate_percent_complete
        );
    }
    let state = cluster.state();
    Ok(Observation::new(cluster, state))
}

impl NutanixClient {
    /// List every imaged node (auto-paginate)
    pub async fn list_imaged_nodes(&self) -> Result<Vec<ImagedNode>> {
        let url = self.fc_url("imaged_nodes/list")?;
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let input = ListInput {
                length: LIST_PAGE_SIZE,
                offset,
                filter: None,
            };
            let page: ImagedNodesList = self.post(&url, &input).await?;
            let count = page.imaged_nodes.len() as i64;
            all.extend(page.imaged_nodes);
            offset += count;
            if count == 0 || offset >= page.metadata.total_matches {
                break;
            }
        }

        Ok(all)
    }

    pub async fn create_imaged_cluster(&self, input: &ImagedClusterInput) -> Result<CreateImagedClusterResponse> {
        let url = self.fc_url("imaged_clusters")?;
        tracing::info!(
            "Requesting imaging of cluster '{}' ({} nodes)",
            input.cluster_name,
            input.nodes_list.len()
        );
        self.post(&url, input).await
    }

    pub async fn get_imaged_cluster(&self, uuid: &str) -> Result<ImagedCluster> {
        let url = self.fc_url(&format!("imaged_clusters/{}", uuid))?;
        self.get(&url)
            .await
            .map_err(|e| super::v3::remap_not_found(e, "imaged cluster", uuid))
    }

    pub async fn delete_imaged_cluster(&self, uuid: &str) -> Result<()> {
        let url = self.fc_url(&format!("imaged_clusters/{}", uuid))?;
        tracing::info!("Deleting imaged cluster {}", uuid);
        let _: Option<serde_json::Value> = self
            .delete(&url)
            .await
            .map_err(|e| super::v3::remap_not_found(e, "imaged cluster", uuid))?;
        Ok(())
    }

    /// Wait until every requested node is available for imaging
    pub async fn wait_for_nodes_available(&self, node_uuids: &[String], timing: &PollTiming) -> Result<NodeAvailability> {
        if node_uuids.is_empty() {
            return Err(ProviderError::validation("no imaged nodes requested"));
        }
        StateChangeConf::new(format!("availability of {} imaged node(s)", node_uuids.len()))
            .pending(NODE_PENDING)
            .target(NODE_TARGET)
            .timing(timing)
            .wait_for_state(|| fc_node_availability_refresh(self, node_uuids))
            .await
    }

    /// Wait until an imaged cluster finishes imaging
    pub async fn wait_for_cluster_imaging(&self, uuid: &str, timing: &PollTiming) -> Result<ImagedCluster> {
        StateChangeConf::new(format!("imaging of imaged cluster {}", uuid))
            .pending(IMAGING_PENDING)
            .target(IMAGING_TARGET)
            .timing(timing)
            .wait_for_state(|| fc_imaging_refresh(self, uuid))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cluster(status: serde_json::Value) -> ImagedCluster {
        serde_json::from_value(json!({
            "imaged_cluster_uuid": "ic-1",
            "cluster_name": "edge01",
            "cluster_status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_not_picked_up_is_pending() {
        let c = cluster(json!({"intent_picked_up": false, "aggregate_percent_complete": 100}));
        assert_eq!(c.state(), "PENDING");
        let missing: ImagedCluster = serde_json::from_value(json!({})).unwrap();
        assert_eq!(missing.state(), "PENDING");
    }

    #[test]
    fn test_complete_when_picked_up_and_done() {
        let c = cluster(json!({"intent_picked_up": true, "aggregate_percent_complete": 100.0}));
        assert_eq!(c.state(), "COMPLETED");
    }

    #[test]
    fn test_node_failure_reports_each_node() {
        let c = cluster(json!({
            "intent_picked_up": true,
            "aggregate_percent_complete": 35,
            "node_progress_details": [
                {"imaged_node_uuid": "n-1", "status": "Imaging failed", "percent_complete": 20, "message_list": ["bad checksum"]},
                {"imaged_node_uuid": "n-2", "status": "Installing", "percent_complete": 50}
            ]
        }));
        assert_eq!(c.state(), "FAILED");
        let messages = c.status_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("n-1") && messages[0].contains("bad checksum"));
    }

    #[test]
    fn test_imaging_stopped_early_is_failure() {
        let c = cluster(json!({"intent_picked_up": true, "imaging_stopped": true, "aggregate_percent_complete": 60}));
        assert_eq!(c.state(), "FAILED");
        assert_eq!(c.status_messages(), vec!["imaging stopped at 60%".to_string()]);
    }

    #[test]
    fn test_node_availability_state() {
        let some = NodeAvailability {
            available: vec!["a".to_string()],
            unavailable: vec!["b".to_string()],
        };
        assert_eq!(some.state(), "UNAVAILABLE");
        assert_eq!(NodeAvailability::default().state(), "AVAILABLE");
    }
}
