//! nutanix_foundation_central_image_cluster

use super::Resource;
use crate::client::foundation_central::{ImagedCluster, ImagedClusterInput, ProgressDetails};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageClusterState {
    pub id: String,
    pub cluster_name: Option<String>,
    pub cluster_external_ip: Option<String>,
    pub redundancy_factor: Option<i64>,
    pub aos_package_url: Option<String>,
    pub archived: bool,
    pub created_timestamp: Option<String>,
    pub state: String,
    pub aggregate_percent_complete: f64,
    pub foundation_session_id: Option<String>,
    pub node_progress_details: Vec<ProgressDetails>,
}

fn validate(input: &ImagedClusterInput) -> Result<()> {
    if input.nodes_list.is_empty() {
        return Err(ProviderError::validation("nodes_list: at least one node is required"));
    }
    if !matches!(input.redundancy_factor, 2 | 3) {
        return Err(ProviderError::validation(format!(
            "redundancy_factor {} must be 2 or 3",
            input.redundancy_factor
        )));
    }
    let mut seen = BTreeSet::new();
    for node in &input.nodes_list {
        if !seen.insert(node.imaged_node_uuid.as_str()) {
            return Err(ProviderError::validation(format!(
                "nodes_list: imaged node {} is listed twice",
                node.imaged_node_uuid
            )));
        }
    }
    if !input.skip_cluster_creation && (input.nodes_list.len() as i64) < input.redundancy_factor {
        return Err(ProviderError::validation(format!(
            "redundancy_factor {} needs at least {} nodes",
            input.redundancy_factor, input.redundancy_factor
        )));
    }
    Ok(())
}

fn flatten(id: &str, cluster: ImagedCluster) -> ImageClusterState {
    let state = cluster.state().to_string();
    let status = cluster.cluster_status.unwrap_or_default();
    ImageClusterState {
        id: cluster.imaged_cluster_uuid.unwrap_or_else(|| id.to_string()),
        cluster_name: cluster.cluster_name,
        cluster_external_ip: cluster.cluster_external_ip,
        redundancy_factor: cluster.redundancy_factor,
        aos_package_url: cluster.aos_package_url,
        archived: cluster.archived,
        created_timestamp: cluster.created_timestamp,
        state,
        aggregate_percent_complete: status.aggregate_percent_complete,
        foundation_session_id: status.foundation_session_id,
        node_progress_details: status.node_progress_details,
    }
}

pub struct FoundationCentralImageCluster;

impl Resource for FoundationCentralImageCluster {
    const TYPE_NAME: &'static str = "nutanix_foundation_central_image_cluster";
    type Config = ImagedClusterInput;
    type State = ImageClusterState;

    async fn create(client: &NutanixClient, config: ImagedClusterInput) -> Result<ImageClusterState> {
        validate(&config)?;
        let node_uuids: Vec<String> = config
            .nodes_list
            .iter()
            .map(|n| n.imaged_node_uuid.clone())
            .collect();
        client
            .wait_for_nodes_available(&node_uuids, &client.poll.fc_node_availability)
            .await
            .with_context(|| "imaged nodes did not become available".to_string())?;

        let created = client.create_imaged_cluster(&config).await?;
        let uuid = created.imaged_cluster_uuid;
        let cluster = client
            .wait_for_cluster_imaging(&uuid, &client.poll.fc_imaging)
            .await
            .with_context(|| format!("imaged cluster {} ({}) did not finish", config.cluster_name, uuid))?;
        Ok(flatten(&uuid, cluster))
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<ImageClusterState>> {
        match client.get_imaged_cluster(id).await {
            Ok(cluster) if cluster.archived => {
                tracing::debug!("imaged cluster {} is archived", id);
                Ok(None)
            }
            Ok(cluster) => Ok(Some(flatten(id, cluster))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(
        _client: &NutanixClient,
        id: &str,
        _config: ImagedClusterInput,
    ) -> Result<ImageClusterState> {
        Err(ProviderError::Unsupported(format!(
            "updating imaged cluster {}; create a new one instead",
            id
        )))
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        match client.delete_imaged_cluster(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(uuid: &str) -> serde_json::Value {
        json!({
            "imaged_node_uuid": uuid,
            "cvm_ip": "10.0.0.31", "cvm_gateway": "10.0.0.1", "cvm_netmask": "255.255.255.0",
            "hypervisor_ip": "10.0.0.21", "hypervisor_gateway": "10.0.0.1",
            "hypervisor_netmask": "255.255.255.0", "hypervisor_hostname": "host-1"
        })
    }

    fn input(nodes: Vec<serde_json::Value>) -> ImagedClusterInput {
        serde_json::from_value(json!({
            "cluster_name": "edge-1",
            "aos_package_url": "http://repo/aos.tar.gz",
            "nodes_list": nodes
        }))
        .unwrap()
    }

    #[test]
    fn test_redundancy_factor_defaults_to_two() {
        let cfg = input(vec![node("n-1"), node("n-2"), node("n-3")]);
        assert_eq!(cfg.redundancy_factor, 2);
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_duplicate_nodes_rejected() {
        let err = validate(&input(vec![node("n-1"), node("n-1")])).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_too_few_nodes_for_rf() {
        assert!(validate(&input(vec![node("n-1")])).is_err());
    }

    #[test]
    fn test_flatten_pending_cluster() {
        let cluster: ImagedCluster = serde_json::from_value(json!({
            "imaged_cluster_uuid": "ic-1",
            "cluster_name": "edge-1",
            "cluster_status": {"intent_picked_up": true, "aggregate_percent_complete": 35}
        }))
        .unwrap();
        let state = flatten("ic-1", cluster);
        assert_eq!(state.state, "PENDING");
        assert_eq!(state.aggregate_percent_complete, 35.0);
    }
}
