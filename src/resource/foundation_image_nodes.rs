//! nutanix_foundation_image_nodes
//!
//! A one-shot imaging run. The resource id is the Foundation session id;
//! there is nothing to update and deleting only forgets the session, the
//! nodes stay imaged.

use super::Resource;
use crate::client::foundation::{ClusterProgress, ImageNodesInput, ImagingProgress, NodeProgress};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageNodesState {
    pub id: String,
    pub session_id: String,
    pub state: String,
    pub aggregate_percent_complete: f64,
    pub imaging_stopped: bool,
    pub nodes: Vec<NodeProgress>,
    pub clusters: Vec<ClusterProgress>,
}

fn validate(input: &ImageNodesInput) -> Result<()> {
    if input.blocks.is_empty() || input.blocks.iter().all(|b| b.nodes.is_empty()) {
        return Err(ProviderError::validation("blocks: at least one node is required"));
    }

    let cvm_ips: BTreeSet<&str> = input
        .blocks
        .iter()
        .flat_map(|b| b.nodes.iter())
        .map(|n| n.cvm_ip.as_str())
        .collect();
    for cluster in &input.clusters {
        if cluster.cluster_members.is_empty() {
            return Err(ProviderError::validation(format!(
                "clusters: cluster '{}' has no members",
                cluster.cluster_name
            )));
        }
        if let Some(stray) = cluster
            .cluster_members
            .iter()
            .find(|m| !cvm_ips.contains(m.as_str()))
        {
            return Err(ProviderError::validation(format!(
                "clusters: member {} of cluster '{}' is not the cvm_ip of any node",
                stray, cluster.cluster_name
            )));
        }
    }

    for node in input.blocks.iter().flat_map(|b| b.nodes.iter()) {
        if let Some(hypervisor) = &node.hypervisor {
            if !input.hypervisor_iso.is_empty() && !input.hypervisor_iso.contains_key(hypervisor) {
                return Err(ProviderError::validation(format!(
                    "node {}: no hypervisor_iso entry for '{}'",
                    node.hypervisor_ip, hypervisor
                )));
            }
        }
    }
    Ok(())
}

fn flatten(session_id: &str, progress: ImagingProgress) -> ImageNodesState {
    ImageNodesState {
        id: session_id.to_string(),
        session_id: session_id.to_string(),
        state: progress.state().to_string(),
        aggregate_percent_complete: progress.aggregate_percent_complete,
        imaging_stopped: progress.imaging_stopped,
        nodes: progress.nodes,
        clusters: progress.clusters,
    }
}

pub struct FoundationImageNodes;

impl Resource for FoundationImageNodes {
    const TYPE_NAME: &'static str = "nutanix_foundation_image_nodes";
    type Config = ImageNodesInput;
    type State = ImageNodesState;

    async fn create(client: &NutanixClient, config: ImageNodesInput) -> Result<ImageNodesState> {
        validate(&config)?;
        let session = client.image_nodes(&config).await?;
        tracing::info!("Foundation imaging session {} started", session.session_id);
        let progress = client
            .wait_for_imaging(&session.session_id, &client.poll.foundation_imaging)
            .await
            .with_context(|| format!("imaging session {} did not complete", session.session_id))?;
        Ok(flatten(&session.session_id, progress))
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<ImageNodesState>> {
        match client.foundation_progress(id).await {
            Ok(progress) => Ok(Some(flatten(id, progress))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(_client: &NutanixClient, id: &str, _config: ImageNodesInput) -> Result<ImageNodesState> {
        Err(ProviderError::Unsupported(format!(
            "updating imaging session {}; image the nodes again with a new resource",
            id
        )))
    }

    async fn delete(_client: &NutanixClient, id: &str) -> Result<()> {
        tracing::info!("Forgetting Foundation imaging session {}; imaged nodes are left as they are", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(clusters: serde_json::Value) -> ImageNodesInput {
        serde_json::from_value(json!({
            "nos_package": "nutanix_installer_package.tar.gz",
            "cvm_gateway": "10.0.0.1",
            "cvm_netmask": "255.255.255.0",
            "hypervisor_gateway": "10.0.0.1",
            "hypervisor_netmask": "255.255.255.0",
            "hypervisor_iso": {"kvm": {"filename": "AHV.iso"}},
            "blocks": [{"block_id": "B1", "nodes": [{
                "hypervisor_hostname": "host-1", "hypervisor_ip": "10.0.0.21",
                "cvm_ip": "10.0.0.31", "node_position": "A", "hypervisor": "kvm"
            }]}],
            "clusters": clusters
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_input() {
        validate(&input(json!([{"cluster_name": "c1", "cluster_members": ["10.0.0.31"]}]))).unwrap();
    }

    #[test]
    fn test_cluster_member_must_be_a_cvm() {
        let err = validate(&input(json!([{"cluster_name": "c1", "cluster_members": ["10.0.0.99"]}])))
            .unwrap_err();
        assert!(err.to_string().contains("10.0.0.99"));
    }

    #[test]
    fn test_flatten_reports_state() {
        let progress: ImagingProgress =
            serde_json::from_value(json!({"aggregate_percent_complete": 100})).unwrap();
        let state = flatten("s-1", progress);
        assert_eq!(state.state, "COMPLETED");
        assert_eq!(state.id, "s-1");
    }
}
