//! Karbon Kubernetes cluster API
//!
//! Karbon addresses clusters by name, not UUID. Mutations return a Prism
//! task UUID which is polled through the regular task endpoint.

use super::v3::{task_state_refresh, Task, TASK_PENDING, TASK_TARGET};
use super::NutanixClient;
use crate::error::{ProviderError, Result};
use crate::poll::{PollTiming, StateChangeConf};
use serde::{Deserialize, Serialize};
use urlencoding::encode;

/// Metadata API version Karbon expects on create
pub const KARBON_API_VERSION: &str = "2.0.0";

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AhvConfig {
    pub cpu: i64,
    pub disk_mib: i64,
    pub memory_mib: i64,
    pub network_uuid: String,
    pub prism_element_cluster_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ipv4_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub node_os_version: Option<String>,
    #[serde(default)]
    pub num_instances: i64,
    #[serde(default)]
    pub ahv_config: Option<AhvConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePools {
    pub node_pools: Vec<NodePool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingleMasterConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivePassiveConfig {
    pub external_ipv4_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterNodeConfig {
    pub ipv4_address: String,
    pub node_pool_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalLbConfig {
    pub external_ipv4_address: String,
    pub master_nodes_config: Vec<MasterNodeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MastersConfig {
    pub node_pools: Vec<NodePool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_master_config: Option<SingleMasterConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_passive_config: Option<ActivePassiveConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_lb_config: Option<ExternalLbConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlannelConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpPoolConfig {
    pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalicoConfig {
    #[serde(default)]
    pub ip_pool_configs: Vec<IpPoolConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniConfig {
    #[serde(default)]
    pub node_cidr_mask_size: i64,
    #[serde(default)]
    pub pod_ipv4_cidr: String,
    #[serde(default)]
    pub service_ipv4_cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flannel_config: Option<FlannelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calico_config: Option<CalicoConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumesConfig {
    pub file_system: String,
    pub flash_mode: bool,
    pub password: String,
    pub prism_element_cluster_uuid: String,
    pub storage_container: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageClassConfig {
    pub default_storage_class: bool,
    pub name: String,
    pub reclaim_policy: String,
    pub volumes_config: VolumesConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterMetadata {
    pub api_version: String,
}

impl Default for ClusterMetadata {
    fn default() -> Self {
        Self {
            api_version: KARBON_API_VERSION.to_string(),
        }
    }
}

/// Body of the create call
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterIntentInput {
    pub name: String,
    pub version: String,
    pub cni_config: CniConfig,
    pub etcd_config: NodePools,
    pub masters_config: MastersConfig,
    pub metadata: ClusterMetadata,
    pub storage_class_config: StorageClassConfig,
    pub workers_config: NodePools,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleRequest {
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryOperation {
    pub registry_name: String,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClusterResponse {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub cluster_uuid: Option<String>,
    #[serde(default)]
    pub task_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub task_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePoolNames {
    #[serde(default)]
    pub node_pools: Vec<String>,
    #[serde(default)]
    pub deployment_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub kubeapi_server_ipv4_address: Option<String>,
    #[serde(default)]
    pub etcd_config: NodePoolNames,
    #[serde(default)]
    pub master_config: NodePoolNames,
    #[serde(default)]
    pub worker_config: NodePoolNames,
    #[serde(default)]
    pub cni_config: CniConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubeconfigResponse {
    #[serde(default)]
    pub kube_config: Option<String>,
}

impl NutanixClient {
    /// Create a Karbon cluster
    pub async fn create_karbon_cluster(
        &self,
        input: &ClusterIntentInput,
    ) -> Result<CreateClusterResponse> {
        let url = self.karbon_url("v1/k8s/clusters")?;
        tracing::info!("Creating Karbon cluster '{}' ({})", input.name, input.version);
        self.post(&url, input).await
    }

    /// Get a Karbon cluster by name
    pub async fn get_karbon_cluster(&self, name: &str) -> Result<ClusterResponse> {
        let url = self.karbon_url(&format!("v1/k8s/clusters/{}", encode(name)))?;
        self.get(&url)
            .await
            .map_err(|e| super::v3::remap_not_found(e, "karbon cluster", name))
    }

    /// List all Karbon clusters
    pub async fn list_karbon_clusters(&self) -> Result<Vec<ClusterResponse>> {
        let url = self.karbon_url("v1-beta.1/k8s/clusters")?;
        let clusters: Option<Vec<ClusterResponse>> = self.get(&url).await?;
        Ok(clusters.unwrap_or_default())
    }

    /// Resolve a cluster UUID to its name
    pub async fn karbon_cluster_name(&self, uuid: &str) -> Result<String> {
        self.list_karbon_clusters()
            .await?
            .into_iter()
            .find(|c| c.uuid.as_deref() == Some(uuid))
            .and_then(|c| c.name)
            .ok_or_else(|| ProviderError::not_found("karbon cluster", uuid))
    }

    /// Delete a Karbon cluster, returning its task
    pub async fn delete_karbon_cluster(&self, name: &str) -> Result<TaskResponse> {
        let url = self.karbon_url(&format!("v1/k8s/clusters/{}", encode(name)))?;
        tracing::info!("Deleting Karbon cluster '{}'", name);
        let response: Option<TaskResponse> = self
            .delete(&url)
            .await
            .map_err(|e| super::v3::remap_not_found(e, "karbon cluster", name))?;
        Ok(response.unwrap_or_default())
    }

    /// Get one node pool of a cluster
    pub async fn get_karbon_node_pool(&self, cluster: &str, pool: &str) -> Result<NodePool> {
        let url = self.karbon_url(&format!(
            "v1-beta.1/k8s/clusters/{}/node-pools/{}",
            encode(cluster),
            encode(pool)
        ))?;
        self.get(&url).await
    }

    /// Get several node pools concurrently, preserving order
    pub async fn get_karbon_node_pools(&self, cluster: &str, pools: &[String]) -> Result<Vec<NodePool>> {
        let fetches = pools.iter().map(|p| self.get_karbon_node_pool(cluster, p));
        futures::future::try_join_all(fetches).await
    }

    /// Add nodes to a node pool
    pub async fn scale_up_karbon_node_pool(&self, cluster: &str, pool: &str, count: i64) -> Result<TaskResponse> {
        let url = self.karbon_url(&format!(
            "v1-alpha.1/k8s/clusters/{}/node-pools/{}/add-nodes",
            encode(cluster),
            encode(pool)
        ))?;
        tracing::info!("Scaling up node pool {}/{} by {}", cluster, pool, count);
        self.post(&url, &ScaleRequest { count }).await
    }

    /// Remove nodes from a node pool
    pub async fn scale_down_karbon_node_pool(&self, cluster: &str, pool: &str, count: i64) -> Result<TaskResponse> {
        let url = self.karbon_url(&format!(
            "v1-alpha.1/k8s/clusters/{}/node-pools/{}/remove-nodes",
            encode(cluster),
            encode(pool)
        ))?;
        tracing::info!("Scaling down node pool {}/{} by {}", cluster, pool, count);
        self.post(&url, &ScaleRequest { count }).await
    }

    /// Private registries attached to a cluster
    pub async fn list_karbon_registries(&self, cluster: &str) -> Result<Vec<RegistryResponse>> {
        let url = self.karbon_url(&format!("v1-alpha.1/k8s/clusters/{}/registries", encode(cluster)))?;
        let registries: Option<Vec<RegistryResponse>> = self.get(&url).await?;
        Ok(registries.unwrap_or_default())
    }

    pub async fn add_karbon_registry(&self, cluster: &str, registry: &str) -> Result<()> {
        let url = self.karbon_url(&format!("v1-alpha.1/k8s/clusters/{}/registries", encode(cluster)))?;
        tracing::info!("Adding private registry '{}' to {}", registry, cluster);
        let _: serde_json::Value = self
            .post(
                &url,
                &RegistryOperation {
                    registry_name: registry.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn delete_karbon_registry(&self, cluster: &str, registry: &str) -> Result<()> {
        let url = self.karbon_url(&format!(
            "v1-alpha.1/k8s/clusters/{}/registries/{}",
            encode(cluster),
            encode(registry)
        ))?;
        tracing::info!("Removing private registry '{}' from {}", registry, cluster);
        let _: serde_json::Value = self.delete(&url).await?;
        Ok(())
    }

    /// Kubeconfig of a cluster
    pub async fn get_karbon_kubeconfig(&self, cluster: &str) -> Result<String> {
        let url = self.karbon_url(&format!("v1/k8s/clusters/{}/kubeconfig", encode(cluster)))?;
        let response: KubeconfigResponse = self.get(&url).await?;
        response
            .kube_config
            .ok_or_else(|| ProviderError::not_found("kubeconfig", cluster))
    }

    /// Wait for a Karbon task; Karbon tasks live in the Prism task service
    pub async fn wait_for_karbon_task(&self, task_uuid: &str, timing: &PollTiming) -> Result<Task> {
        StateChangeConf::new(format!("karbon task {}", task_uuid))
            .pending(TASK_PENDING)
            .target(TASK_TARGET)
            .timing(timing)
            .wait_for_state(|| karbon_task_refresh(self, task_uuid))
            .await
    }
}

/// Refresh for Karbon tasks, same vocabulary as v3 tasks
pub async fn karbon_task_refresh(
    client: &NutanixClient,
    task_uuid: &str,
) -> Result<crate::poll::Observation<Task>> {
    task_state_refresh(client, task_uuid).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_body_shape() {
        let input = ClusterIntentInput {
            name: "demo".to_string(),
            version: "1.19.8-0".to_string(),
            masters_config: MastersConfig {
                single_master_config: Some(SingleMasterConfig {}),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(body["metadata"]["api_version"], KARBON_API_VERSION);
        assert_eq!(body["masters_config"]["single_master_config"], json!({}));
        assert!(body["masters_config"].get("external_lb_config").is_none());
    }

    #[test]
    fn test_cluster_response_tolerates_missing_sections() {
        let cluster: ClusterResponse = serde_json::from_value(json!({
            "name": "demo",
            "uuid": "k-1",
            "status": "kActive",
            "worker_config": {"node_pools": ["worker_node_pool"]}
        }))
        .unwrap();
        assert_eq!(cluster.worker_config.node_pools, vec!["worker_node_pool".to_string()]);
        assert!(cluster.etcd_config.node_pools.is_empty());
    }
}
