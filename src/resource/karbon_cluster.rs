//! nutanix_karbon_cluster
//!
//! The resource id is the cluster UUID; Karbon itself addresses clusters by
//! name, so every operation after create resolves the name first.
//!
//! One node pool per role. Worker pool size and private registries are the
//! only things that change in place; everything else needs a new cluster.

use super::{read_back, Resource};
use crate::client::karbon::{
    ActivePassiveConfig, AhvConfig, CalicoConfig, ClusterIntentInput, ClusterMetadata, CniConfig,
    ExternalLbConfig, FlannelConfig, MastersConfig, NodePool, NodePools, RegistryOperation,
    SingleMasterConfig, StorageClassConfig, VolumesConfig,
};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use crate::poll::PollTiming;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

const FILE_SYSTEMS: &[&str] = &["ext4", "xfs"];
const RECLAIM_POLICIES: &[&str] = &["Delete", "Retain"];

// =============================================================================
// Configuration
// =============================================================================

/// Node pool roles with their default VM sizing (cpu, disk MiB, memory MiB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    Etcd,
    Master,
    Worker,
}

impl PoolRole {
    pub fn default_name(self) -> &'static str {
        match self {
            PoolRole::Etcd => "etcd-node-pool",
            PoolRole::Master => "master-node-pool",
            PoolRole::Worker => "worker-node-pool",
        }
    }

    fn sizing(self) -> (i64, i64, i64) {
        match self {
            PoolRole::Etcd => (4, 40960, 8192),
            PoolRole::Master => (2, 122880, 4096),
            PoolRole::Worker => (8, 122880, 8192),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AhvConfigInput {
    #[serde(default)]
    pub cpu: Option<i64>,
    #[serde(default)]
    pub disk_mib: Option<i64>,
    #[serde(default)]
    pub memory_mib: Option<i64>,
    pub network_uuid: String,
    pub prism_element_cluster_uuid: String,
}

fn default_instances() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePoolInput {
    #[serde(default)]
    pub name: Option<String>,
    pub node_os_version: String,
    #[serde(default = "default_instances")]
    pub num_instances: i64,
    pub ahv_config: AhvConfigInput,
}

fn default_file_system() -> String {
    "ext4".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumesConfigInput {
    #[serde(default = "default_file_system")]
    pub file_system: String,
    #[serde(default)]
    pub flash_mode: bool,
    pub password: String,
    pub prism_element_cluster_uuid: String,
    pub storage_container: String,
    pub username: String,
}

fn default_storage_class_name() -> String {
    "default-storageclass".to_string()
}

fn default_reclaim_policy() -> String {
    "Delete".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageClassInput {
    #[serde(default = "default_storage_class_name")]
    pub name: String,
    #[serde(default = "default_reclaim_policy")]
    pub reclaim_policy: String,
    pub volumes_config: VolumesConfigInput,
}

fn default_node_cidr_mask_size() -> i64 {
    24
}

fn default_pod_cidr() -> String {
    "172.20.0.0/16".to_string()
}

fn default_service_cidr() -> String {
    "172.19.0.0/16".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CniInput {
    #[serde(default = "default_node_cidr_mask_size")]
    pub node_cidr_mask_size: i64,
    #[serde(default = "default_pod_cidr")]
    pub pod_ipv4_cidr: String,
    #[serde(default = "default_service_cidr")]
    pub service_ipv4_cidr: String,
    #[serde(default)]
    pub flannel_config: Option<FlannelConfig>,
    #[serde(default)]
    pub calico_config: Option<CalicoConfig>,
}

impl Default for CniInput {
    fn default() -> Self {
        Self {
            node_cidr_mask_size: default_node_cidr_mask_size(),
            pod_ipv4_cidr: default_pod_cidr(),
            service_ipv4_cidr: default_service_cidr(),
            flannel_config: None,
            calico_config: None,
        }
    }
}

fn default_wait_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct KarbonClusterConfig {
    pub name: String,
    pub version: String,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_minutes: u64,
    pub storage_class_config: StorageClassInput,
    #[serde(default)]
    pub cni_config: Option<CniInput>,
    #[serde(default)]
    pub single_master_config: Option<SingleMasterConfig>,
    #[serde(default)]
    pub active_passive_config: Option<ActivePassiveConfig>,
    #[serde(default)]
    pub external_lb_config: Option<ExternalLbConfig>,
    pub etcd_node_pool: NodePoolInput,
    pub master_node_pool: NodePoolInput,
    pub worker_node_pool: NodePoolInput,
    #[serde(default)]
    pub private_registry: Vec<RegistryOperation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KarbonClusterState {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub status: Option<String>,
    pub deployment_type: Option<String>,
    pub kubeapi_server_ipv4_address: Option<String>,
    pub etcd_node_pool: Vec<NodePool>,
    pub master_node_pool: Vec<NodePool>,
    pub worker_node_pool: Vec<NodePool>,
    pub cni_config: CniConfig,
    pub private_registry: Vec<RegistryOperation>,
}

// =============================================================================
// Expand
// =============================================================================

fn validate(config: &KarbonClusterConfig) -> Result<()> {
    let masters = [
        ("single_master_config", config.single_master_config.is_some()),
        ("active_passive_config", config.active_passive_config.is_some()),
        ("external_lb_config", config.external_lb_config.is_some()),
    ];
    let set: Vec<&str> = masters.iter().filter(|(_, s)| *s).map(|(n, _)| *n).collect();
    if set.len() > 1 {
        return Err(ProviderError::validation(format!(
            "{} are mutually exclusive",
            set.join(" and ")
        )));
    }

    if let Some(cni) = &config.cni_config {
        if cni.flannel_config.is_some() && cni.calico_config.is_some() {
            return Err(ProviderError::validation(
                "cni_config: flannel_config and calico_config are mutually exclusive",
            ));
        }
    }

    let volumes = &config.storage_class_config.volumes_config;
    if !FILE_SYSTEMS.contains(&volumes.file_system.as_str()) {
        return Err(ProviderError::validation(format!(
            "storage_class_config.volumes_config.file_system '{}' must be one of {}",
            volumes.file_system,
            FILE_SYSTEMS.join(", ")
        )));
    }
    let reclaim = &config.storage_class_config.reclaim_policy;
    if !RECLAIM_POLICIES.contains(&reclaim.as_str()) {
        return Err(ProviderError::validation(format!(
            "storage_class_config.reclaim_policy '{}' must be one of {}",
            reclaim,
            RECLAIM_POLICIES.join(", ")
        )));
    }

    for (field, pool) in [
        ("etcd_node_pool", &config.etcd_node_pool),
        ("master_node_pool", &config.master_node_pool),
        ("worker_node_pool", &config.worker_node_pool),
    ] {
        if pool.num_instances < 1 {
            return Err(ProviderError::validation(format!(
                "{}.num_instances must be at least 1",
                field
            )));
        }
    }
    Ok(())
}

fn expand_node_pool(role: PoolRole, pool: &NodePoolInput) -> NodePool {
    let (cpu, disk_mib, memory_mib) = role.sizing();
    NodePool {
        name: pool.name.clone().unwrap_or_else(|| role.default_name().to_string()),
        node_os_version: Some(pool.node_os_version.clone()),
        num_instances: pool.num_instances,
        ahv_config: Some(AhvConfig {
            cpu: pool.ahv_config.cpu.unwrap_or(cpu),
            disk_mib: pool.ahv_config.disk_mib.unwrap_or(disk_mib),
            memory_mib: pool.ahv_config.memory_mib.unwrap_or(memory_mib),
            network_uuid: pool.ahv_config.network_uuid.clone(),
            prism_element_cluster_uuid: pool.ahv_config.prism_element_cluster_uuid.clone(),
        }),
        nodes: Vec::new(),
    }
}

fn expand_masters(config: &KarbonClusterConfig) -> MastersConfig {
    let mut masters = MastersConfig {
        node_pools: vec![expand_node_pool(PoolRole::Master, &config.master_node_pool)],
        ..Default::default()
    };
    if let Some(apc) = &config.active_passive_config {
        masters.active_passive_config = Some(apc.clone());
    } else if let Some(elb) = &config.external_lb_config {
        masters.external_lb_config = Some(elb.clone());
    } else {
        masters.single_master_config = Some(SingleMasterConfig {});
    }
    masters
}

fn expand_cni(cni: Option<&CniInput>) -> CniConfig {
    let cni = cni.cloned().unwrap_or_default();
    let flannel_config = match (&cni.flannel_config, &cni.calico_config) {
        (None, None) => Some(FlannelConfig {}),
        (flannel, _) => flannel.clone(),
    };
    CniConfig {
        node_cidr_mask_size: cni.node_cidr_mask_size,
        pod_ipv4_cidr: cni.pod_ipv4_cidr,
        service_ipv4_cidr: cni.service_ipv4_cidr,
        flannel_config,
        calico_config: cni.calico_config,
    }
}

pub fn expand(config: &KarbonClusterConfig) -> Result<ClusterIntentInput> {
    validate(config)?;
    let storage = &config.storage_class_config;
    let volumes = &storage.volumes_config;
    Ok(ClusterIntentInput {
        name: config.name.clone(),
        version: config.version.clone(),
        cni_config: expand_cni(config.cni_config.as_ref()),
        etcd_config: NodePools {
            node_pools: vec![expand_node_pool(PoolRole::Etcd, &config.etcd_node_pool)],
        },
        masters_config: expand_masters(config),
        metadata: ClusterMetadata::default(),
        storage_class_config: StorageClassConfig {
            default_storage_class: true,
            name: storage.name.clone(),
            reclaim_policy: storage.reclaim_policy.clone(),
            volumes_config: VolumesConfig {
                file_system: volumes.file_system.clone(),
                flash_mode: volumes.flash_mode,
                password: volumes.password.clone(),
                prism_element_cluster_uuid: volumes.prism_element_cluster_uuid.clone(),
                storage_container: volumes.storage_container.clone(),
                username: volumes.username.clone(),
            },
        },
        workers_config: NodePools {
            node_pools: vec![expand_node_pool(PoolRole::Worker, &config.worker_node_pool)],
        },
    })
}

fn timing(client: &NutanixClient, config: &KarbonClusterConfig) -> PollTiming {
    client
        .poll
        .karbon
        .with_timeout(Duration::from_secs(config.wait_timeout_minutes * 60))
}

/// Registries to add and to remove to go from `current` to `wanted`
fn registry_diff(current: &[String], wanted: &[RegistryOperation]) -> (Vec<String>, Vec<String>) {
    let current: BTreeSet<&str> = current.iter().map(String::as_str).collect();
    let wanted: BTreeSet<&str> = wanted.iter().map(|r| r.registry_name.as_str()).collect();
    (
        wanted.difference(&current).map(|s| s.to_string()).collect(),
        current.difference(&wanted).map(|s| s.to_string()).collect(),
    )
}

async fn sync_registries(client: &NutanixClient, cluster: &str, wanted: &[RegistryOperation]) -> Result<()> {
    let current: Vec<String> = client
        .list_karbon_registries(cluster)
        .await?
        .into_iter()
        .filter_map(|r| r.name)
        .collect();
    let (to_add, to_remove) = registry_diff(&current, wanted);
    for registry in &to_add {
        client.add_karbon_registry(cluster, registry).await?;
    }
    for registry in &to_remove {
        client.delete_karbon_registry(cluster, registry).await?;
    }
    Ok(())
}

/// Scale the worker pool toward `wanted`, returning the task to wait on
async fn scale_workers(
    client: &NutanixClient,
    cluster: &str,
    current: &[NodePool],
    wanted: &NodePool,
) -> Result<Option<String>> {
    let Some(pool) = current.iter().find(|p| p.name == wanted.name) else {
        return Err(ProviderError::Unsupported(format!(
            "worker node pool '{}' does not exist on cluster {}; renaming pools needs a new cluster",
            wanted.name, cluster
        )));
    };
    let response = if wanted.num_instances > pool.num_instances {
        client
            .scale_up_karbon_node_pool(cluster, &pool.name, wanted.num_instances - pool.num_instances)
            .await?
    } else if wanted.num_instances < pool.num_instances {
        client
            .scale_down_karbon_node_pool(cluster, &pool.name, pool.num_instances - wanted.num_instances)
            .await?
    } else {
        return Ok(None);
    };
    Ok(response.task_uuid)
}

// =============================================================================
// Lifecycle
// =============================================================================

pub struct KarbonCluster;

impl Resource for KarbonCluster {
    const TYPE_NAME: &'static str = "nutanix_karbon_cluster";
    type Config = KarbonClusterConfig;
    type State = KarbonClusterState;

    async fn create(client: &NutanixClient, config: KarbonClusterConfig) -> Result<KarbonClusterState> {
        let input = expand(&config)?;
        let created = client.create_karbon_cluster(&input).await?;
        let uuid = created.cluster_uuid.ok_or_else(|| ProviderError::Api {
            status: 200,
            message: format!("create karbon cluster {} returned no cluster uuid", config.name),
        })?;
        if let Some(task) = created.task_uuid {
            client
                .wait_for_karbon_task(&task, &timing(client, &config))
                .await
                .with_context(|| format!("error waiting for karbon cluster ({}) to create", uuid))?;
        }
        if !config.private_registry.is_empty() {
            sync_registries(client, &config.name, &config.private_registry).await?;
        }
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<KarbonClusterState>> {
        let name = match client.karbon_cluster_name(id).await {
            Ok(name) => name,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let cluster = match client.get_karbon_cluster(&name).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let (etcd, masters, workers) = futures::try_join!(
            client.get_karbon_node_pools(&name, &cluster.etcd_config.node_pools),
            client.get_karbon_node_pools(&name, &cluster.master_config.node_pools),
            client.get_karbon_node_pools(&name, &cluster.worker_config.node_pools)
        )?;
        let private_registry = client
            .list_karbon_registries(&name)
            .await?
            .into_iter()
            .filter_map(|r| r.name)
            .map(|registry_name| RegistryOperation { registry_name })
            .collect();

        Ok(Some(KarbonClusterState {
            id: cluster.uuid.unwrap_or_else(|| id.to_string()),
            name,
            version: cluster.version,
            status: cluster.status,
            deployment_type: cluster.master_config.deployment_type,
            kubeapi_server_ipv4_address: cluster.kubeapi_server_ipv4_address,
            etcd_node_pool: etcd,
            master_node_pool: masters,
            worker_node_pool: workers,
            cni_config: cluster.cni_config,
            private_registry,
        }))
    }

    async fn update(
        client: &NutanixClient,
        id: &str,
        config: KarbonClusterConfig,
    ) -> Result<KarbonClusterState> {
        validate(&config)?;
        let name = client.karbon_cluster_name(id).await?;
        if name != config.name {
            return Err(ProviderError::Unsupported(format!(
                "renaming karbon cluster {} to {}",
                name, config.name
            )));
        }
        let cluster = client.get_karbon_cluster(&name).await?;

        let wanted = expand_node_pool(PoolRole::Worker, &config.worker_node_pool);
        let current = client
            .get_karbon_node_pools(&name, &cluster.worker_config.node_pools)
            .await?;
        if let Some(task) = scale_workers(client, &name, &current, &wanted).await? {
            client
                .wait_for_karbon_task(&task, &timing(client, &config))
                .await
                .with_context(|| format!("error waiting for karbon cluster ({}) to scale", id))?;
        }

        sync_registries(client, &name, &config.private_registry).await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        Self::delete_within(client, id, None).await
    }
}

impl KarbonCluster {
    /// Delete, waiting `wait_timeout_minutes` for the Karbon task when given
    /// and the configured Karbon timing otherwise
    pub async fn delete_within(
        client: &NutanixClient,
        id: &str,
        wait_timeout_minutes: Option<u64>,
    ) -> Result<()> {
        let name = match client.karbon_cluster_name(id).await {
            Ok(name) => name,
            Err(e) if e.is_not_found() => {
                tracing::info!("karbon cluster {} already deleted", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let response = client.delete_karbon_cluster(&name).await?;
        if let Some(task) = response.task_uuid {
            let timing = match wait_timeout_minutes {
                Some(minutes) => client
                    .poll
                    .karbon
                    .with_timeout(Duration::from_secs(minutes * 60)),
                None => client.poll.karbon,
            };
            client
                .wait_for_karbon_task(&task, &timing)
                .await
                .with_context(|| format!("error waiting for karbon cluster ({}) to delete", id))?;
        }
        Ok(())
    }
}

/// `wait_timeout_minutes` of a configuration or state document, if set
pub fn delete_wait_minutes(document: &Value) -> Result<Option<u64>> {
    match document.get("wait_timeout_minutes") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ProviderError::validation(format!(
                "wait_timeout_minutes: expected a non-negative integer, got {}",
                value
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn pool() -> Value {
        json!({
            "node_os_version": "ntnx-1.0",
            "ahv_config": {"network_uuid": "net-1", "prism_element_cluster_uuid": "pe-1"}
        })
    }

    fn config(extra: Value) -> KarbonClusterConfig {
        let mut base = json!({
            "name": "demo",
            "version": "1.19.8-0",
            "storage_class_config": {"volumes_config": {
                "password": "secret", "prism_element_cluster_uuid": "pe-1",
                "storage_container": "default", "username": "admin"
            }},
            "etcd_node_pool": pool(),
            "master_node_pool": pool(),
            "worker_node_pool": pool()
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_defaults_to_single_master_and_flannel() {
        let input = expand(&config(json!({}))).unwrap();
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(body["masters_config"]["single_master_config"], json!({}));
        assert_eq!(body["cni_config"]["flannel_config"], json!({}));
        assert_eq!(body["cni_config"]["pod_ipv4_cidr"], "172.20.0.0/16");
        assert_eq!(body["storage_class_config"]["name"], "default-storageclass");
        assert_eq!(body["workers_config"]["node_pools"][0]["name"], "worker-node-pool");
        assert_eq!(body["workers_config"]["node_pools"][0]["ahv_config"]["cpu"], 8);
        assert_eq!(body["etcd_config"]["node_pools"][0]["ahv_config"]["disk_mib"], 40960);
    }

    #[test]
    fn test_active_passive_and_external_lb_conflict() {
        let err = expand(&config(json!({
            "active_passive_config": {"external_ipv4_address": "10.0.0.10"},
            "external_lb_config": {"external_ipv4_address": "10.0.0.11", "master_nodes_config": []}
        })))
        .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.to_string().contains("active_passive_config and external_lb_config"));
    }

    #[test]
    fn test_calico_replaces_flannel() {
        let input = expand(&config(json!({
            "cni_config": {"calico_config": {"ip_pool_configs": [{"cidr": "172.20.0.0/16"}]}}
        })))
        .unwrap();
        assert!(input.cni_config.flannel_config.is_none());
        assert_eq!(input.cni_config.calico_config.unwrap().ip_pool_configs.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_file_system() {
        let mut cfg = config(json!({}));
        cfg.storage_class_config.volumes_config.file_system = "btrfs".to_string();
        assert!(expand(&cfg).unwrap_err().to_string().contains("btrfs"));
    }

    #[test]
    fn test_registry_diff() {
        let current = vec!["old".to_string(), "kept".to_string()];
        let wanted = vec![
            RegistryOperation { registry_name: "kept".to_string() },
            RegistryOperation { registry_name: "new".to_string() },
        ];
        let (add, remove) = registry_diff(&current, &wanted);
        assert_eq!(add, vec!["new".to_string()]);
        assert_eq!(remove, vec!["old".to_string()]);
    }
}
