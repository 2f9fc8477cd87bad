//! Read-only lookups: `nutanix_cluster` and `nutanix_clusters`

use crate::client::v3::{IntentResponse, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A query against existing infrastructure
#[allow(async_fn_in_trait)]
pub trait DataSource {
    const TYPE_NAME: &'static str;

    type Query: DeserializeOwned;
    type State: Serialize;

    async fn read(client: &NutanixClient, query: Self::Query) -> Result<Self::State>;
}

pub struct ClusterKind;

impl V3Kind for ClusterKind {
    const KIND: &'static str = "cluster";
    const PATH: &'static str = "clusters";
    type Resources = ClusterResources;
}

// =============================================================================
// API types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypervisorServer {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "type")]
    pub hypervisor_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterNodes {
    #[serde(default)]
    pub hypervisor_server_list: Vec<HypervisorServer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub full_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftwareVersion {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub service_list: Vec<String>,
    #[serde(default)]
    pub operation_mode: Option<String>,
    #[serde(default)]
    pub encryption_status: Option<String>,
    #[serde(default)]
    pub gpu_driver_version: Option<String>,
    #[serde(default)]
    pub build: Option<BuildInfo>,
    #[serde(default)]
    pub software_map: BTreeMap<String, SoftwareVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterNetwork {
    #[serde(default)]
    pub external_ip: Option<String>,
    #[serde(default)]
    pub external_data_services_ip: Option<String>,
    #[serde(default)]
    pub name_server_ip_list: Vec<String>,
    #[serde(default)]
    pub ntp_server_ip_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResources {
    #[serde(default)]
    pub nodes: Option<ClusterNodes>,
    #[serde(default)]
    pub config: Option<ClusterSettings>,
    #[serde(default)]
    pub network: Option<ClusterNetwork>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub name: String,
    pub state: Option<String>,
    pub nodes: Vec<HypervisorServer>,
    pub service_list: Vec<String>,
    pub operation_mode: Option<String>,
    pub encryption_status: Option<String>,
    pub gpu_driver_version: Option<String>,
    pub build_version: Option<String>,
    pub software_map_ncc: Option<String>,
    pub software_map_nos: Option<String>,
    pub external_ip: Option<String>,
    pub external_data_services_ip: Option<String>,
    pub name_server_ip_list: Vec<String>,
    pub ntp_server_ip_list: Vec<String>,
    pub categories: BTreeMap<String, String>,
}

pub fn flatten_cluster(response: &IntentResponse<ClusterResources>) -> Result<ClusterInfo> {
    let resources = response.resources().cloned().unwrap_or_default();
    let settings = resources.config.unwrap_or_default();
    let network = resources.network.unwrap_or_default();
    let software = |key: &str| settings.software_map.get(key).and_then(|s| s.version.clone());

    Ok(ClusterInfo {
        cluster_id: response.uuid()?,
        name: super::common::entity_name(response),
        state: super::common::entity_state(response),
        nodes: resources
            .nodes
            .map(|n| n.hypervisor_server_list)
            .unwrap_or_default(),
        service_list: settings.service_list.clone(),
        operation_mode: settings.operation_mode.clone(),
        encryption_status: settings.encryption_status.clone(),
        gpu_driver_version: settings.gpu_driver_version.clone(),
        build_version: settings.build.as_ref().and_then(|b| b.version.clone()),
        software_map_ncc: software("NCC"),
        software_map_nos: software("NOS"),
        external_ip: network.external_ip,
        external_data_services_ip: network.external_data_services_ip,
        name_server_ip_list: network.name_server_ip_list,
        ntp_server_ip_list: network.ntp_server_ip_list,
        categories: response.metadata.categories.clone(),
    })
}

// =============================================================================
// Data sources
// =============================================================================

/// Exactly one of `cluster_id` or `name`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterQuery {
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct Cluster;

impl DataSource for Cluster {
    const TYPE_NAME: &'static str = "nutanix_cluster";
    type Query = ClusterQuery;
    type State = ClusterInfo;

    async fn read(client: &NutanixClient, query: ClusterQuery) -> Result<ClusterInfo> {
        let response = match (&query.cluster_id, &query.name) {
            (Some(id), None) => client.get_entity::<ClusterKind>(id).await?,
            (None, Some(name)) => {
                let mut matches: Vec<_> = client
                    .list_entities::<ClusterKind>(Some(&format!("name=={}", name)))
                    .await?
                    .into_iter()
                    .filter(|c| super::common::entity_name(c) == *name)
                    .collect();
                match matches.len() {
                    0 => return Err(ProviderError::not_found("cluster", name)),
                    1 => matches.remove(0),
                    n => {
                        return Err(ProviderError::validation(format!(
                            "{} clusters are named '{}'; use cluster_id instead",
                            n, name
                        )))
                    }
                }
            }
            _ => {
                return Err(ProviderError::validation(
                    "exactly one of cluster_id or name is required",
                ))
            }
        };
        flatten_cluster(&response)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClustersQuery {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClustersState {
    pub entities: Vec<ClusterInfo>,
}

pub struct Clusters;

impl DataSource for Clusters {
    const TYPE_NAME: &'static str = "nutanix_clusters";
    type Query = ClustersQuery;
    type State = ClustersState;

    async fn read(client: &NutanixClient, _query: ClustersQuery) -> Result<ClustersState> {
        let entities = client
            .list_entities::<ClusterKind>(None)
            .await?
            .iter()
            .map(flatten_cluster)
            .collect::<Result<Vec<_>>>()?;
        Ok(ClustersState { entities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_cluster() {
        let response: IntentResponse<ClusterResources> = serde_json::from_value(json!({
            "metadata": {"kind": "cluster", "uuid": "c-1"},
            "status": {
                "state": "COMPLETE",
                "name": "PE01",
                "resources": {
                    "nodes": {"hypervisor_server_list": [{"ip": "10.0.0.21", "version": "el7", "type": "AHV"}]},
                    "config": {
                        "service_list": ["AOS"],
                        "build": {"version": "6.5.2"},
                        "software_map": {"NCC": {"version": "4.6.0"}, "NOS": {"version": "6.5.2"}}
                    },
                    "network": {"external_ip": "10.0.0.50", "ntp_server_ip_list": ["pool.ntp.org"]},
                    "analysis": {"vm_efficiency_map": {}}
                }
            }
        }))
        .unwrap();

        let info = flatten_cluster(&response).unwrap();
        assert_eq!(info.cluster_id, "c-1");
        assert_eq!(info.name, "PE01");
        assert_eq!(info.nodes[0].hypervisor_type.as_deref(), Some("AHV"));
        assert_eq!(info.software_map_ncc.as_deref(), Some("4.6.0"));
        assert_eq!(info.build_version.as_deref(), Some("6.5.2"));
        assert_eq!(info.external_ip.as_deref(), Some("10.0.0.50"));
        assert!(info.service_list.contains(&"AOS".to_string()));
    }

    #[test]
    fn test_prism_central_has_no_nodes() {
        let response: IntentResponse<ClusterResources> = serde_json::from_value(json!({
            "metadata": {"kind": "cluster", "uuid": "pc-1"},
            "status": {"name": "Unnamed", "resources": {"config": {"service_list": ["PRISM_CENTRAL"]}}}
        }))
        .unwrap();
        let info = flatten_cluster(&response).unwrap();
        assert!(info.nodes.is_empty());
        assert!(info.software_map_nos.is_none());
    }
}
