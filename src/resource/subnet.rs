//! nutanix_subnet

use super::common::{self, found};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct SubnetKind;

impl V3Kind for SubnetKind {
    const KIND: &'static str = "subnet";
    const PATH: &'static str = "subnets";
    type Resources = SubnetResources;
}

// =============================================================================
// API types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpPool {
    pub range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DhcpOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_name_server_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_search_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tftp_server_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiIpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_gateway_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pool_list: Vec<IpPool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_options: Option<DhcpOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vswitch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_config: Option<ApiIpConfig>,
    /// Fields this provider does not manage, sent back unchanged on update
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// =============================================================================
// Configuration and state
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpConfig {
    pub subnet_ip: String,
    pub prefix_length: i64,
    #[serde(default)]
    pub default_gateway_ip: Option<String>,
    /// "first last" address ranges
    #[serde(default)]
    pub pool_list: Vec<String>,
    #[serde(default)]
    pub dhcp_options: Option<DhcpOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubnetConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub cluster_uuid: String,
    #[serde(default = "default_subnet_type")]
    pub subnet_type: String,
    #[serde(default)]
    pub vlan_id: Option<i64>,
    #[serde(default)]
    pub vswitch_name: Option<String>,
    #[serde(default)]
    pub ip_config: Option<IpConfig>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default)]
    pub project_uuid: Option<String>,
}

fn default_subnet_type() -> String {
    "VLAN".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubnetState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub cluster_uuid: Option<String>,
    pub cluster_name: Option<String>,
    pub subnet_type: Option<String>,
    pub vlan_id: Option<i64>,
    pub vswitch_name: Option<String>,
    pub ip_config: Option<IpConfig>,
    pub categories: BTreeMap<String, String>,
    pub project_uuid: Option<String>,
    pub state: Option<String>,
    pub spec_version: Option<i64>,
}

// =============================================================================
// Expand / flatten
// =============================================================================

fn expand_resources(config: &SubnetConfig, mut resources: SubnetResources) -> Result<SubnetResources> {
    if config.subnet_type == "VLAN" && config.vlan_id.is_none() {
        return Err(ProviderError::validation("vlan_id is required for VLAN subnets"));
    }
    if let Some(vlan) = config.vlan_id {
        if !(0..=4095).contains(&vlan) {
            return Err(ProviderError::validation(format!(
                "vlan_id {} is out of range 0-4095",
                vlan
            )));
        }
    }

    resources.subnet_type = Some(config.subnet_type.clone());
    resources.vlan_id = config.vlan_id;
    resources.vswitch_name = config.vswitch_name.clone();
    resources.ip_config = config.ip_config.as_ref().map(|ip| ApiIpConfig {
        subnet_ip: Some(ip.subnet_ip.clone()),
        prefix_length: Some(ip.prefix_length),
        default_gateway_ip: ip.default_gateway_ip.clone(),
        pool_list: ip
            .pool_list
            .iter()
            .map(|range| IpPool {
                range: range.clone(),
            })
            .collect(),
        dhcp_options: ip.dhcp_options.clone(),
    });
    Ok(resources)
}

fn expand_spec(config: &SubnetConfig, resources: SubnetResources) -> Result<Spec<SubnetResources>> {
    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources: expand_resources(config, resources)?,
        cluster_reference: Some(common::reference("cluster_uuid", "cluster", &config.cluster_uuid)?),
    })
}

fn flatten_ip_config(ip: &ApiIpConfig) -> Option<IpConfig> {
    Some(IpConfig {
        subnet_ip: ip.subnet_ip.clone()?,
        prefix_length: ip.prefix_length?,
        default_gateway_ip: ip.default_gateway_ip.clone(),
        pool_list: ip.pool_list.iter().map(|p| p.range.clone()).collect(),
        dhcp_options: ip.dhcp_options.clone(),
    })
}

pub fn flatten(response: &IntentResponse<SubnetResources>) -> Result<SubnetState> {
    let resources = response.resources().cloned().unwrap_or_default();
    let cluster: Option<&Reference> = response
        .status
        .as_ref()
        .and_then(|s| s.cluster_reference.as_ref())
        .or_else(|| response.spec.as_ref().and_then(|s| s.cluster_reference.as_ref()));

    Ok(SubnetState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        cluster_uuid: cluster.map(|c| c.uuid.clone()),
        cluster_name: cluster.and_then(|c| c.name.clone()),
        subnet_type: resources.subnet_type,
        vlan_id: resources.vlan_id,
        vswitch_name: resources.vswitch_name,
        ip_config: resources.ip_config.as_ref().and_then(flatten_ip_config),
        categories: response.metadata.categories.clone(),
        project_uuid: response.metadata.project_reference.as_ref().map(|r| r.uuid.clone()),
        state: common::entity_state(response),
        spec_version: response.metadata.spec_version,
    })
}

// =============================================================================
// Lifecycle
// =============================================================================

pub struct Subnet;

impl Resource for Subnet {
    const TYPE_NAME: &'static str = "nutanix_subnet";
    type Config = SubnetConfig;
    type State = SubnetState;

    async fn create(client: &NutanixClient, config: SubnetConfig) -> Result<SubnetState> {
        let metadata = common::new_metadata(
            SubnetKind::KIND,
            &config.categories,
            config.project_uuid.as_deref(),
        )?;
        let spec = expand_spec(&config, SubnetResources::default())?;
        let uuid = client
            .create_and_wait::<SubnetKind>(&IntentInput::new(metadata, spec), &client.poll.entity)
            .await?;
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<SubnetState>> {
        match found(client.get_entity::<SubnetKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(client: &NutanixClient, id: &str, config: SubnetConfig) -> Result<SubnetState> {
        let input = common::build_update::<SubnetKind, _>(
            client,
            id,
            &config.categories,
            config.project_uuid.as_deref(),
            |current| expand_spec(&config, current.map(|s| s.resources).unwrap_or_default()),
        )
        .await?;
        client
            .update_and_wait::<SubnetKind>(id, &input, &client.poll.entity)
            .await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client.delete_and_wait::<SubnetKind>(id, &client.poll.entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> SubnetConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_vlan_requires_vlan_id() {
        let cfg = config(json!({
            "name": "vlan-10",
            "cluster_uuid": "0f3a6d1e-2b7c-4e8a-9c1d-5f6e7a8b9c0d"
        }));
        let err = expand_spec(&cfg, SubnetResources::default()).unwrap_err();
        assert!(err.to_string().contains("vlan_id is required"));
    }

    #[test]
    fn test_expand_keeps_unmanaged_fields() {
        let cfg = config(json!({
            "name": "vlan-10",
            "cluster_uuid": "0f3a6d1e-2b7c-4e8a-9c1d-5f6e7a8b9c0d",
            "vlan_id": 10,
            "ip_config": {"subnet_ip": "10.10.0.0", "prefix_length": 24, "pool_list": ["10.10.0.50 10.10.0.99"]}
        }));
        let mut current = SubnetResources::default();
        current
            .other
            .insert("network_function_chain_reference".to_string(), json!({"kind": "nfc"}));

        let spec = expand_spec(&cfg, current).unwrap();
        let body = serde_json::to_value(&spec).unwrap();
        assert_eq!(body["resources"]["vlan_id"], 10);
        assert_eq!(body["resources"]["ip_config"]["pool_list"][0]["range"], "10.10.0.50 10.10.0.99");
        assert_eq!(body["resources"]["network_function_chain_reference"]["kind"], "nfc");
        assert_eq!(body["cluster_reference"]["kind"], "cluster");
    }

    #[test]
    fn test_flatten_prefers_status() {
        let response: IntentResponse<SubnetResources> = serde_json::from_value(json!({
            "metadata": {"kind": "subnet", "uuid": "s-1", "spec_version": 2, "categories": {"Env": "dev"}},
            "spec": {"name": "old", "resources": {"vlan_id": 10}},
            "status": {
                "state": "COMPLETE",
                "name": "vlan-10",
                "cluster_reference": {"kind": "cluster", "uuid": "c-1", "name": "PE01"},
                "resources": {"subnet_type": "VLAN", "vlan_id": 10,
                    "ip_config": {"subnet_ip": "10.10.0.0", "prefix_length": 24}}
            }
        }))
        .unwrap();

        let state = flatten(&response).unwrap();
        assert_eq!(state.name, "vlan-10");
        assert_eq!(state.cluster_name.as_deref(), Some("PE01"));
        assert_eq!(state.ip_config.unwrap().prefix_length, 24);
        assert_eq!(state.categories["Env"], "dev");
        assert_eq!(state.spec_version, Some(2));
    }
}
