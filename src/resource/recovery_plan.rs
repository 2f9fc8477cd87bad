//! nutanix_recovery_plan
//!
//! Stages group the VMs (by reference or by category) that are recovered
//! together; network mappings pair the primary and recovery networks of each
//! availability zone.

use super::common::{self, found};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct RecoveryPlanKind;

impl V3Kind for RecoveryPlanKind {
    const KIND: &'static str = "recovery_plan";
    const PATH: &'static str = "recovery_plans";
    type Resources = RecoveryPlanResources;
}

// =============================================================================
// API types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageEntityInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_entity_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartEntities {
    #[serde(default)]
    pub entity_info_list: Vec<StageEntityInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageWork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recover_entities: Option<StartEntities>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_time_secs: Option<i64>,
    #[serde(default)]
    pub stage_work: StageWork,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSubnet {
    pub gateway_ip: String,
    pub prefix_length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_connectivity_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_list: Vec<NetworkSubnet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzNetworkMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_reference_list: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_network: Option<Network>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_network: Option<Network>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMapping {
    #[serde(default)]
    pub availability_zone_network_mapping_list: Vec<AzNetworkMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub are_networks_stretched: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub network_mapping_list: Vec<NetworkMapping>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlanResources {
    #[serde(default)]
    pub stage_list: Vec<Stage>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// =============================================================================
// Configuration and state
// =============================================================================

/// One member of a stage: a VM by uuid or name, or every VM in a category set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageEntity {
    #[serde(default)]
    pub vm_uuid: Option<String>,
    #[serde(default)]
    pub vm_name: Option<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub stage_uuid: Option<String>,
    #[serde(default)]
    pub delay_time_secs: Option<i64>,
    #[serde(default)]
    pub entity_list: Vec<StageEntity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzMappingConfig {
    #[serde(default)]
    pub availability_zone_url: Option<String>,
    #[serde(default)]
    pub cluster_uuids: Vec<String>,
    #[serde(default)]
    pub recovery_network: Option<Network>,
    #[serde(default)]
    pub test_network: Option<Network>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMappingConfig {
    #[serde(default)]
    pub availability_zone_network_mapping_list: Vec<AzMappingConfig>,
    #[serde(default)]
    pub are_networks_stretched: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryPlanConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stage_list: Vec<StageConfig>,
    #[serde(default)]
    pub network_mapping_list: Vec<NetworkMappingConfig>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryPlanState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub stage_list: Vec<StageConfig>,
    pub network_mapping_list: Vec<NetworkMappingConfig>,
    pub categories: BTreeMap<String, String>,
    pub state: Option<String>,
}

// =============================================================================
// Expand / flatten
// =============================================================================

fn expand_entity(stage: usize, entity: &StageEntity) -> Result<StageEntityInfo> {
    let set = [entity.vm_uuid.is_some(), entity.vm_name.is_some(), !entity.categories.is_empty()]
        .iter()
        .filter(|s| **s)
        .count();
    if set != 1 {
        return Err(ProviderError::validation(format!(
            "stage_list[{}]: each entity needs exactly one of vm_uuid, vm_name or categories",
            stage
        )));
    }

    let any_entity_reference = match (&entity.vm_uuid, &entity.vm_name) {
        (Some(uuid), _) => Some(common::reference("vm_uuid", "vm", uuid)?),
        (None, Some(name)) => Some(Reference {
            kind: "vm".to_string(),
            uuid: String::new(),
            name: Some(name.clone()),
        }),
        (None, None) => None,
    };
    Ok(StageEntityInfo {
        any_entity_reference,
        categories: entity.categories.clone(),
    })
}

fn expand_az_mapping(mapping: &AzMappingConfig) -> Result<AzNetworkMapping> {
    Ok(AzNetworkMapping {
        availability_zone_url: mapping.availability_zone_url.clone(),
        cluster_reference_list: common::references("cluster_uuids", "cluster", &mapping.cluster_uuids)?,
        recovery_network: mapping.recovery_network.clone(),
        test_network: mapping.test_network.clone(),
    })
}

fn expand_spec(
    config: &RecoveryPlanConfig,
    mut resources: RecoveryPlanResources,
) -> Result<Spec<RecoveryPlanResources>> {
    if config.stage_list.is_empty() {
        return Err(ProviderError::validation("stage_list: at least one stage is required"));
    }

    resources.stage_list = config
        .stage_list
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            let entity_info_list = stage
                .entity_list
                .iter()
                .map(|e| expand_entity(i, e))
                .collect::<Result<Vec<_>>>()?;
            Ok(Stage {
                stage_uuid: stage.stage_uuid.clone(),
                delay_time_secs: stage.delay_time_secs,
                stage_work: StageWork {
                    recover_entities: Some(StartEntities { entity_info_list }),
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    resources.parameters.network_mapping_list = config
        .network_mapping_list
        .iter()
        .map(|m| {
            Ok(NetworkMapping {
                availability_zone_network_mapping_list: m
                    .availability_zone_network_mapping_list
                    .iter()
                    .map(expand_az_mapping)
                    .collect::<Result<Vec<_>>>()?,
                are_networks_stretched: m.are_networks_stretched,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources,
        cluster_reference: None,
    })
}

fn flatten_stage(stage: &Stage) -> StageConfig {
    let entities = stage
        .stage_work
        .recover_entities
        .as_ref()
        .map(|r| r.entity_info_list.as_slice())
        .unwrap_or_default();
    StageConfig {
        stage_uuid: stage.stage_uuid.clone(),
        delay_time_secs: stage.delay_time_secs,
        entity_list: entities
            .iter()
            .map(|info| {
                let reference = info.any_entity_reference.as_ref();
                StageEntity {
                    vm_uuid: reference.map(|r| r.uuid.clone()).filter(|u| !u.is_empty()),
                    vm_name: reference.and_then(|r| r.name.clone()),
                    categories: info.categories.clone(),
                }
            })
            .collect(),
    }
}

pub fn flatten(response: &IntentResponse<RecoveryPlanResources>) -> Result<RecoveryPlanState> {
    let resources = response.resources().cloned().unwrap_or_default();
    Ok(RecoveryPlanState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        stage_list: resources.stage_list.iter().map(flatten_stage).collect(),
        network_mapping_list: resources
            .parameters
            .network_mapping_list
            .iter()
            .map(|m| NetworkMappingConfig {
                availability_zone_network_mapping_list: m
                    .availability_zone_network_mapping_list
                    .iter()
                    .map(|az| AzMappingConfig {
                        availability_zone_url: az.availability_zone_url.clone(),
                        cluster_uuids: common::reference_uuids(&az.cluster_reference_list),
                        recovery_network: az.recovery_network.clone(),
                        test_network: az.test_network.clone(),
                    })
                    .collect(),
                are_networks_stretched: m.are_networks_stretched,
            })
            .collect(),
        categories: response.metadata.categories.clone(),
        state: common::entity_state(response),
    })
}

// =============================================================================
// Lifecycle
// =============================================================================

pub struct RecoveryPlan;

impl Resource for RecoveryPlan {
    const TYPE_NAME: &'static str = "nutanix_recovery_plan";
    type Config = RecoveryPlanConfig;
    type State = RecoveryPlanState;

    async fn create(client: &NutanixClient, config: RecoveryPlanConfig) -> Result<RecoveryPlanState> {
        let spec = expand_spec(&config, RecoveryPlanResources::default())?;

        // The API accepts duplicate names; refuse them here
        if let Some(existing) = client
            .find_entity_by_name::<RecoveryPlanKind>(&config.name)
            .await?
        {
            return Err(ProviderError::validation(format!(
                "recovery plan '{}' already exists ({})",
                config.name, existing
            )));
        }

        let metadata = common::new_metadata(RecoveryPlanKind::KIND, &config.categories, None)?;
        let uuid = client
            .create_and_wait::<RecoveryPlanKind>(&IntentInput::new(metadata, spec), &client.poll.entity)
            .await?;
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<RecoveryPlanState>> {
        match found(client.get_entity::<RecoveryPlanKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(
        client: &NutanixClient,
        id: &str,
        config: RecoveryPlanConfig,
    ) -> Result<RecoveryPlanState> {
        let input = common::build_update::<RecoveryPlanKind, _>(client, id, &config.categories, None, |current| {
            expand_spec(&config, current.map(|s| s.resources).unwrap_or_default())
        })
        .await?;
        client
            .update_and_wait::<RecoveryPlanKind>(id, &input, &client.poll.entity)
            .await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client
            .delete_and_wait::<RecoveryPlanKind>(id, &client.poll.entity)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VM: &str = "5d1c9a2b-8e7f-4a6b-9c0d-1e2f3a4b5c6d";
    const CLUSTER: &str = "0f3a6d1e-2b7c-4e8a-9c1d-5f6e7a8b9c0d";

    fn config(value: Value) -> RecoveryPlanConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_stage_entities_expand() {
        let cfg = config(json!({
            "name": "dr-plan",
            "stage_list": [
                {"delay_time_secs": 0, "entity_list": [{"vm_uuid": VM}]},
                {"entity_list": [{"categories": {"AppTier": "web"}}]}
            ],
            "network_mapping_list": [{
                "availability_zone_network_mapping_list": [{
                    "availability_zone_url": "az-1",
                    "cluster_uuids": [CLUSTER],
                    "recovery_network": {"name": "vlan-dr",
                        "subnet_list": [{"gateway_ip": "10.0.0.1", "prefix_length": 24}]}
                }]
            }]
        }));
        let spec = expand_spec(&cfg, RecoveryPlanResources::default()).unwrap();
        let body = serde_json::to_value(&spec.resources).unwrap();

        let first = &body["stage_list"][0]["stage_work"]["recover_entities"]["entity_info_list"][0];
        assert_eq!(first["any_entity_reference"]["uuid"], VM);
        let second = &body["stage_list"][1]["stage_work"]["recover_entities"]["entity_info_list"][0];
        assert_eq!(second["categories"]["AppTier"], "web");
        assert_eq!(
            body["parameters"]["network_mapping_list"][0]["availability_zone_network_mapping_list"][0]
                ["cluster_reference_list"][0]["kind"],
            "cluster"
        );
    }

    #[test]
    fn test_entity_needs_exactly_one_selector() {
        let cfg = config(json!({
            "name": "dr-plan",
            "stage_list": [{"entity_list": [{"vm_uuid": VM, "vm_name": "web-1"}]}]
        }));
        let err = expand_spec(&cfg, RecoveryPlanResources::default()).unwrap_err();
        assert!(err.to_string().contains("stage_list[0]"));
    }

    #[test]
    fn test_flatten_round_trips_stage() {
        let cfg = config(json!({
            "name": "dr-plan",
            "stage_list": [{"stage_uuid": "st-1", "entity_list": [{"vm_name": "web-1"}]}]
        }));
        let spec = expand_spec(&cfg, RecoveryPlanResources::default()).unwrap();
        let stage = flatten_stage(&spec.resources.stage_list[0]);
        assert_eq!(stage.entity_list[0].vm_name.as_deref(), Some("web-1"));
        assert!(stage.entity_list[0].vm_uuid.is_none());
        assert_eq!(stage.stage_uuid.as_deref(), Some("st-1"));
    }
}
