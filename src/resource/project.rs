//! nutanix_project

use super::common::{self, found};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct ProjectKind;

impl V3Kind for ProjectKind {
    const KIND: &'static str = "project";
    const PATH: &'static str = "projects";
    type Resources = ProjectResources;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub resource_type: String,
    pub limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDomain {
    #[serde(default)]
    pub resources: Vec<ResourceLimit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_domain: Option<ResourceDomain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_subnet_reference: Option<Reference>,
    #[serde(default)]
    pub subnet_reference_list: Vec<Reference>,
    #[serde(default)]
    pub user_reference_list: Vec<Reference>,
    #[serde(default)]
    pub external_user_group_reference_list: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub resource_type: String,
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub resource_limits: Vec<LimitConfig>,
    #[serde(default)]
    pub default_subnet_uuid: Option<String>,
    #[serde(default)]
    pub subnet_uuids: Vec<String>,
    #[serde(default)]
    pub user_uuids: Vec<String>,
    #[serde(default)]
    pub external_user_group_uuids: Vec<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub resource_limits: Vec<LimitConfig>,
    pub default_subnet_uuid: Option<String>,
    pub subnet_uuids: Vec<String>,
    pub user_uuids: Vec<String>,
    pub external_user_group_uuids: Vec<String>,
    pub categories: BTreeMap<String, String>,
    pub state: Option<String>,
}

const LIMIT_TYPES: &[&str] = &["VCPUS", "STORAGE", "MEMORY"];

fn expand_spec(config: &ProjectConfig, mut resources: ProjectResources) -> Result<Spec<ProjectResources>> {
    for limit in &config.resource_limits {
        if !LIMIT_TYPES.contains(&limit.resource_type.as_str()) {
            return Err(ProviderError::validation(format!(
                "resource_limits: unknown resource_type '{}' (expected one of {})",
                limit.resource_type,
                LIMIT_TYPES.join(", ")
            )));
        }
    }

    let mut subnets = config.subnet_uuids.clone();
    if let Some(default_subnet) = &config.default_subnet_uuid {
        if !subnets.contains(default_subnet) {
            subnets.push(default_subnet.clone());
        }
    }

    resources.resource_domain = if config.resource_limits.is_empty() {
        None
    } else {
        Some(ResourceDomain {
            resources: config
                .resource_limits
                .iter()
                .map(|l| ResourceLimit {
                    resource_type: l.resource_type.clone(),
                    limit: l.limit,
                    units: None,
                    value: None,
                })
                .collect(),
        })
    };
    resources.default_subnet_reference = config
        .default_subnet_uuid
        .as_deref()
        .map(|u| common::reference("default_subnet_uuid", "subnet", u))
        .transpose()?;
    resources.subnet_reference_list = common::references("subnet_uuids", "subnet", &subnets)?;
    resources.user_reference_list = common::references("user_uuids", "user", &config.user_uuids)?;
    resources.external_user_group_reference_list = common::references(
        "external_user_group_uuids",
        "user_group",
        &config.external_user_group_uuids,
    )?;
    resources.is_default = Some(config.is_default);

    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources,
        cluster_reference: None,
    })
}

pub fn flatten(response: &IntentResponse<ProjectResources>) -> Result<ProjectState> {
    let resources = response.resources().cloned().unwrap_or_default();
    Ok(ProjectState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        is_default: resources.is_default.unwrap_or(false),
        resource_limits: resources
            .resource_domain
            .map(|d| {
                d.resources
                    .into_iter()
                    .map(|r| LimitConfig {
                        resource_type: r.resource_type,
                        limit: r.limit,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        default_subnet_uuid: resources.default_subnet_reference.map(|r| r.uuid),
        subnet_uuids: common::reference_uuids(&resources.subnet_reference_list),
        user_uuids: common::reference_uuids(&resources.user_reference_list),
        external_user_group_uuids: common::reference_uuids(&resources.external_user_group_reference_list),
        categories: response.metadata.categories.clone(),
        state: common::entity_state(response),
    })
}

pub struct Project;

impl Resource for Project {
    const TYPE_NAME: &'static str = "nutanix_project";
    type Config = ProjectConfig;
    type State = ProjectState;

    async fn create(client: &NutanixClient, config: ProjectConfig) -> Result<ProjectState> {
        let metadata = common::new_metadata(ProjectKind::KIND, &config.categories, None)?;
        let spec = expand_spec(&config, ProjectResources::default())?;
        let uuid = client
            .create_and_wait::<ProjectKind>(&IntentInput::new(metadata, spec), &client.poll.entity)
            .await?;
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<ProjectState>> {
        match found(client.get_entity::<ProjectKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(client: &NutanixClient, id: &str, config: ProjectConfig) -> Result<ProjectState> {
        let input = common::build_update::<ProjectKind, _>(client, id, &config.categories, None, |current| {
            expand_spec(&config, current.map(|s| s.resources).unwrap_or_default())
        })
        .await?;
        client
            .update_and_wait::<ProjectKind>(id, &input, &client.poll.entity)
            .await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client.delete_and_wait::<ProjectKind>(id, &client.poll.entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUBNET: &str = "6b1f0c2a-3d4e-4f50-8a6b-7c8d9e0f1a2b";

    #[test]
    fn test_default_subnet_joins_subnet_list() {
        let config: ProjectConfig = serde_json::from_value(json!({
            "name": "dev",
            "default_subnet_uuid": SUBNET,
            "resource_limits": [{"resource_type": "VCPUS", "limit": 32}]
        }))
        .unwrap();
        let spec = expand_spec(&config, ProjectResources::default()).unwrap();
        assert_eq!(spec.resources.subnet_reference_list.len(), 1);
        assert_eq!(spec.resources.subnet_reference_list[0].uuid, SUBNET);
        assert_eq!(spec.resources.resource_domain.unwrap().resources[0].limit, 32);
    }

    #[test]
    fn test_unknown_limit_type() {
        let config: ProjectConfig = serde_json::from_value(json!({
            "name": "dev",
            "resource_limits": [{"resource_type": "GPUS", "limit": 1}]
        }))
        .unwrap();
        assert!(expand_spec(&config, ProjectResources::default())
            .unwrap_err()
            .to_string()
            .contains("GPUS"));
    }
}
