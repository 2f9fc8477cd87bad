//! nutanix_role

use super::common::{self, found};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct RoleKind;

impl V3Kind for RoleKind {
    const KIND: &'static str = "role";
    const PATH: &'static str = "roles";
    type Resources = RoleResources;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleResources {
    #[serde(default)]
    pub permission_reference_list: Vec<Reference>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub permission_uuids: Vec<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoleState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub permission_uuids: Vec<String>,
    pub categories: BTreeMap<String, String>,
    pub state: Option<String>,
}

fn expand_spec(config: &RoleConfig, mut resources: RoleResources) -> Result<Spec<RoleResources>> {
    if config.permission_uuids.is_empty() {
        return Err(ProviderError::validation(
            "permission_uuids: a role needs at least one permission",
        ));
    }
    resources.permission_reference_list =
        common::references("permission_uuids", "permission", &config.permission_uuids)?;
    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources,
        cluster_reference: None,
    })
}

pub fn flatten(response: &IntentResponse<RoleResources>) -> Result<RoleState> {
    let resources = response.resources().cloned().unwrap_or_default();
    Ok(RoleState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        permission_uuids: common::reference_uuids(&resources.permission_reference_list),
        categories: response.metadata.categories.clone(),
        state: common::entity_state(response),
    })
}

pub struct Role;

impl Resource for Role {
    const TYPE_NAME: &'static str = "nutanix_role";
    type Config = RoleConfig;
    type State = RoleState;

    async fn create(client: &NutanixClient, config: RoleConfig) -> Result<RoleState> {
        let metadata = common::new_metadata(RoleKind::KIND, &config.categories, None)?;
        let spec = expand_spec(&config, RoleResources::default())?;
        let uuid = client
            .create_and_wait::<RoleKind>(&IntentInput::new(metadata, spec), &client.poll.entity)
            .await?;
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<RoleState>> {
        match found(client.get_entity::<RoleKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(client: &NutanixClient, id: &str, config: RoleConfig) -> Result<RoleState> {
        let input = common::build_update::<RoleKind, _>(client, id, &config.categories, None, |current| {
            expand_spec(&config, current.map(|s| s.resources).unwrap_or_default())
        })
        .await?;
        client
            .update_and_wait::<RoleKind>(id, &input, &client.poll.entity)
            .await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client.delete_and_wait::<RoleKind>(id, &client.poll.entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_needs_a_permission() {
        let config: RoleConfig =
            serde_json::from_value(json!({"name": "viewer", "permission_uuids": []})).unwrap();
        assert!(matches!(
            expand_spec(&config, RoleResources::default()),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_permission_references() {
        let config: RoleConfig = serde_json::from_value(json!({
            "name": "viewer",
            "permission_uuids": ["a0c3e5f7-1b2d-4e6f-8a9b-0c1d2e3f4a5b"]
        }))
        .unwrap();
        let spec = expand_spec(&config, RoleResources::default()).unwrap();
        assert_eq!(spec.resources.permission_reference_list[0].kind, "permission");
    }
}
