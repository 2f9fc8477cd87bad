//! nutanix_address_group

use super::{read_back, Resource};
use crate::client::v3::remap_not_found;
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;

const PATH: &str = "address_groups";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressBlock {
    pub ip: String,
    pub prefix_length: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressGroupInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub ip_address_block_list: Vec<AddressBlock>,
    /// Server-rendered summary, never sent
    #[serde(default, skip_serializing)]
    pub address_group_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedGroup {
    uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AddressGroupResponse {
    #[serde(default)]
    uuid: Option<String>,
    address_group: AddressGroupInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressGroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub ip_address_block_list: Vec<AddressBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AddressGroupState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub ip_address_block_list: Vec<AddressBlock>,
    pub address_group_string: Option<String>,
}

fn expand(config: &AddressGroupConfig) -> Result<AddressGroupInput> {
    if config.ip_address_block_list.is_empty() {
        return Err(ProviderError::validation(
            "ip_address_block_list: at least one block is required",
        ));
    }
    for (i, block) in config.ip_address_block_list.iter().enumerate() {
        if block.ip.parse::<Ipv4Addr>().is_err() {
            return Err(ProviderError::validation(format!(
                "ip_address_block_list[{}].ip: '{}' is not an IPv4 address",
                i, block.ip
            )));
        }
        if !(0..=32).contains(&block.prefix_length) {
            return Err(ProviderError::validation(format!(
                "ip_address_block_list[{}].prefix_length: {} is out of range 0-32",
                i, block.prefix_length
            )));
        }
    }
    Ok(AddressGroupInput {
        name: config.name.clone(),
        description: config.description.clone(),
        ip_address_block_list: config.ip_address_block_list.clone(),
        address_group_string: None,
    })
}

pub struct AddressGroup;

impl Resource for AddressGroup {
    const TYPE_NAME: &'static str = "nutanix_address_group";
    type Config = AddressGroupConfig;
    type State = AddressGroupState;

    async fn create(client: &NutanixClient, config: AddressGroupConfig) -> Result<AddressGroupState> {
        let body = expand(&config)?;
        let url = client.v3_url(PATH)?;
        let created: CreatedGroup = client
            .post(&url, &body)
            .await
            .with_context(|| format!("error creating address group {}", config.name))?;
        tracing::info!("Created address group {} ({})", config.name, created.uuid);
        read_back::<Self>(client, &created.uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<AddressGroupState>> {
        let url = client.v3_url(&format!("{}/{}", PATH, id))?;
        let response = match client.get::<AddressGroupResponse>(&url).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let group = response.address_group;
        Ok(Some(AddressGroupState {
            id: response.uuid.unwrap_or_else(|| id.to_string()),
            name: group.name,
            description: group.description,
            ip_address_block_list: group.ip_address_block_list,
            address_group_string: group.address_group_string,
        }))
    }

    async fn update(
        client: &NutanixClient,
        id: &str,
        config: AddressGroupConfig,
    ) -> Result<AddressGroupState> {
        let body = expand(&config)?;
        let url = client.v3_url(&format!("{}/{}", PATH, id))?;
        let _: Option<Value> = client
            .put(&url, &body)
            .await
            .map_err(|e| remap_not_found(e, "address_group", id))?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        let url = client.v3_url(&format!("{}/{}", PATH, id))?;
        match client.delete::<Option<Value>>(&url).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> AddressGroupConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let err = expand(&config(json!({
            "name": "office",
            "ip_address_block_list": [{"ip": "10.0.0.0", "prefix_length": 33}]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("prefix_length"));
    }

    #[test]
    fn test_rejects_ipv6() {
        assert!(expand(&config(json!({
            "name": "office",
            "ip_address_block_list": [{"ip": "fd00::1", "prefix_length": 64}]
        })))
        .is_err());
    }

    #[test]
    fn test_body_omits_server_summary() {
        let body = expand(&config(json!({
            "name": "office",
            "ip_address_block_list": [{"ip": "10.1.0.0", "prefix_length": 16}]
        })))
        .unwrap();
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("address_group_string").is_none());
        assert_eq!(value["ip_address_block_list"][0]["prefix_length"], 16);
    }
}
