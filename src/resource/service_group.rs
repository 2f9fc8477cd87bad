//! nutanix_service_group
//!
//! Service groups are not intent entities: writes apply synchronously and
//! return no task.

use super::{read_back, Resource};
use crate::client::v3::remap_not_found;
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PATH: &str = "service_groups";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortRange {
    pub start_port: i64,
    pub end_port: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IcmpTypeCode {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_port_range_list: Vec<PortRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub udp_port_range_list: Vec<PortRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icmp_type_code_list: Vec<IcmpTypeCode>,
}

/// Request body for create and update, also the shape of the read payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceGroupInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub service_list: Vec<ServiceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_system_defined: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedGroup {
    uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceGroupResponse {
    #[serde(default)]
    uuid: Option<String>,
    service_group: ServiceGroupInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceGroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub service_list: Vec<ServiceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceGroupState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub service_list: Vec<ServiceEntry>,
    pub is_system_defined: bool,
}

pub(crate) fn check_range(field: &str, range: &PortRange) -> Result<()> {
    let valid = |p: i64| (0..=65535).contains(&p);
    if !valid(range.start_port) || !valid(range.end_port) || range.start_port > range.end_port {
        return Err(ProviderError::validation(format!(
            "{}: invalid port range {}-{}",
            field, range.start_port, range.end_port
        )));
    }
    Ok(())
}

fn expand(config: &ServiceGroupConfig) -> Result<ServiceGroupInput> {
    if config.service_list.is_empty() {
        return Err(ProviderError::validation("service_list: at least one service is required"));
    }
    for (i, service) in config.service_list.iter().enumerate() {
        match service.protocol.as_str() {
            "TCP" | "UDP" | "ICMP" => {}
            other => {
                return Err(ProviderError::validation(format!(
                    "service_list[{}].protocol: '{}' is not one of TCP, UDP, ICMP",
                    i, other
                )))
            }
        }
        for range in &service.tcp_port_range_list {
            check_range(&format!("service_list[{}].tcp_port_range_list", i), range)?;
        }
        for range in &service.udp_port_range_list {
            check_range(&format!("service_list[{}].udp_port_range_list", i), range)?;
        }
    }
    Ok(ServiceGroupInput {
        name: config.name.clone(),
        description: config.description.clone(),
        service_list: config.service_list.clone(),
        is_system_defined: None,
    })
}

fn flatten(id: &str, group: ServiceGroupInput) -> ServiceGroupState {
    ServiceGroupState {
        id: id.to_string(),
        name: group.name,
        description: group.description,
        service_list: group.service_list,
        is_system_defined: group.is_system_defined.unwrap_or(false),
    }
}

pub struct ServiceGroup;

impl Resource for ServiceGroup {
    const TYPE_NAME: &'static str = "nutanix_service_group";
    type Config = ServiceGroupConfig;
    type State = ServiceGroupState;

    async fn create(client: &NutanixClient, config: ServiceGroupConfig) -> Result<ServiceGroupState> {
        let body = expand(&config)?;
        let url = client.v3_url(PATH)?;
        let created: CreatedGroup = client
            .post(&url, &body)
            .await
            .with_context(|| format!("error creating service group {}", config.name))?;
        tracing::info!("Created service group {} ({})", config.name, created.uuid);
        read_back::<Self>(client, &created.uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<ServiceGroupState>> {
        let url = client.v3_url(&format!("{}/{}", PATH, id))?;
        match client.get::<ServiceGroupResponse>(&url).await {
            Ok(response) => {
                let uuid = response.uuid.unwrap_or_else(|| id.to_string());
                Ok(Some(flatten(&uuid, response.service_group)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(
        client: &NutanixClient,
        id: &str,
        config: ServiceGroupConfig,
    ) -> Result<ServiceGroupState> {
        let body = expand(&config)?;
        let url = client.v3_url(&format!("{}/{}", PATH, id))?;
        let _: Option<Value> = client
            .put(&url, &body)
            .await
            .map_err(|e| remap_not_found(e, "service_group", id))?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        let url = client.v3_url(&format!("{}/{}", PATH, id))?;
        match client.delete::<Option<Value>>(&url).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::info!("service_group {} already deleted", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> ServiceGroupConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_expand_body() {
        let body = expand(&config(json!({
            "name": "web",
            "service_list": [
                {"protocol": "TCP", "tcp_port_range_list": [{"start_port": 80, "end_port": 80}]},
                {"protocol": "ICMP", "icmp_type_code_list": [{"type": 8, "code": 0}]}
            ]
        })))
        .unwrap();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["service_list"][0]["tcp_port_range_list"][0]["end_port"], 80);
        assert_eq!(value["service_list"][1]["icmp_type_code_list"][0]["type"], 8);
        assert!(value["service_list"][0].get("udp_port_range_list").is_none());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let err = expand(&config(json!({
            "name": "web",
            "service_list": [{"protocol": "UDP", "udp_port_range_list": [{"start_port": 90, "end_port": 80}]}]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("90-80"));
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        assert!(expand(&config(json!({"name": "x", "service_list": [{"protocol": "SCTP"}]}))).is_err());
    }
}
