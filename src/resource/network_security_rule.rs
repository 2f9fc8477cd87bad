//! nutanix_network_security_rule
//!
//! Flow microsegmentation rules. A rule carries an application rule, an
//! identity (AD) rule or an isolation rule; rule kinds the configuration does
//! not name (quarantine) are sent back unchanged on update.

use super::common::{self, found};
use super::data_source::DataSource;
use super::service_group::{check_range, IcmpTypeCode, PortRange};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct NetworkSecurityRuleKind;

impl V3Kind for NetworkSecurityRuleKind {
    const KIND: &'static str = "network_security_rule";
    const PATH: &'static str = "network_security_rules";
    type Resources = RuleResources;
}

// =============================================================================
// API types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kind_list: Vec<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpSubnet {
    pub ip: String,
    pub prefix_length: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_subnet: Option<IpSubnet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_port_range_list: Vec<PortRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub udp_port_range_list: Vec<PortRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icmp_type_code_list: Vec<IcmpTypeCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<CategoryFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_specification_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_function_chain_reference: Option<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_internal_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_specification_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<CategoryFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group: Option<TargetGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbound_allow_list: Vec<NetworkRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outbound_allow_list: Vec<NetworkRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiIsolationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_entity_filter: Option<CategoryFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_entity_filter: Option<CategoryFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_ipv6_traffic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_policy_hitlog_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_rule: Option<ApiRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_rule: Option<ApiRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_rule: Option<ApiIsolationRule>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// =============================================================================
// Configuration and state
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParam {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub kind_list: Vec<String>,
    #[serde(default, rename = "type")]
    pub filter_type: Option<String>,
    #[serde(default)]
    pub params: Vec<FilterParam>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetGroupConfig {
    #[serde(default)]
    pub default_internal_policy: Option<String>,
    #[serde(default)]
    pub peer_specification_type: Option<String>,
    #[serde(default)]
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowEntry {
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub ip_subnet: Option<String>,
    #[serde(default)]
    pub ip_subnet_prefix_length: Option<i64>,
    #[serde(default)]
    pub tcp_port_range_list: Vec<PortRange>,
    #[serde(default)]
    pub udp_port_range_list: Vec<PortRange>,
    #[serde(default)]
    pub icmp_type_code_list: Vec<IcmpTypeCode>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub peer_specification_type: Option<String>,
    #[serde(default)]
    pub expiration_time: Option<String>,
    #[serde(default)]
    pub network_function_chain_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub target_group: Option<TargetGroupConfig>,
    #[serde(default)]
    pub inbound_allow_list: Vec<AllowEntry>,
    #[serde(default)]
    pub outbound_allow_list: Vec<AllowEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsolationRuleConfig {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub first_entity_filter: Option<Filter>,
    #[serde(default)]
    pub second_entity_filter: Option<Filter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSecurityRuleConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allow_ipv6_traffic: Option<bool>,
    #[serde(default)]
    pub is_policy_hitlog_enabled: Option<bool>,
    #[serde(default)]
    pub app_rule: Option<RuleConfig>,
    #[serde(default)]
    pub ad_rule: Option<RuleConfig>,
    #[serde(default)]
    pub isolation_rule: Option<IsolationRuleConfig>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default)]
    pub project_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkSecurityRuleState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub allow_ipv6_traffic: Option<bool>,
    pub is_policy_hitlog_enabled: Option<bool>,
    pub app_rule: Option<RuleConfig>,
    pub ad_rule: Option<RuleConfig>,
    pub isolation_rule: Option<IsolationRuleConfig>,
    pub categories: BTreeMap<String, String>,
    pub project_uuid: Option<String>,
    pub state: Option<String>,
    pub spec_version: Option<i64>,
}

// =============================================================================
// Expand / flatten
// =============================================================================

fn expand_filter(filter: &Filter) -> CategoryFilter {
    CategoryFilter {
        kind_list: filter.kind_list.clone(),
        filter_type: filter.filter_type.clone(),
        params: filter
            .params
            .iter()
            .filter(|p| !p.name.is_empty() && !p.values.is_empty())
            .map(|p| (p.name.clone(), p.values.clone()))
            .collect(),
    }
}

fn expand_entry(path: &str, entry: &AllowEntry) -> Result<NetworkRule> {
    let ip_subnet = match (&entry.ip_subnet, entry.ip_subnet_prefix_length) {
        (Some(ip), Some(prefix_length)) => {
            if !(0..=32).contains(&prefix_length) {
                return Err(ProviderError::validation(format!(
                    "{}.ip_subnet_prefix_length: {} is out of range 0-32",
                    path, prefix_length
                )));
            }
            Some(IpSubnet {
                ip: ip.clone(),
                prefix_length,
            })
        }
        (None, None) => None,
        _ => {
            return Err(ProviderError::validation(format!(
                "{}: ip_subnet and ip_subnet_prefix_length go together",
                path
            )))
        }
    };
    for range in &entry.tcp_port_range_list {
        check_range(&format!("{}.tcp_port_range_list", path), range)?;
    }
    for range in &entry.udp_port_range_list {
        check_range(&format!("{}.udp_port_range_list", path), range)?;
    }
    let network_function_chain_reference = entry
        .network_function_chain_uuid
        .as_deref()
        .map(|uuid| {
            common::reference(
                &format!("{}.network_function_chain_uuid", path),
                "network_function_chain",
                uuid,
            )
        })
        .transpose()?;

    Ok(NetworkRule {
        protocol: entry.protocol.clone(),
        ip_subnet,
        tcp_port_range_list: entry.tcp_port_range_list.clone(),
        udp_port_range_list: entry.udp_port_range_list.clone(),
        icmp_type_code_list: entry.icmp_type_code_list.clone(),
        filter: entry.filter.as_ref().map(expand_filter),
        peer_specification_type: entry.peer_specification_type.clone(),
        expiration_time: entry.expiration_time.clone(),
        network_function_chain_reference,
    })
}

fn expand_rule(prefix: &str, rule: &RuleConfig) -> Result<ApiRule> {
    let entries = |list: &[AllowEntry], name: &str| -> Result<Vec<NetworkRule>> {
        list.iter()
            .enumerate()
            .map(|(i, entry)| expand_entry(&format!("{}.{}[{}]", prefix, name, i), entry))
            .collect()
    };
    Ok(ApiRule {
        action: rule.action.clone(),
        target_group: rule.target_group.as_ref().map(|group| TargetGroup {
            default_internal_policy: group.default_internal_policy.clone(),
            peer_specification_type: group.peer_specification_type.clone(),
            filter: group.filter.as_ref().map(expand_filter),
        }),
        inbound_allow_list: entries(&rule.inbound_allow_list, "inbound_allow_list")?,
        outbound_allow_list: entries(&rule.outbound_allow_list, "outbound_allow_list")?,
    })
}

fn expand_resources(
    config: &NetworkSecurityRuleConfig,
    mut resources: RuleResources,
) -> Result<RuleResources> {
    if config.isolation_rule.is_some() && (config.app_rule.is_some() || config.ad_rule.is_some()) {
        return Err(ProviderError::validation(
            "isolation_rule cannot be combined with app_rule or ad_rule",
        ));
    }

    resources.allow_ipv6_traffic = config.allow_ipv6_traffic;
    resources.is_policy_hitlog_enabled = config.is_policy_hitlog_enabled;
    resources.app_rule = config
        .app_rule
        .as_ref()
        .map(|r| expand_rule("app_rule", r))
        .transpose()?;
    resources.ad_rule = config
        .ad_rule
        .as_ref()
        .map(|r| expand_rule("ad_rule", r))
        .transpose()?;
    resources.isolation_rule = config.isolation_rule.as_ref().map(|rule| ApiIsolationRule {
        action: rule.action.clone(),
        first_entity_filter: rule.first_entity_filter.as_ref().map(expand_filter),
        second_entity_filter: rule.second_entity_filter.as_ref().map(expand_filter),
    });
    Ok(resources)
}

fn expand_spec(
    config: &NetworkSecurityRuleConfig,
    resources: RuleResources,
) -> Result<Spec<RuleResources>> {
    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources: expand_resources(config, resources)?,
        cluster_reference: None,
    })
}

fn flatten_filter(filter: &CategoryFilter) -> Filter {
    Filter {
        kind_list: filter.kind_list.clone(),
        filter_type: filter.filter_type.clone(),
        params: filter
            .params
            .iter()
            .map(|(name, values)| FilterParam {
                name: name.clone(),
                values: values.clone(),
            })
            .collect(),
    }
}

fn flatten_entry(rule: &NetworkRule) -> AllowEntry {
    AllowEntry {
        protocol: rule.protocol.clone(),
        ip_subnet: rule.ip_subnet.as_ref().map(|s| s.ip.clone()),
        ip_subnet_prefix_length: rule.ip_subnet.as_ref().map(|s| s.prefix_length),
        tcp_port_range_list: rule.tcp_port_range_list.clone(),
        udp_port_range_list: rule.udp_port_range_list.clone(),
        icmp_type_code_list: rule.icmp_type_code_list.clone(),
        filter: rule.filter.as_ref().map(flatten_filter),
        peer_specification_type: rule.peer_specification_type.clone(),
        expiration_time: rule.expiration_time.clone(),
        network_function_chain_uuid: rule
            .network_function_chain_reference
            .as_ref()
            .map(|r| r.uuid.clone()),
    }
}

fn flatten_rule(rule: &ApiRule) -> RuleConfig {
    RuleConfig {
        action: rule.action.clone(),
        target_group: rule.target_group.as_ref().map(|group| TargetGroupConfig {
            default_internal_policy: group.default_internal_policy.clone(),
            peer_specification_type: group.peer_specification_type.clone(),
            filter: group.filter.as_ref().map(flatten_filter),
        }),
        inbound_allow_list: rule.inbound_allow_list.iter().map(flatten_entry).collect(),
        outbound_allow_list: rule.outbound_allow_list.iter().map(flatten_entry).collect(),
    }
}

pub fn flatten(response: &IntentResponse<RuleResources>) -> Result<NetworkSecurityRuleState> {
    // Rules are read from spec: status drops unset optional lists
    let resources = response
        .spec
        .as_ref()
        .map(|s| s.resources.clone())
        .or_else(|| response.resources().cloned())
        .unwrap_or_default();

    Ok(NetworkSecurityRuleState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        allow_ipv6_traffic: resources.allow_ipv6_traffic,
        is_policy_hitlog_enabled: resources.is_policy_hitlog_enabled,
        app_rule: resources.app_rule.as_ref().map(flatten_rule),
        ad_rule: resources.ad_rule.as_ref().map(flatten_rule),
        isolation_rule: resources.isolation_rule.as_ref().map(|rule| IsolationRuleConfig {
            action: rule.action.clone(),
            first_entity_filter: rule.first_entity_filter.as_ref().map(flatten_filter),
            second_entity_filter: rule.second_entity_filter.as_ref().map(flatten_filter),
        }),
        categories: response.metadata.categories.clone(),
        project_uuid: response.metadata.project_reference.as_ref().map(|r| r.uuid.clone()),
        state: common::entity_state(response),
        spec_version: response.metadata.spec_version,
    })
}

// =============================================================================
// Lifecycle
// =============================================================================

pub struct NetworkSecurityRule;

impl Resource for NetworkSecurityRule {
    const TYPE_NAME: &'static str = "nutanix_network_security_rule";
    type Config = NetworkSecurityRuleConfig;
    type State = NetworkSecurityRuleState;

    async fn create(
        client: &NutanixClient,
        config: NetworkSecurityRuleConfig,
    ) -> Result<NetworkSecurityRuleState> {
        let metadata = common::new_metadata(
            NetworkSecurityRuleKind::KIND,
            &config.categories,
            config.project_uuid.as_deref(),
        )?;
        let spec = expand_spec(&config, RuleResources::default())?;
        let uuid = client
            .create_and_wait::<NetworkSecurityRuleKind>(
                &IntentInput::new(metadata, spec),
                &client.poll.entity,
            )
            .await?;
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<NetworkSecurityRuleState>> {
        match found(client.get_entity::<NetworkSecurityRuleKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(
        client: &NutanixClient,
        id: &str,
        config: NetworkSecurityRuleConfig,
    ) -> Result<NetworkSecurityRuleState> {
        let input = common::build_update::<NetworkSecurityRuleKind, _>(
            client,
            id,
            &config.categories,
            config.project_uuid.as_deref(),
            |current| expand_spec(&config, current.map(|s| s.resources).unwrap_or_default()),
        )
        .await?;
        client
            .update_and_wait::<NetworkSecurityRuleKind>(id, &input, &client.poll.entity)
            .await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client
            .delete_and_wait::<NetworkSecurityRuleKind>(id, &client.poll.entity)
            .await
    }
}

// =============================================================================
// Data source
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSecurityRuleQuery {
    pub network_security_rule_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSecurityRuleLookupState {
    pub network_security_rule_id: String,
    #[serde(flatten)]
    pub rule: NetworkSecurityRuleState,
}

/// `nutanix_network_security_rule` data source; a missing rule is an error
pub struct NetworkSecurityRuleLookup;

impl DataSource for NetworkSecurityRuleLookup {
    const TYPE_NAME: &'static str = "nutanix_network_security_rule";
    type Query = NetworkSecurityRuleQuery;
    type State = NetworkSecurityRuleLookupState;

    async fn read(
        client: &NutanixClient,
        query: NetworkSecurityRuleQuery,
    ) -> Result<NetworkSecurityRuleLookupState> {
        common::check_uuid("network_security_rule_id", &query.network_security_rule_id)?;
        let response = client
            .get_entity::<NetworkSecurityRuleKind>(&query.network_security_rule_id)
            .await?;
        Ok(NetworkSecurityRuleLookupState {
            network_security_rule_id: query.network_security_rule_id,
            rule: flatten(&response)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NFC: &str = "0f3a6d1e-2b7c-4e8a-9c1d-5f6e7a8b9c0d";

    fn config(value: Value) -> NetworkSecurityRuleConfig {
        serde_json::from_value(value).unwrap()
    }

    fn app_config() -> NetworkSecurityRuleConfig {
        config(json!({
            "name": "web-tier",
            "app_rule": {
                "action": "APPLY",
                "target_group": {
                    "default_internal_policy": "DENY_ALL",
                    "peer_specification_type": "FILTER",
                    "filter": {
                        "kind_list": ["vm"],
                        "type": "CATEGORIES_MATCH_ALL",
                        "params": [{"name": "AppType", "values": ["Web"]}]
                    }
                },
                "inbound_allow_list": [{
                    "protocol": "TCP",
                    "ip_subnet": "10.0.0.0",
                    "ip_subnet_prefix_length": 8,
                    "tcp_port_range_list": [{"start_port": 443, "end_port": 443}],
                    "peer_specification_type": "IP_SUBNET"
                }],
                "outbound_allow_list": [{
                    "peer_specification_type": "ALL",
                    "network_function_chain_uuid": NFC
                }]
            }
        }))
    }

    #[test]
    fn test_expand_app_rule_body() {
        let spec = expand_spec(&app_config(), RuleResources::default()).unwrap();
        let body = serde_json::to_value(&spec).unwrap();
        let rule = &body["resources"]["app_rule"];

        assert_eq!(rule["target_group"]["filter"]["params"]["AppType"], json!(["Web"]));
        assert_eq!(rule["target_group"]["filter"]["type"], "CATEGORIES_MATCH_ALL");
        assert_eq!(rule["inbound_allow_list"][0]["ip_subnet"]["prefix_length"], 8);
        assert_eq!(rule["inbound_allow_list"][0]["tcp_port_range_list"][0]["start_port"], 443);
        assert_eq!(
            rule["outbound_allow_list"][0]["network_function_chain_reference"]["kind"],
            "network_function_chain"
        );
        assert!(body["resources"].get("isolation_rule").is_none());
    }

    #[test]
    fn test_update_keeps_quarantine_rule() {
        let mut current = RuleResources::default();
        current
            .other
            .insert("quarantine_rule".to_string(), json!({"action": "APPLY"}));
        current.isolation_rule = Some(ApiIsolationRule::default());

        let resources = expand_resources(&app_config(), current).unwrap();
        assert!(resources.isolation_rule.is_none());
        assert_eq!(resources.other["quarantine_rule"]["action"], "APPLY");
    }

    #[test]
    fn test_ip_subnet_needs_prefix_length() {
        let cfg = config(json!({
            "name": "r",
            "app_rule": {"inbound_allow_list": [{"ip_subnet": "10.0.0.0"}]}
        }));
        let err = expand_spec(&cfg, RuleResources::default()).unwrap_err();
        assert!(err
            .to_string()
            .contains("app_rule.inbound_allow_list[0]: ip_subnet and ip_subnet_prefix_length go together"));
    }

    #[test]
    fn test_rejects_inverted_port_range() {
        let cfg = config(json!({
            "name": "r",
            "ad_rule": {"outbound_allow_list": [{
                "protocol": "UDP",
                "udp_port_range_list": [{"start_port": 53, "end_port": 1}]
            }]}
        }));
        let err = expand_spec(&cfg, RuleResources::default()).unwrap_err();
        assert!(err.to_string().contains("ad_rule.outbound_allow_list[0].udp_port_range_list"));
    }

    #[test]
    fn test_isolation_excludes_app_rule() {
        let cfg = config(json!({
            "name": "r",
            "app_rule": {"action": "MONITOR"},
            "isolation_rule": {"action": "APPLY"}
        }));
        assert!(expand_spec(&cfg, RuleResources::default()).is_err());
    }

    #[test]
    fn test_flatten_isolation_rule() {
        let response: IntentResponse<RuleResources> = serde_json::from_value(json!({
            "metadata": {"kind": "network_security_rule", "uuid": "r-1", "spec_version": 3},
            "spec": {
                "name": "isolate-dev",
                "resources": {
                    "allow_ipv6_traffic": false,
                    "isolation_rule": {
                        "action": "APPLY",
                        "first_entity_filter": {"kind_list": ["vm"], "type": "CATEGORIES_MATCH_ALL",
                            "params": {"Environment": ["Dev"]}},
                        "second_entity_filter": {"kind_list": ["vm"], "type": "CATEGORIES_MATCH_ALL",
                            "params": {"Environment": ["Production"]}}
                    }
                }
            },
            "status": {"state": "COMPLETE", "name": "isolate-dev", "resources": {}}
        }))
        .unwrap();

        let state = flatten(&response).unwrap();
        assert_eq!(state.name, "isolate-dev");
        assert_eq!(state.allow_ipv6_traffic, Some(false));
        let isolation = state.isolation_rule.unwrap();
        assert_eq!(
            isolation.second_entity_filter.unwrap().params,
            vec![FilterParam {
                name: "Environment".to_string(),
                values: vec!["Production".to_string()],
            }]
        );
        assert!(state.app_rule.is_none());
        assert_eq!(state.spec_version, Some(3));
    }
}
