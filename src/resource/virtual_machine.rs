//! nutanix_virtual_machine
//!
//! Changes the hypervisor cannot apply to a running guest (removing CPU or
//! memory, a new name, boot or cloud-init changes, removed NICs or disks) are
//! applied with the VM powered off, then the requested power state is
//! restored.

use super::common::{self, found};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use crate::poll::{Observation, StateChangeConf};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const IP_PENDING: &[&str] = &["WAITING"];
pub const IP_TARGET: &[&str] = &["AVAILABLE"];
pub const POWER_PENDING: &[&str] = &["PENDING", "RUNNING"];
pub const POWER_TARGET: &[&str] = &["COMPLETE"];

pub struct VmKind;

impl V3Kind for VmKind {
    const KIND: &'static str = "vm";
    const PATH: &'static str = "vms";
    type Resources = VmResources;
}

// =============================================================================
// API types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub endpoint_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmNic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_endpoint_list: Vec<IpEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_address: Option<DiskAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_mib: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_properties: Option<DeviceProperties>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_type: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestCustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<CloudInit>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_sockets: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_vcpus_per_socket: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size_mib: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,
    #[serde(default)]
    pub nic_list: Vec<VmNic>,
    #[serde(default)]
    pub disk_list: Vec<VmDisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_config: Option<BootConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_customization: Option<GuestCustomization>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// =============================================================================
// Configuration and state
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NicConfig {
    pub subnet_uuid: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(default)]
    pub disk_size_mib: Option<i64>,
    #[serde(default)]
    pub image_uuid: Option<String>,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default = "default_adapter_type")]
    pub adapter_type: String,
}

fn default_device_type() -> String {
    "DISK".to_string()
}

fn default_adapter_type() -> String {
    "SCSI".to_string()
}

fn default_one() -> i64 {
    1
}

fn default_memory() -> i64 {
    1024
}

fn default_power_state() -> String {
    "ON".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub cluster_uuid: String,
    #[serde(default = "default_one")]
    pub num_sockets: i64,
    #[serde(default = "default_one")]
    pub num_vcpus_per_socket: i64,
    #[serde(default = "default_memory")]
    pub memory_size_mib: i64,
    #[serde(default = "default_power_state")]
    pub power_state: String,
    /// Grow CPU and memory without a power cycle
    #[serde(default = "default_true")]
    pub use_hot_add: bool,
    #[serde(default)]
    pub boot_type: Option<String>,
    /// Plain text, encoded before it is sent
    #[serde(default)]
    pub guest_customization_cloud_init_user_data: Option<String>,
    #[serde(default)]
    pub nic_list: Vec<NicConfig>,
    #[serde(default)]
    pub disk_list: Vec<DiskConfig>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default)]
    pub project_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NicState {
    pub uuid: Option<String>,
    pub subnet_uuid: Option<String>,
    pub subnet_name: Option<String>,
    pub mac_address: Option<String>,
    pub model: Option<String>,
    pub ip_endpoint_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskState {
    pub uuid: Option<String>,
    pub disk_size_mib: Option<i64>,
    pub image_uuid: Option<String>,
    pub device_type: Option<String>,
    pub adapter_type: Option<String>,
    pub device_index: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VmState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub cluster_uuid: Option<String>,
    pub cluster_name: Option<String>,
    pub num_sockets: Option<i64>,
    pub num_vcpus_per_socket: Option<i64>,
    pub memory_size_mib: Option<i64>,
    pub power_state: Option<String>,
    pub boot_type: Option<String>,
    pub guest_customization_cloud_init_user_data: Option<String>,
    /// First address reported on any NIC
    pub ip_address: Option<String>,
    pub nic_list: Vec<NicState>,
    pub disk_list: Vec<DiskState>,
    pub categories: BTreeMap<String, String>,
    pub project_uuid: Option<String>,
    pub state: Option<String>,
}

// =============================================================================
// Expand / flatten
// =============================================================================

fn validate(config: &VmConfig) -> Result<()> {
    if config.num_sockets < 1 || config.num_vcpus_per_socket < 1 {
        return Err(ProviderError::validation(
            "num_sockets and num_vcpus_per_socket must be at least 1",
        ));
    }
    if config.memory_size_mib < 1 {
        return Err(ProviderError::validation("memory_size_mib must be positive"));
    }
    if !matches!(config.power_state.as_str(), "ON" | "OFF") {
        return Err(ProviderError::validation(format!(
            "power_state '{}' must be ON or OFF",
            config.power_state
        )));
    }
    if let Some(boot) = &config.boot_type {
        if !matches!(boot.as_str(), "LEGACY" | "UEFI" | "SECURE_BOOT") {
            return Err(ProviderError::validation(format!(
                "boot_type '{}' must be LEGACY, UEFI or SECURE_BOOT",
                boot
            )));
        }
    }
    for (i, disk) in config.disk_list.iter().enumerate() {
        if disk.disk_size_mib.is_none() && disk.image_uuid.is_none() {
            return Err(ProviderError::validation(format!(
                "disk_list[{}]: disk_size_mib or image_uuid is required",
                i
            )));
        }
    }
    Ok(())
}

fn encoded_user_data(config: &VmConfig) -> Option<String> {
    config
        .guest_customization_cloud_init_user_data
        .as_ref()
        .map(|data| STANDARD.encode(data))
}

fn expand_nics(config: &VmConfig, current: &[VmNic]) -> Result<Vec<VmNic>> {
    config
        .nic_list
        .iter()
        .enumerate()
        .map(|(i, nic)| {
            let subnet = common::reference("nic_list.subnet_uuid", "subnet", &nic.subnet_uuid)?;
            // Same slot on the same subnet keeps its identity
            let mut expanded = match current.get(i) {
                Some(existing)
                    if existing.subnet_reference.as_ref().map(|r| r.uuid.as_str())
                        == Some(nic.subnet_uuid.as_str()) =>
                {
                    existing.clone()
                }
                _ => VmNic::default(),
            };
            expanded.subnet_reference = Some(subnet);
            expanded.ip_endpoint_list = nic
                .ip_address
                .iter()
                .map(|ip| IpEndpoint {
                    ip: Some(ip.clone()),
                    endpoint_type: Some("ASSIGNED".to_string()),
                })
                .collect();
            if nic.model.is_some() {
                expanded.model = nic.model.clone();
            }
            Ok(expanded)
        })
        .collect()
}

fn expand_disks(config: &VmConfig, current: &[VmDisk]) -> Result<Vec<VmDisk>> {
    config
        .disk_list
        .iter()
        .enumerate()
        .map(|(i, disk)| {
            let source = disk
                .image_uuid
                .as_deref()
                .map(|u| common::reference("disk_list.image_uuid", "image", u))
                .transpose()?;
            let mut expanded = match current.get(i) {
                Some(existing)
                    if existing.data_source_reference.as_ref().map(|r| r.uuid.as_str())
                        == disk.image_uuid.as_deref() =>
                {
                    existing.clone()
                }
                _ => VmDisk::default(),
            };
            if disk.disk_size_mib.is_some() {
                expanded.disk_size_mib = disk.disk_size_mib;
            }
            expanded.data_source_reference = source;
            let index = expanded
                .device_properties
                .as_ref()
                .and_then(|p| p.disk_address.as_ref())
                .and_then(|a| a.device_index);
            expanded.device_properties = Some(DeviceProperties {
                device_type: Some(disk.device_type.clone()),
                disk_address: Some(DiskAddress {
                    adapter_type: Some(disk.adapter_type.clone()),
                    device_index: index,
                }),
            });
            Ok(expanded)
        })
        .collect()
}

fn expand_resources(config: &VmConfig, mut resources: VmResources, power_state: &str) -> Result<VmResources> {
    resources.num_sockets = Some(config.num_sockets);
    resources.num_vcpus_per_socket = Some(config.num_vcpus_per_socket);
    resources.memory_size_mib = Some(config.memory_size_mib);
    resources.power_state = Some(power_state.to_string());
    resources.nic_list = expand_nics(config, &resources.nic_list)?;
    resources.disk_list = expand_disks(config, &resources.disk_list)?;

    match &config.boot_type {
        Some(boot_type) => {
            let mut boot = resources.boot_config.take().unwrap_or_default();
            boot.boot_type = Some(boot_type.clone());
            resources.boot_config = Some(boot);
        }
        None => {
            if let Some(boot) = resources.boot_config.as_mut() {
                boot.boot_type = None;
            }
        }
    }

    match encoded_user_data(config) {
        Some(user_data) => {
            let mut guest = resources.guest_customization.take().unwrap_or_default();
            let mut cloud_init = guest.cloud_init.take().unwrap_or_default();
            cloud_init.user_data = Some(user_data);
            guest.cloud_init = Some(cloud_init);
            resources.guest_customization = Some(guest);
        }
        None => resources.guest_customization = None,
    }
    Ok(resources)
}

fn expand_spec(config: &VmConfig, resources: VmResources, power_state: &str) -> Result<Spec<VmResources>> {
    validate(config)?;
    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources: expand_resources(config, resources, power_state)?,
        cluster_reference: Some(common::reference("cluster_uuid", "cluster", &config.cluster_uuid)?),
    })
}

/// True when applying `config` over `current` needs the VM powered off
fn needs_power_cycle(current: &Spec<VmResources>, config: &VmConfig) -> bool {
    let res = &current.resources;
    let grown_cold = |old: Option<i64>, new: i64| match old {
        Some(old) if new < old => true,
        Some(old) if new > old => !config.use_hot_add,
        _ => false,
    };
    let current_cluster = current.cluster_reference.as_ref().map(|r| r.uuid.as_str());
    let current_boot = res.boot_config.as_ref().and_then(|b| b.boot_type.as_deref());
    let current_user_data = res
        .guest_customization
        .as_ref()
        .and_then(|g| g.cloud_init.as_ref())
        .and_then(|c| c.user_data.clone());

    current.name != config.name
        || current_cluster.is_some_and(|c| c != config.cluster_uuid)
        || res.num_vcpus_per_socket.is_some_and(|v| v != config.num_vcpus_per_socket)
        || grown_cold(res.num_sockets, config.num_sockets)
        || grown_cold(res.memory_size_mib, config.memory_size_mib)
        || (config.boot_type.is_some() && current_boot != config.boot_type.as_deref())
        || current_user_data != encoded_user_data(config)
        || config.nic_list.len() < res.nic_list.len()
        || config.disk_list.len() < res.disk_list.len()
}

fn first_ip(nics: &[VmNic]) -> Option<String> {
    nics.iter()
        .flat_map(|n| n.ip_endpoint_list.iter())
        .find_map(|e| e.ip.clone())
}

pub fn flatten(response: &IntentResponse<VmResources>) -> Result<VmState> {
    let resources = response.resources().cloned().unwrap_or_default();
    let cluster = response
        .status
        .as_ref()
        .and_then(|s| s.cluster_reference.as_ref())
        .or_else(|| response.spec.as_ref().and_then(|s| s.cluster_reference.as_ref()));
    let user_data = resources
        .guest_customization
        .as_ref()
        .and_then(|g| g.cloud_init.as_ref())
        .and_then(|c| c.user_data.as_ref())
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());

    Ok(VmState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        cluster_uuid: cluster.map(|c| c.uuid.clone()),
        cluster_name: cluster.and_then(|c| c.name.clone()),
        num_sockets: resources.num_sockets,
        num_vcpus_per_socket: resources.num_vcpus_per_socket,
        memory_size_mib: resources.memory_size_mib,
        power_state: resources.power_state.clone(),
        boot_type: resources.boot_config.as_ref().and_then(|b| b.boot_type.clone()),
        guest_customization_cloud_init_user_data: user_data,
        ip_address: first_ip(&resources.nic_list),
        nic_list: resources
            .nic_list
            .iter()
            .map(|nic| NicState {
                uuid: nic.uuid.clone(),
                subnet_uuid: nic.subnet_reference.as_ref().map(|r| r.uuid.clone()),
                subnet_name: nic.subnet_reference.as_ref().and_then(|r| r.name.clone()),
                mac_address: nic.mac_address.clone(),
                model: nic.model.clone(),
                ip_endpoint_list: nic.ip_endpoint_list.iter().filter_map(|e| e.ip.clone()).collect(),
            })
            .collect(),
        disk_list: resources
            .disk_list
            .iter()
            .map(|disk| {
                let props = disk.device_properties.as_ref();
                let address = props.and_then(|p| p.disk_address.as_ref());
                DiskState {
                    uuid: disk.uuid.clone(),
                    disk_size_mib: disk.disk_size_mib,
                    image_uuid: disk.data_source_reference.as_ref().map(|r| r.uuid.clone()),
                    device_type: props.and_then(|p| p.device_type.clone()),
                    adapter_type: address.and_then(|a| a.adapter_type.clone()),
                    device_index: address.and_then(|a| a.device_index),
                }
            })
            .collect(),
        categories: response.metadata.categories.clone(),
        project_uuid: response.metadata.project_reference.as_ref().map(|r| r.uuid.clone()),
        state: common::entity_state(response),
    })
}

// =============================================================================
// Refresh functions
// =============================================================================

/// `AVAILABLE` once any NIC reports an address, `WAITING` before; a vanished
/// VM is `ERROR`
pub async fn vm_ip_refresh(
    client: &NutanixClient,
    vm_uuid: &str,
) -> Result<Observation<IntentResponse<VmResources>>> {
    match client.get_entity::<VmKind>(vm_uuid).await {
        Ok(vm) => {
            let has_ip = vm
                .status
                .as_ref()
                .and_then(|s| s.resources.as_ref())
                .is_some_and(|r| first_ip(&r.nic_list).is_some());
            let state = if has_ip { "AVAILABLE" } else { "WAITING" };
            Ok(Observation::new(vm, state))
        }
        Err(e) if e.is_not_found() => Ok(Observation::terminal("ERROR")),
        Err(e) => Err(e),
    }
}

/// `COMPLETE` once the VM settled in `power_state`, `RUNNING` before; a
/// vanished VM is `DELETED`
pub async fn vm_power_state_refresh(
    client: &NutanixClient,
    vm_uuid: &str,
    power_state: &str,
) -> Result<Observation<IntentResponse<VmResources>>> {
    match client.get_entity::<VmKind>(vm_uuid).await {
        Ok(vm) => {
            let status = vm.status.as_ref();
            let complete = status.and_then(|s| s.state.as_deref()) == Some("COMPLETE");
            let power = status
                .and_then(|s| s.resources.as_ref())
                .and_then(|r| r.power_state.as_deref());
            let state = if complete && power == Some(power_state) {
                "COMPLETE"
            } else {
                "RUNNING"
            };
            Ok(Observation::new(vm, state))
        }
        Err(e) if e.is_not_found() => Ok(Observation::terminal("DELETED")),
        Err(e) => Err(e),
    }
}

async fn wait_for_power_state(client: &NutanixClient, uuid: &str, power_state: &str) -> Result<()> {
    StateChangeConf::new(format!("vm {} power {}", uuid, power_state))
        .pending(POWER_PENDING)
        .target(POWER_TARGET)
        .timing(&client.poll.vm)
        .wait_for_state(|| vm_power_state_refresh(client, uuid, power_state))
        .await?;
    Ok(())
}

/// Flip only the power state of a VM, leaving the rest of its spec untouched
async fn set_power_state(client: &NutanixClient, uuid: &str, power_state: &str) -> Result<()> {
    tracing::info!("Powering {} vm {}", power_state, uuid);
    let current = client.get_entity::<VmKind>(uuid).await?;
    let mut spec = current.spec.ok_or_else(|| ProviderError::Api {
        status: 200,
        message: format!("vm {} has no spec", uuid),
    })?;
    spec.resources.power_state = Some(power_state.to_string());
    let metadata = common::update_metadata(
        current.metadata.clone(),
        &current.metadata.categories,
        None,
    )?;
    client
        .update_and_wait::<VmKind>(uuid, &IntentInput::new(metadata, spec), &client.poll.vm)
        .await?;
    wait_for_power_state(client, uuid, power_state)
        .await
        .with_context(|| format!("cannot power {} vm {}", power_state, uuid))
}

// =============================================================================
// Lifecycle
// =============================================================================

pub struct VirtualMachine;

impl Resource for VirtualMachine {
    const TYPE_NAME: &'static str = "nutanix_virtual_machine";
    type Config = VmConfig;
    type State = VmState;

    async fn create(client: &NutanixClient, config: VmConfig) -> Result<VmState> {
        let metadata =
            common::new_metadata(VmKind::KIND, &config.categories, config.project_uuid.as_deref())?;
        let spec = expand_spec(&config, VmResources::default(), &config.power_state)?;
        let uuid = client
            .create_and_wait::<VmKind>(&IntentInput::new(metadata, spec), &client.poll.vm)
            .await?;

        if !config.nic_list.is_empty() && config.power_state == "ON" {
            let waited = StateChangeConf::new(format!("vm {} ip address", uuid))
                .pending(IP_PENDING)
                .target(IP_TARGET)
                .timing(&client.poll.vm)
                .wait_for_state(|| vm_ip_refresh(client, &uuid))
                .await;
            if let Err(e) = waited {
                tracing::warn!("vm {} has no IP address yet: {}", uuid, e);
            }
        }

        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<VmState>> {
        match found(client.get_entity::<VmKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(client: &NutanixClient, id: &str, config: VmConfig) -> Result<VmState> {
        validate(&config)?;
        let current = client.get_entity::<VmKind>(id).await?;
        let running = current
            .resources()
            .and_then(|r| r.power_state.as_deref())
            == Some("ON");
        let cold = current
            .spec
            .as_ref()
            .is_some_and(|spec| needs_power_cycle(spec, &config));

        if cold && running {
            set_power_state(client, id, "OFF").await?;
        }

        // spec_version moved if the VM was just powered off, so rebuild from a fresh read
        let interim_power = if cold { "OFF" } else { config.power_state.as_str() };
        let input = common::build_update::<VmKind, _>(
            client,
            id,
            &config.categories,
            config.project_uuid.as_deref(),
            |spec| expand_spec(&config, spec.map(|s| s.resources).unwrap_or_default(), interim_power),
        )
        .await?;
        client
            .update_and_wait::<VmKind>(id, &input, &client.poll.vm)
            .await?;

        if cold && config.power_state == "ON" {
            set_power_state(client, id, "ON").await?;
        } else {
            wait_for_power_state(client, id, interim_power).await?;
        }

        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client.delete_and_wait::<VmKind>(id, &client.poll.vm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CLUSTER: &str = "0f3a6d1e-2b7c-4e8a-9c1d-5f6e7a8b9c0d";
    const SUBNET: &str = "6b1f0c2a-3d4e-4f50-8a6b-7c8d9e0f1a2b";
    const IMAGE: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

    fn config(extra: Value) -> VmConfig {
        let mut base = json!({"name": "web-1", "cluster_uuid": CLUSTER});
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    fn current_spec(resources: Value) -> Spec<VmResources> {
        serde_json::from_value(json!({
            "name": "web-1",
            "resources": resources,
            "cluster_reference": {"kind": "cluster", "uuid": CLUSTER}
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_and_cloud_init_encoding() {
        let cfg = config(json!({
            "guest_customization_cloud_init_user_data": "#cloud-config\n",
            "nic_list": [{"subnet_uuid": SUBNET, "ip_address": "10.0.0.5"}],
            "disk_list": [{"image_uuid": IMAGE}]
        }));
        let spec = expand_spec(&cfg, VmResources::default(), "ON").unwrap();
        let body = serde_json::to_value(&spec.resources).unwrap();

        assert_eq!(body["num_sockets"], 1);
        assert_eq!(body["memory_size_mib"], 1024);
        assert_eq!(body["power_state"], "ON");
        assert_eq!(body["guest_customization"]["cloud_init"]["user_data"], "I2Nsb3VkLWNvbmZpZwo=");
        assert_eq!(body["nic_list"][0]["ip_endpoint_list"][0]["type"], "ASSIGNED");
        assert_eq!(body["disk_list"][0]["data_source_reference"]["kind"], "image");
        assert_eq!(body["disk_list"][0]["device_properties"]["disk_address"]["adapter_type"], "SCSI");
    }

    #[test]
    fn test_disk_needs_size_or_image() {
        let cfg = config(json!({"disk_list": [{"device_type": "DISK"}]}));
        assert!(expand_spec(&cfg, VmResources::default(), "ON").is_err());
    }

    #[test]
    fn test_hot_add_growth_is_warm() {
        let current = current_spec(json!({"num_sockets": 1, "num_vcpus_per_socket": 1, "memory_size_mib": 1024}));
        assert!(!needs_power_cycle(&current, &config(json!({"num_sockets": 2, "memory_size_mib": 2048}))));
        assert!(needs_power_cycle(
            &current,
            &config(json!({"num_sockets": 2, "use_hot_add": false}))
        ));
    }

    #[test]
    fn test_shrinking_or_renaming_is_cold() {
        let current = current_spec(json!({"num_sockets": 2, "num_vcpus_per_socket": 1, "memory_size_mib": 2048}));
        assert!(needs_power_cycle(&current, &config(json!({"num_sockets": 1, "memory_size_mib": 2048}))));
        assert!(needs_power_cycle(&current, &config(json!({"num_sockets": 2, "memory_size_mib": 1024}))));
        let renamed: VmConfig = serde_json::from_value(json!({
            "name": "web-2", "cluster_uuid": CLUSTER, "num_sockets": 2, "memory_size_mib": 2048
        }))
        .unwrap();
        assert!(needs_power_cycle(&current, &renamed));
    }

    #[test]
    fn test_existing_nic_keeps_uuid() {
        let current: VmResources = serde_json::from_value(json!({
            "nic_list": [{"uuid": "nic-1", "subnet_reference": {"kind": "subnet", "uuid": SUBNET},
                          "mac_address": "50:6b:8d:00:00:01"}]
        }))
        .unwrap();
        let cfg = config(json!({"nic_list": [{"subnet_uuid": SUBNET}]}));
        let resources = expand_resources(&cfg, current, "ON").unwrap();
        assert_eq!(resources.nic_list[0].uuid.as_deref(), Some("nic-1"));
        assert_eq!(resources.nic_list[0].mac_address.as_deref(), Some("50:6b:8d:00:00:01"));
    }

    #[test]
    fn test_flatten_reports_first_ip_and_user_data() {
        let response: IntentResponse<VmResources> = serde_json::from_value(json!({
            "metadata": {"kind": "vm", "uuid": "vm-1"},
            "status": {
                "state": "COMPLETE",
                "name": "web-1",
                "resources": {
                    "power_state": "ON",
                    "nic_list": [
                        {"subnet_reference": {"kind": "subnet", "uuid": SUBNET}},
                        {"ip_endpoint_list": [{"ip": "10.0.0.9", "type": "LEARNED"}]}
                    ],
                    "guest_customization": {"cloud_init": {"user_data": "I2Nsb3VkLWNvbmZpZwo="}}
                }
            }
        }))
        .unwrap();
        let state = flatten(&response).unwrap();
        assert_eq!(state.ip_address.as_deref(), Some("10.0.0.9"));
        assert_eq!(state.guest_customization_cloud_init_user_data.as_deref(), Some("#cloud-config\n"));
        assert_eq!(state.nic_list.len(), 2);
    }
}
