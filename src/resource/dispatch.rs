//! Resource Dispatch
//!
//! Maps resource and data source type names to their handlers. Documents are
//! validated against the schema registry, deserialized into the handler's
//! typed configuration and the resulting state is serialized back to JSON.

use super::address_group::AddressGroup;
use super::data_source::{Cluster, Clusters, DataSource};
use super::foundation_central_image_cluster::FoundationCentralImageCluster;
use super::foundation_image_nodes::FoundationImageNodes;
use super::image::Image;
use super::karbon_cluster::{delete_wait_minutes, KarbonCluster};
use super::network_security_rule::{NetworkSecurityRule, NetworkSecurityRuleLookup};
use super::project::Project;
use super::recovery_plan::RecoveryPlan;
use super::role::Role;
use super::service_group::ServiceGroup;
use super::subnet::Subnet;
use super::virtual_machine::VirtualMachine;
use super::Resource;
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use crate::schema::{validate_data_source, validate_resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Create a resource from a configuration document, returning its state
pub async fn create(client: &NutanixClient, type_name: &str, document: &Value) -> Result<Value> {
    tracing::debug!("create: type={}", type_name);

    match type_name {
        "nutanix_subnet" => run_create::<Subnet>(client, document).await,
        "nutanix_image" => run_create::<Image>(client, document).await,
        "nutanix_project" => run_create::<Project>(client, document).await,
        "nutanix_role" => run_create::<Role>(client, document).await,
        "nutanix_recovery_plan" => run_create::<RecoveryPlan>(client, document).await,
        "nutanix_service_group" => run_create::<ServiceGroup>(client, document).await,
        "nutanix_address_group" => run_create::<AddressGroup>(client, document).await,
        "nutanix_network_security_rule" => run_create::<NetworkSecurityRule>(client, document).await,
        "nutanix_virtual_machine" => run_create::<VirtualMachine>(client, document).await,
        "nutanix_karbon_cluster" => run_create::<KarbonCluster>(client, document).await,
        "nutanix_foundation_image_nodes" => run_create::<FoundationImageNodes>(client, document).await,
        "nutanix_foundation_central_image_cluster" => {
            run_create::<FoundationCentralImageCluster>(client, document).await
        }
        _ => Err(unknown_resource(type_name)),
    }
}

/// Read a resource's state; `None` when it no longer exists
pub async fn read(client: &NutanixClient, type_name: &str, id: &str) -> Result<Option<Value>> {
    tracing::debug!("read: type={}, id={}", type_name, id);

    match type_name {
        "nutanix_subnet" => run_read::<Subnet>(client, id).await,
        "nutanix_image" => run_read::<Image>(client, id).await,
        "nutanix_project" => run_read::<Project>(client, id).await,
        "nutanix_role" => run_read::<Role>(client, id).await,
        "nutanix_recovery_plan" => run_read::<RecoveryPlan>(client, id).await,
        "nutanix_service_group" => run_read::<ServiceGroup>(client, id).await,
        "nutanix_address_group" => run_read::<AddressGroup>(client, id).await,
        "nutanix_network_security_rule" => run_read::<NetworkSecurityRule>(client, id).await,
        "nutanix_virtual_machine" => run_read::<VirtualMachine>(client, id).await,
        "nutanix_karbon_cluster" => run_read::<KarbonCluster>(client, id).await,
        "nutanix_foundation_image_nodes" => run_read::<FoundationImageNodes>(client, id).await,
        "nutanix_foundation_central_image_cluster" => {
            run_read::<FoundationCentralImageCluster>(client, id).await
        }
        _ => Err(unknown_resource(type_name)),
    }
}

/// Bring an existing resource in line with a configuration document
pub async fn update(
    client: &NutanixClient,
    type_name: &str,
    id: &str,
    document: &Value,
) -> Result<Value> {
    tracing::debug!("update: type={}, id={}", type_name, id);

    match type_name {
        "nutanix_subnet" => run_update::<Subnet>(client, id, document).await,
        "nutanix_image" => run_update::<Image>(client, id, document).await,
        "nutanix_project" => run_update::<Project>(client, id, document).await,
        "nutanix_role" => run_update::<Role>(client, id, document).await,
        "nutanix_recovery_plan" => run_update::<RecoveryPlan>(client, id, document).await,
        "nutanix_service_group" => run_update::<ServiceGroup>(client, id, document).await,
        "nutanix_address_group" => run_update::<AddressGroup>(client, id, document).await,
        "nutanix_network_security_rule" => {
            run_update::<NetworkSecurityRule>(client, id, document).await
        }
        "nutanix_virtual_machine" => run_update::<VirtualMachine>(client, id, document).await,
        "nutanix_karbon_cluster" => run_update::<KarbonCluster>(client, id, document).await,
        "nutanix_foundation_image_nodes" => {
            run_update::<FoundationImageNodes>(client, id, document).await
        }
        "nutanix_foundation_central_image_cluster" => {
            run_update::<FoundationCentralImageCluster>(client, id, document).await
        }
        _ => Err(unknown_resource(type_name)),
    }
}

/// Delete a resource; deleting something already gone succeeds
///
/// `document` is the resource's configuration, if the caller still has it.
/// Only wait budgets are taken from it.
pub async fn delete(
    client: &NutanixClient,
    type_name: &str,
    id: &str,
    document: Option<&Value>,
) -> Result<()> {
    tracing::info!("delete: type={}, id={}", type_name, id);

    match type_name {
        "nutanix_subnet" => Subnet::delete(client, id).await,
        "nutanix_image" => Image::delete(client, id).await,
        "nutanix_project" => Project::delete(client, id).await,
        "nutanix_role" => Role::delete(client, id).await,
        "nutanix_recovery_plan" => RecoveryPlan::delete(client, id).await,
        "nutanix_service_group" => ServiceGroup::delete(client, id).await,
        "nutanix_address_group" => AddressGroup::delete(client, id).await,
        "nutanix_network_security_rule" => NetworkSecurityRule::delete(client, id).await,
        "nutanix_virtual_machine" => VirtualMachine::delete(client, id).await,
        "nutanix_karbon_cluster" => match document.map(delete_wait_minutes).transpose() {
            Ok(minutes) => KarbonCluster::delete_within(client, id, minutes.flatten()).await,
            Err(e) => Err(e),
        },
        "nutanix_foundation_image_nodes" => FoundationImageNodes::delete(client, id).await,
        "nutanix_foundation_central_image_cluster" => {
            FoundationCentralImageCluster::delete(client, id).await
        }
        _ => Err(unknown_resource(type_name)),
    }
    .with_context(|| format!("deleting {} {}", type_name, id))
}

/// Run a data source query
pub async fn read_data_source(
    client: &NutanixClient,
    type_name: &str,
    document: &Value,
) -> Result<Value> {
    tracing::debug!("read_data_source: type={}", type_name);

    match type_name {
        "nutanix_cluster" => run_query::<Cluster>(client, document).await,
        "nutanix_clusters" => run_query::<Clusters>(client, document).await,
        "nutanix_network_security_rule" => {
            run_query::<NetworkSecurityRuleLookup>(client, document).await
        }
        _ => Err(ProviderError::Unsupported(format!(
            "unknown data source type: {}",
            type_name
        ))),
    }
}

// =============================================================================
// Generic runners
// =============================================================================

fn unknown_resource(type_name: &str) -> ProviderError {
    ProviderError::Unsupported(format!("unknown resource type: {}", type_name))
}

fn parse_document<T: DeserializeOwned>(type_name: &str, document: &Value) -> Result<T> {
    serde_json::from_value(document.clone())
        .map_err(|e| ProviderError::validation(format!("{}: {}", type_name, e)))
}

fn to_state<S: Serialize>(state: &S) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}

async fn run_create<R: Resource>(client: &NutanixClient, document: &Value) -> Result<Value> {
    validate_resource(R::TYPE_NAME, document)?;
    let config: R::Config = parse_document(R::TYPE_NAME, document)?;
    let state = R::create(client, config)
        .await
        .with_context(|| format!("creating {}", R::TYPE_NAME))?;
    to_state(&state)
}

async fn run_read<R: Resource>(client: &NutanixClient, id: &str) -> Result<Option<Value>> {
    match R::read(client, id).await? {
        Some(state) => Ok(Some(to_state(&state)?)),
        None => {
            tracing::info!("{} {} no longer exists", R::TYPE_NAME, id);
            Ok(None)
        }
    }
}

async fn run_update<R: Resource>(client: &NutanixClient, id: &str, document: &Value) -> Result<Value> {
    validate_resource(R::TYPE_NAME, document)?;
    let config: R::Config = parse_document(R::TYPE_NAME, document)?;
    let state = R::update(client, id, config)
        .await
        .with_context(|| format!("updating {} {}", R::TYPE_NAME, id))?;
    to_state(&state)
}

async fn run_query<D: DataSource>(client: &NutanixClient, document: &Value) -> Result<Value> {
    validate_data_source(D::TYPE_NAME, document)?;
    let query: D::Query = parse_document(D::TYPE_NAME, document)?;
    let state = D::read(client, query)
        .await
        .with_context(|| format!("reading data source {}", D::TYPE_NAME))?;
    to_state(&state)
}
