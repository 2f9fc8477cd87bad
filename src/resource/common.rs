//! Helpers shared by the v3 resources

use crate::client::v3::{IntentInput, IntentResponse, Metadata, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use std::collections::BTreeMap;

/// Reject anything that is not a UUID before it reaches a URL or a reference
pub fn check_uuid(field: &str, value: &str) -> Result<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ProviderError::validation(format!("{} '{}' is not a valid UUID", field, value)))
}

/// Build a reference after checking the UUID
pub fn reference(field: &str, kind: &str, uuid: &str) -> Result<Reference> {
    check_uuid(field, uuid)?;
    Ok(Reference::new(kind, uuid))
}

/// Build a reference list after checking every UUID
pub fn references(field: &str, kind: &str, uuids: &[String]) -> Result<Vec<Reference>> {
    uuids.iter().map(|u| reference(field, kind, u)).collect()
}

pub fn reference_uuids(refs: &[Reference]) -> Vec<String> {
    refs.iter().map(|r| r.uuid.clone()).collect()
}

/// Metadata for a new entity
pub fn new_metadata(
    kind: &str,
    categories: &BTreeMap<String, String>,
    project_uuid: Option<&str>,
) -> Result<Metadata> {
    let mut metadata = Metadata::for_kind(kind);
    metadata.categories = categories.clone();
    metadata.project_reference = project_uuid
        .map(|p| reference("project_uuid", "project", p))
        .transpose()?;
    Ok(metadata)
}

/// Metadata for an update: keep the server copy (spec_version, owner) and
/// replace what the configuration controls
pub fn update_metadata(
    mut current: Metadata,
    categories: &BTreeMap<String, String>,
    project_uuid: Option<&str>,
) -> Result<Metadata> {
    current.categories = categories.clone();
    if let Some(project) = project_uuid {
        current.project_reference = Some(reference("project_uuid", "project", project)?);
    }
    current.creation_time = None;
    current.last_update_time = None;
    Ok(current)
}

/// Build an update intent from the current entity, letting `apply` edit the spec
pub async fn build_update<K, F>(
    client: &NutanixClient,
    uuid: &str,
    categories: &BTreeMap<String, String>,
    project_uuid: Option<&str>,
    apply: F,
) -> Result<IntentInput<K::Resources>>
where
    K: V3Kind,
    F: FnOnce(Option<Spec<K::Resources>>) -> Result<Spec<K::Resources>>,
{
    let current: IntentResponse<K::Resources> = client.get_entity::<K>(uuid).await?;
    let metadata = update_metadata(current.metadata, categories, project_uuid)?;
    let spec = apply(current.spec)?;
    Ok(IntentInput::new(metadata, spec))
}

/// Entity name from status, falling back to spec
pub fn entity_name<R>(response: &IntentResponse<R>) -> String {
    response
        .status
        .as_ref()
        .and_then(|s| s.name.clone())
        .or_else(|| response.spec.as_ref().map(|s| s.name.clone()))
        .unwrap_or_default()
}

/// Entity description from status, falling back to spec
pub fn entity_description<R>(response: &IntentResponse<R>) -> Option<String> {
    response
        .status
        .as_ref()
        .and_then(|s| s.description.clone())
        .or_else(|| response.spec.as_ref().and_then(|s| s.description.clone()))
}

/// Entity state string (COMPLETE, PENDING, ERROR...)
pub fn entity_state<R>(response: &IntentResponse<R>) -> Option<String> {
    response.status.as_ref().and_then(|s| s.state.clone())
}

/// Map a not-found read into `None`
pub fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "0f3a6d1e-2b7c-4e8a-9c1d-5f6e7a8b9c0d";

    #[test]
    fn test_reference_checks_uuid() {
        assert_eq!(reference("subnet_uuid", "subnet", UUID).unwrap().kind, "subnet");
        let err = reference("subnet_uuid", "subnet", "vlan-10").unwrap_err();
        assert!(err.to_string().contains("subnet_uuid 'vlan-10'"));
    }

    #[test]
    fn test_update_metadata_keeps_spec_version() {
        let current = Metadata {
            kind: "subnet".to_string(),
            uuid: Some(UUID.to_string()),
            spec_version: Some(4),
            creation_time: Some("2024-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let mut categories = BTreeMap::new();
        categories.insert("Env".to_string(), "prod".to_string());

        let updated = update_metadata(current, &categories, None).unwrap();
        assert_eq!(updated.spec_version, Some(4));
        assert_eq!(updated.categories["Env"], "prod");
        assert!(updated.creation_time.is_none());
    }

    #[test]
    fn test_found_maps_not_found_to_none() {
        let missing: Result<u8> = Err(ProviderError::not_found("vm", UUID));
        assert!(found(missing).unwrap().is_none());
        let other: Result<u8> = Err(ProviderError::validation("bad"));
        assert!(found(other).is_err());
    }
}
