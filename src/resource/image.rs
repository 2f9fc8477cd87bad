//! nutanix_image

use super::common::{self, found};
use super::{read_back, Resource};
use crate::client::v3::{IntentInput, IntentResponse, Reference, Spec, V3Kind};
use crate::client::NutanixClient;
use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct ImageKind;

impl V3Kind for ImageKind {
    const KIND: &'static str = "image";
    const PATH: &'static str = "images";
    type Resources = ImageResources;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checksum {
    pub checksum_algorithm: String,
    pub checksum_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ImageVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_placement_ref_list: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retrieval_uri_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_uri: String,
    #[serde(default)]
    pub image_type: Option<String>,
    #[serde(default)]
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub version: Option<ImageVersion>,
    #[serde(default)]
    pub cluster_uuids: Vec<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default)]
    pub project_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageState {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_uri: Option<String>,
    pub image_type: Option<String>,
    pub checksum: Option<Checksum>,
    pub version: Option<ImageVersion>,
    pub cluster_uuids: Vec<String>,
    pub retrieval_uri_list: Vec<String>,
    pub size_bytes: Option<i64>,
    pub categories: BTreeMap<String, String>,
    pub project_uuid: Option<String>,
    pub state: Option<String>,
}

/// Guess the image type from the file extension when it is not given
fn image_type(config: &ImageConfig) -> String {
    match &config.image_type {
        Some(t) => t.clone(),
        None if config.source_uri.to_ascii_lowercase().ends_with(".iso") => "ISO_IMAGE".to_string(),
        None => "DISK_IMAGE".to_string(),
    }
}

fn expand_spec(config: &ImageConfig, mut resources: ImageResources) -> Result<Spec<ImageResources>> {
    let lower = config.source_uri.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("nfs://")) {
        return Err(ProviderError::validation(format!(
            "source_uri '{}' must be an http(s) or nfs URL",
            config.source_uri
        )));
    }

    resources.image_type = Some(image_type(config));
    resources.source_uri = Some(config.source_uri.clone());
    resources.checksum = config.checksum.clone();
    resources.version = config.version.clone();
    resources.initial_placement_ref_list =
        common::references("cluster_uuids", "cluster", &config.cluster_uuids)?;
    // read-only on the server side
    resources.retrieval_uri_list.clear();
    resources.size_bytes = None;

    Ok(Spec {
        name: config.name.clone(),
        description: config.description.clone(),
        resources,
        cluster_reference: None,
    })
}

pub fn flatten(response: &IntentResponse<ImageResources>) -> Result<ImageState> {
    let resources = response.resources().cloned().unwrap_or_default();
    Ok(ImageState {
        id: response.uuid()?,
        name: common::entity_name(response),
        description: common::entity_description(response),
        source_uri: resources.source_uri,
        image_type: resources.image_type,
        checksum: resources.checksum,
        version: resources.version,
        cluster_uuids: common::reference_uuids(&resources.initial_placement_ref_list),
        retrieval_uri_list: resources.retrieval_uri_list,
        size_bytes: resources.size_bytes,
        categories: response.metadata.categories.clone(),
        project_uuid: response.metadata.project_reference.as_ref().map(|r| r.uuid.clone()),
        state: common::entity_state(response),
    })
}

pub struct Image;

impl Resource for Image {
    const TYPE_NAME: &'static str = "nutanix_image";
    type Config = ImageConfig;
    type State = ImageState;

    async fn create(client: &NutanixClient, config: ImageConfig) -> Result<ImageState> {
        let metadata =
            common::new_metadata(ImageKind::KIND, &config.categories, config.project_uuid.as_deref())?;
        let spec = expand_spec(&config, ImageResources::default())?;
        let uuid = client
            .create_and_wait::<ImageKind>(&IntentInput::new(metadata, spec), &client.poll.entity)
            .await?;
        read_back::<Self>(client, &uuid).await
    }

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<ImageState>> {
        match found(client.get_entity::<ImageKind>(id).await)? {
            Some(response) => Ok(Some(flatten(&response)?)),
            None => Ok(None),
        }
    }

    async fn update(client: &NutanixClient, id: &str, config: ImageConfig) -> Result<ImageState> {
        let input = common::build_update::<ImageKind, _>(
            client,
            id,
            &config.categories,
            config.project_uuid.as_deref(),
            |current| {
                let current = current.map(|s| s.resources).unwrap_or_default();
                if current.source_uri.as_deref().is_some_and(|u| u != config.source_uri) {
                    return Err(ProviderError::Unsupported(
                        "changing source_uri of an existing image; recreate it instead".to_string(),
                    ));
                }
                expand_spec(&config, current)
            },
        )
        .await?;
        client
            .update_and_wait::<ImageKind>(id, &input, &client.poll.entity)
            .await?;
        read_back::<Self>(client, id).await
    }

    async fn delete(client: &NutanixClient, id: &str) -> Result<()> {
        client.delete_and_wait::<ImageKind>(id, &client.poll.entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(uri: &str) -> ImageConfig {
        serde_json::from_value(json!({"name": "ubuntu", "source_uri": uri})).unwrap()
    }

    #[test]
    fn test_image_type_from_extension() {
        assert_eq!(image_type(&config("http://repo/ubuntu-22.04.ISO")), "ISO_IMAGE");
        assert_eq!(image_type(&config("http://repo/ubuntu.qcow2")), "DISK_IMAGE");
    }

    #[test]
    fn test_rejects_local_paths() {
        assert!(expand_spec(&config("/tmp/ubuntu.qcow2"), ImageResources::default()).is_err());
    }

    #[test]
    fn test_expand_drops_server_side_fields() {
        let current = ImageResources {
            retrieval_uri_list: vec!["https://pc/images/1/file".to_string()],
            size_bytes: Some(1024),
            ..Default::default()
        };
        let spec = expand_spec(&config("https://repo/ubuntu.qcow2"), current).unwrap();
        let body = serde_json::to_value(&spec.resources).unwrap();
        assert!(body.get("retrieval_uri_list").is_none());
        assert!(body.get("size_bytes").is_none());
        assert_eq!(body["image_type"], "DISK_IMAGE");
    }
}
