//! Provider entry point
//!
//! Owns the configured client and routes lifecycle calls by type name.

use crate::client::v3::Task;
use crate::client::NutanixClient;
use crate::config::Config;
use crate::error::{ProviderError, Result};
use crate::resource::dispatch;
use crate::schema::{get_data_source_schema, get_resource_schema};
use serde_json::Value;

/// Configured Nutanix provider
#[derive(Clone)]
pub struct Provider {
    client: NutanixClient,
}

impl Provider {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: NutanixClient::new(config)?,
        })
    }

    pub fn from_client(client: NutanixClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &NutanixClient {
        &self.client
    }

    /// Check that `config` can reach the API serving `type_name`
    ///
    /// Foundation runs without credentials; everything else goes through
    /// Prism Central.
    pub fn check_config(config: &Config, type_name: &str) -> Result<()> {
        let api = get_resource_schema(type_name)
            .or_else(|| get_data_source_schema(type_name))
            .map(|s| s.api.as_str())
            .ok_or_else(|| ProviderError::Unsupported(format!("unknown type: {}", type_name)))?;

        if api == "foundation" {
            if config.foundation_endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(ProviderError::validation(
                    "no Foundation endpoint configured; set FOUNDATION_ENDPOINT",
                ));
            }
            Ok(())
        } else {
            config.validate_prism()
        }
    }

    pub async fn create(&self, type_name: &str, document: &Value) -> Result<Value> {
        dispatch::create(&self.client, type_name, document).await
    }

    pub async fn read(&self, type_name: &str, id: &str) -> Result<Option<Value>> {
        dispatch::read(&self.client, type_name, id).await
    }

    pub async fn update(&self, type_name: &str, id: &str, document: &Value) -> Result<Value> {
        dispatch::update(&self.client, type_name, id, document).await
    }

    /// Delete a resource, taking wait budgets from `document` when given
    pub async fn delete(&self, type_name: &str, id: &str, document: Option<&Value>) -> Result<()> {
        dispatch::delete(&self.client, type_name, id, document).await
    }

    pub async fn read_data_source(&self, type_name: &str, document: &Value) -> Result<Value> {
        dispatch::read_data_source(&self.client, type_name, document).await
    }

    /// Poll a Prism task until it succeeds, fails or times out
    pub async fn wait_task(&self, task_uuid: &str) -> Result<Task> {
        crate::resource::common::check_uuid("task_uuid", task_uuid)?;
        self.client
            .wait_for_task(task_uuid, &self.client.poll.entity, "wait-task")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foundation_types_skip_prism_credentials() {
        let config = Config {
            foundation_endpoint: Some("10.0.0.20".to_string()),
            ..Default::default()
        };
        Provider::check_config(&config, "nutanix_foundation_image_nodes").unwrap();
        assert!(Provider::check_config(&config, "nutanix_subnet").is_err());
    }

    #[test]
    fn test_foundation_central_needs_prism() {
        let config = Config {
            endpoint: Some("pc".to_string()),
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        Provider::check_config(&config, "nutanix_foundation_central_image_cluster").unwrap();
        Provider::check_config(&config, "nutanix_cluster").unwrap();
        assert!(Provider::check_config(&config, "nutanix_foundation_image_nodes").is_err());
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            Provider::check_config(&Config::default(), "nutanix_floppy"),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_wait_task_rejects_bad_uuid() {
        let provider = Provider::new(&Config::default()).unwrap();
        let err = tokio_test::assert_err!(tokio_test::block_on(provider.wait_task("not-a-task")));
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
