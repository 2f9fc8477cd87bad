//! Nutanix Client
//!
//! Main client for interacting with Nutanix APIs, combining credentials,
//! HTTP functionality, base URLs and the poll timings every wait uses.

use super::auth::{validate_endpoint, Credentials};
use super::http::NutanixHttpClient;
use crate::config::Config;
use crate::error::{ProviderError, Result};
use crate::poll::PollSettings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// Main Nutanix client
#[derive(Clone)]
pub struct NutanixClient {
    pub http: NutanixHttpClient,
    credentials: Option<Credentials>,
    prism_base: Option<Url>,
    foundation_base: Option<Url>,
    pub poll: PollSettings,
}

impl NutanixClient {
    /// Create a new client from provider configuration
    pub fn new(config: &Config) -> Result<Self> {
        let prism_base = match config.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => {
                validate_endpoint(endpoint)?;
                Some(parse_base(&format!(
                    "https://{}:{}",
                    endpoint,
                    config.effective_port()
                ))?)
            }
            _ => None,
        };

        let foundation_base = match config.foundation_endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => {
                validate_endpoint(endpoint)?;
                Some(parse_base(&format!(
                    "http://{}:{}",
                    endpoint,
                    config.effective_foundation_port()
                ))?)
            }
            _ => None,
        };

        let credentials = match (config.username.as_deref(), config.password.as_deref()) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)?),
            _ => None,
        };

        tracing::info!(
            "Nutanix client: prism={:?}, foundation={:?}, user={:?}",
            prism_base.as_ref().map(Url::as_str),
            foundation_base.as_ref().map(Url::as_str),
            credentials.as_ref().map(Credentials::username)
        );

        Ok(Self {
            http: NutanixHttpClient::new(config.insecure)?,
            credentials,
            prism_base,
            foundation_base,
            poll: config.effective_poll(),
        })
    }

    /// Create a client against explicit base URLs (mock servers, proxies)
    pub fn with_base_urls(
        prism_base: Option<&str>,
        foundation_base: Option<&str>,
        credentials: Option<Credentials>,
        poll: PollSettings,
    ) -> Result<Self> {
        Ok(Self {
            http: NutanixHttpClient::new(false)?,
            credentials,
            prism_base: prism_base.map(parse_base).transpose()?,
            foundation_base: foundation_base.map(parse_base).transpose()?,
            poll,
        })
    }

    fn prism_root(&self) -> Result<&str> {
        self.prism_base
            .as_ref()
            .map(|u| u.as_str().trim_end_matches('/'))
            .ok_or_else(|| {
                ProviderError::validation("Prism Central endpoint is not configured")
            })
    }

    fn foundation_root(&self) -> Result<&str> {
        self.foundation_base
            .as_ref()
            .map(|u| u.as_str().trim_end_matches('/'))
            .ok_or_else(|| ProviderError::validation("Foundation endpoint is not configured"))
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build Prism Central v3 API URL
    pub fn v3_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}/api/nutanix/v3/{}", self.prism_root()?, path))
    }

    /// Build Karbon API URL
    pub fn karbon_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}/karbon/{}", self.prism_root()?, path))
    }

    /// Build Foundation Central API URL
    pub fn fc_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}/api/fc/v1/{}", self.prism_root()?, path))
    }

    /// Build Foundation API URL
    pub fn foundation_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}/foundation/{}", self.foundation_root()?, path))
    }

    // =========================================================================
    // Authenticated requests (Prism, Karbon, Foundation Central)
    // =========================================================================

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.http.get(url, self.credentials.as_ref()).await
    }

    /// Make a POST request
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        self.http.post(url, self.credentials.as_ref(), body).await
    }

    /// Make a PUT request
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        self.http.put(url, self.credentials.as_ref(), body).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.http.delete(url, self.credentials.as_ref()).await
    }

    // =========================================================================
    // Unauthenticated requests (Foundation)
    // =========================================================================

    pub async fn get_anonymous<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.http.get(url, None).await
    }

    pub async fn post_anonymous<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        self.http.post(url, None, body).await
    }
}

fn parse_base(base: &str) -> Result<Url> {
    Url::parse(base).map_err(|e| ProviderError::validation(format!("invalid base URL '{}': {}", base, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            endpoint: Some("10.0.0.10".to_string()),
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            foundation_endpoint: Some("10.0.0.20".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_url_builders() {
        let client = NutanixClient::new(&config()).unwrap();
        assert_eq!(
            client.v3_url("vms/list").unwrap(),
            "https://10.0.0.10:9440/api/nutanix/v3/vms/list"
        );
        assert_eq!(
            client.karbon_url("v1/k8s/clusters").unwrap(),
            "https://10.0.0.10:9440/karbon/v1/k8s/clusters"
        );
        assert_eq!(
            client.fc_url("imaged_clusters").unwrap(),
            "https://10.0.0.10:9440/api/fc/v1/imaged_clusters"
        );
        assert_eq!(
            client.foundation_url("progress").unwrap(),
            "http://10.0.0.20:8000/foundation/progress"
        );
    }

    #[test]
    fn test_missing_foundation_endpoint() {
        let mut config = config();
        config.foundation_endpoint = None;
        let client = NutanixClient::new(&config).unwrap();
        assert!(matches!(
            client.foundation_url("progress"),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_url_as_endpoint() {
        let mut config = config();
        config.endpoint = Some("https://pc".to_string());
        assert!(NutanixClient::new(&config).is_err());
    }

    #[test]
    fn test_with_base_urls_trims_trailing_slash() {
        let client =
            NutanixClient::with_base_urls(Some("http://127.0.0.1:9000/"), None, None, PollSettings::default())
                .unwrap();
        assert_eq!(
            client.v3_url("tasks/abc").unwrap(),
            "http://127.0.0.1:9000/api/nutanix/v3/tasks/abc"
        );
    }
}
