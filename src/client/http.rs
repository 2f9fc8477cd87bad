//! HTTP utilities for Nutanix REST API calls

use super::auth::Credentials;
use crate::error::{ProviderError, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Per-request timeout; long operations are tracked through tasks, not held connections
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// `message_list[].reason` values meaning the addressed entity does not exist
const NOT_FOUND_REASONS: &[&str] = &["ENTITY_NOT_FOUND", "RECOVERY_PLAN_NOT_FOUND"];

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// One entry of a Prism `message_list`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Error body shapes returned by Prism, Karbon, Foundation and Foundation Central
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message_list: Vec<ApiMessage>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl ApiErrorBody {
    fn is_not_found(&self) -> bool {
        self.message_list
            .iter()
            .filter_map(|m| m.reason.as_deref())
            .any(|reason| NOT_FOUND_REASONS.contains(&reason))
    }

    fn summary(&self) -> Option<String> {
        let mut parts: Vec<String> = self
            .message_list
            .iter()
            .filter_map(|m| m.message.clone().or_else(|| m.reason.clone()))
            .collect();
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        match &self.error {
            Some(Value::String(s)) => parts.push(s.clone()),
            Some(Value::Object(map)) => {
                if let Some(Value::String(s)) = map.get("message") {
                    parts.push(s.clone());
                }
            }
            _ => {}
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Map a non-success response onto a structured error
pub(crate) fn classify_error(status: u16, url: &str, body: &str) -> ProviderError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();

    if status == 404 || parsed.is_not_found() {
        return ProviderError::not_found("entity", url_path(url));
    }

    let message = parsed
        .summary()
        .unwrap_or_else(|| sanitize_for_log(body));
    ProviderError::Api { status, message }
}

fn url_path(url: &str) -> &str {
    match url::Url::parse(url) {
        Ok(parsed) if !parsed.path().is_empty() => {
            let start = url.find(parsed.path()).unwrap_or(0);
            &url[start..]
        }
        _ => url,
    }
}

/// HTTP client wrapper for Nutanix API calls
#[derive(Clone)]
pub struct NutanixHttpClient {
    client: Client,
}

impl NutanixHttpClient {
    /// Create a new HTTP client
    pub fn new(insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ntnx/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            // Prism ships with a self-signed certificate
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self { client })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<T> {
        tracing::debug!("GET {}", url);
        let request = authorize(self.client.get(url), credentials);
        self.send(request, url).await
    }

    /// Make a POST request with a JSON body
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        body: &B,
    ) -> Result<T> {
        tracing::debug!("POST {}", url);
        let request = authorize(self.client.post(url), credentials).json(body);
        self.send(request, url).await
    }

    /// Make a PUT request with a JSON body
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        body: &B,
    ) -> Result<T> {
        tracing::debug!("PUT {}", url);
        let request = authorize(self.client.put(url), credentials).json(body);
        self.send(request, url).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<T> {
        tracing::debug!("DELETE {}", url);
        let request = authorize(self.client.delete(url), credentials);
        self.send(request, url).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<T> {
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(classify_error(status.as_u16(), url, &body));
        }

        // Handle empty response
        if body.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn authorize(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
    match credentials {
        Some(creds) => creds.apply(request),
        None => request,
    }
}

/// Format a provider error for display
/// Security: Sanitizes error messages to avoid leaking credentials or raw bodies
pub fn format_error(error: &ProviderError) -> String {
    match error {
        ProviderError::Api { status: 401, .. } => {
            "Authentication failed. Check NUTANIX_USERNAME / NUTANIX_PASSWORD.".to_string()
        }
        ProviderError::Api { status: 403, .. } => {
            "Permission denied. Check the role assigned to this user.".to_string()
        }
        ProviderError::Api { status: 409, .. } => {
            "Conflict. The entity was modified concurrently (spec_version mismatch) or already exists."
                .to_string()
        }
        ProviderError::Api { status, .. } if *status >= 500 => {
            "Nutanix service temporarily unavailable. Please try again.".to_string()
        }
        ProviderError::Http(e) if e.is_connect() => {
            "Could not connect to the endpoint. Check the address, port and network.".to_string()
        }
        ProviderError::Http(e) if e.is_timeout() => "Request timed out.".to_string(),
        other => other
            .to_string()
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ' || *c == '\n')
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("truncated, 500 bytes total"));
        assert!(sanitized.len() < 300);
    }

    #[test]
    fn test_classify_entity_not_found_reason() {
        let body = r#"{"state":"ERROR","code":500,"message_list":[{"reason":"ENTITY_NOT_FOUND","message":"Entity not found"}]}"#;
        let err = classify_error(500, "https://pc:9440/api/nutanix/v3/vms/abc", body);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "entity not found: /api/nutanix/v3/vms/abc");
    }

    #[test]
    fn test_classify_recovery_plan_not_found_reason() {
        let body = r#"{"message_list":[{"reason":"RECOVERY_PLAN_NOT_FOUND","message":"Recovery plan does not exist"}]}"#;
        let err = classify_error(400, "https://pc:9440/api/nutanix/v3/recovery_plans/abc", body);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_404_without_body() {
        let err = classify_error(404, "https://pc:9440/karbon/v1/k8s/clusters/demo", "");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_not_found_text_elsewhere_is_not_not_found() {
        // A message that merely mentions the words must not drive control flow
        let body = r#"{"message_list":[{"reason":"INVALID_REQUEST","message":"ENTITY_NOT_FOUND in subnet reference"}]}"#;
        let err = classify_error(422, "https://pc:9440/api/nutanix/v3/vms", body);
        assert!(!err.is_not_found());
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 422);
                assert!(message.contains("subnet reference"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_karbon_and_foundation_bodies() {
        let karbon = classify_error(400, "u", r#"{"code":400,"message":"invalid node pool"}"#);
        assert!(karbon.to_string().contains("invalid node pool"));

        let foundation = classify_error(500, "u", r#"{"error":"node 10.0.0.5 unreachable"}"#);
        assert!(foundation.to_string().contains("unreachable"));
    }

    #[test]
    fn test_format_error_hides_auth_details() {
        let err = ProviderError::Api {
            status: 401,
            message: "user admin bad password".to_string(),
        };
        assert!(!format_error(&err).contains("admin"));
    }
}
