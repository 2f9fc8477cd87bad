//! Nutanix Authentication
//!
//! Prism Central, Karbon and Foundation Central accept HTTP basic
//! credentials. Foundation itself is unauthenticated.

use crate::error::{ProviderError, Result};
use reqwest::RequestBuilder;
use std::fmt;

/// Basic-auth credentials
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    // Security: never print the password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Result<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(ProviderError::validation(
                "username and password must not be empty",
            ));
        }
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Attach the credentials to a request
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

/// Validate an endpoint host (name, IPv4 or bracketed IPv6, no scheme or path)
/// Security: rejects values that would change the URL structure
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.is_empty() || endpoint.len() > 253 {
        return Err(ProviderError::validation(format!(
            "invalid endpoint '{}': must be 1-253 characters",
            endpoint
        )));
    }

    if endpoint.contains("://") || endpoint.contains('/') {
        return Err(ProviderError::validation(format!(
            "invalid endpoint '{}': give a host name or IP, not a URL",
            endpoint
        )));
    }

    if endpoint.starts_with('[') && endpoint.ends_with(']') {
        let inner = &endpoint[1..endpoint.len() - 1];
        if inner.parse::<std::net::Ipv6Addr>().is_ok() {
            return Ok(());
        }
    }

    let valid = endpoint
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid || endpoint.starts_with('-') || endpoint.starts_with('.') {
        return Err(ProviderError::validation(format!(
            "invalid endpoint '{}': unexpected characters",
            endpoint
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::new("admin", "Nutanix/4u").unwrap();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("Nutanix/4u"));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(Credentials::new("", "pw").is_err());
        assert!(Credentials::new("admin", "").is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("10.0.0.10").is_ok());
        assert!(validate_endpoint("pc.lab.example.com").is_ok());
        assert!(validate_endpoint("[fd00::10]").is_ok());
        assert!(validate_endpoint("https://pc.example.com").is_err());
        assert!(validate_endpoint("pc/api").is_err());
        assert!(validate_endpoint("").is_err());
        assert!(validate_endpoint("pc example").is_err());
    }
}
