//! Provider error types

use std::time::Duration;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("API request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{operation} ended in state {state}: {}", messages.join("; "))]
    OperationFailed {
        operation: String,
        state: String,
        messages: Vec<String>,
    },

    #[error("timeout after {timeout:?} waiting for {operation} (last state: {})", last_state.as_deref().unwrap_or("none"))]
    Timeout {
        operation: String,
        timeout: Duration,
        last_state: Option<String>,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ProviderError>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the remote entity is gone, looking through added context
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when a wait gave up before the operation reached a terminal state
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Context { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Diagnostics attached to a failed operation, one per failed sub-item
    pub fn diagnostics(&self) -> &[String] {
        match self {
            Self::OperationFailed { messages, .. } => messages,
            Self::Context { source, .. } => source.diagnostics(),
            _ => &[],
        }
    }
}

/// Attach entity/operation context to an error while keeping its kind
pub trait ResultExt<T> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| ProviderError::Context {
            context: f(),
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_survives_context() {
        let err: Result<()> = Err(ProviderError::not_found("vm", "1234"));
        let err = err.with_context(|| "reading vm 1234".to_string()).unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_timeout());
        assert!(err.to_string().starts_with("reading vm 1234"));
    }

    #[test]
    fn test_timeout_display_includes_last_state() {
        let err = ProviderError::Timeout {
            operation: "task abc".to_string(),
            timeout: Duration::from_secs(1),
            last_state: Some("RUNNING".to_string()),
        };
        assert!(err.to_string().contains("RUNNING"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_diagnostics_from_failed_operation() {
        let err = ProviderError::OperationFailed {
            operation: "imaging".to_string(),
            state: "FAILED".to_string(),
            messages: vec!["node 10.0.0.1 failed".to_string(), "cluster c1 failed".to_string()],
        };
        assert_eq!(err.diagnostics().len(), 2);
    }
}
