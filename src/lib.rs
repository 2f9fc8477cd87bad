//! ntnx - Nutanix resource provider
//!
//! Declares, creates, reads, updates and deletes Prism Central, Karbon,
//! Foundation and Foundation Central entities, waiting on the long-running
//! operations those APIs hand back.

pub mod client;
pub mod config;
pub mod error;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod schema;

pub use error::{ProviderError, Result};
pub use provider::Provider;

/// Version injected at compile time via NTNX_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("NTNX_VERSION") {
    Some(v) => v,
    None => "dev",
};
