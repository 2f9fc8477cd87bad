//! Resource and data source schemas
//!
//! Schemas are declared in JSON files under `src/schemas/` and compiled into
//! the binary:
//! - `prism.json` - Prism Central v3 resources and the cluster data sources
//! - `flow.json` - Flow network security rules
//! - `karbon.json` - Karbon Kubernetes clusters
//! - `foundation.json` - Foundation and Foundation Central imaging
//!
//! [`validate_resource`] and [`validate_data_source`] run before a
//! configuration document is deserialized into its typed struct.

mod registry;
mod validate;

pub use registry::*;
pub use validate::validate_document;

use crate::error::{ProviderError, Result};
use serde_json::Value;

/// Validate a resource configuration document
pub fn validate_resource(type_name: &str, document: &Value) -> Result<()> {
    let schema = get_resource_schema(type_name)
        .ok_or_else(|| ProviderError::Unsupported(format!("unknown resource type: {}", type_name)))?;
    validate_document(type_name, &schema.block, document)
}

/// Validate a data source query document
pub fn validate_data_source(type_name: &str, document: &Value) -> Result<()> {
    let schema = get_data_source_schema(type_name).ok_or_else(|| {
        ProviderError::Unsupported(format!("unknown data source type: {}", type_name))
    })?;
    validate_document(type_name, &schema.block, document)
}
