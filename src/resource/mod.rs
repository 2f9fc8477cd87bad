//! Resource lifecycle handlers
//!
//! Every resource type implements [`Resource`] over a typed configuration
//! struct and a typed state struct. A handler expands the configuration into
//! an API request, calls the client, polls the returned operation handle when
//! the API is asynchronous, and flattens the response into state.
//!
//! # Architecture
//!
//! - [`dispatch`] - Maps resource type names to handlers, validating and
//!   (de)serializing documents at the boundary
//! - [`common`] - Reference, category and UUID helpers shared by v3 resources
//! - [`data_source`] - Read-only cluster lookups
//! - one module per resource type
//!
//! # Example
//!
//! ```ignore
//! use crate::resource::dispatch;
//!
//! async fn make_subnet(client: &NutanixClient, doc: &Value) -> Result<Value> {
//!     dispatch::create(client, "nutanix_subnet", doc).await
//! }
//! ```

pub mod address_group;
pub mod common;
pub mod data_source;
pub mod dispatch;
pub mod foundation_central_image_cluster;
pub mod foundation_image_nodes;
pub mod image;
pub mod karbon_cluster;
pub mod network_security_rule;
pub mod project;
pub mod recovery_plan;
pub mod role;
pub mod service_group;
pub mod subnet;
pub mod virtual_machine;

use crate::client::NutanixClient;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// CRUD lifecycle of one resource type
///
/// `read` returns `Ok(None)` when the remote entity is gone, which tells the
/// caller to forget or recreate it.
#[allow(async_fn_in_trait)]
pub trait Resource {
    /// Type name used in configuration documents and the schema registry
    const TYPE_NAME: &'static str;

    type Config: DeserializeOwned;
    type State: Serialize;

    async fn create(client: &NutanixClient, config: Self::Config) -> Result<Self::State>;

    async fn read(client: &NutanixClient, id: &str) -> Result<Option<Self::State>>;

    async fn update(client: &NutanixClient, id: &str, config: Self::Config) -> Result<Self::State>;

    async fn delete(client: &NutanixClient, id: &str) -> Result<()>;
}

/// Read an entity that was just written; its absence is an error here
pub(crate) async fn read_back<R: Resource>(client: &NutanixClient, id: &str) -> Result<R::State> {
    R::read(client, id)
        .await?
        .ok_or_else(|| crate::error::ProviderError::not_found(R::TYPE_NAME, id))
}
