//! Nutanix API interaction module
//!
//! This module provides the core functionality for talking to Prism Central,
//! Karbon, Foundation and Foundation Central, including authentication, the
//! shared HTTP layer and typed per-API request/response structs.
//!
//! # Module Structure
//!
//! - [`auth`] - HTTP basic credentials and endpoint validation
//! - [`client`] - Main client holding base URLs, credentials and poll timings
//! - [`http`] - HTTP utilities and structured error mapping
//! - [`v3`] - Prism Central v3 intent API, tasks and list pagination
//! - [`karbon`] - Karbon Kubernetes cluster API
//! - [`foundation`] - Foundation node imaging API
//! - [`foundation_central`] - Foundation Central imaged nodes/clusters API
//!
//! # Example
//!
//! ```ignore
//! use crate::client::NutanixClient;
//!
//! async fn example(config: &Config) -> crate::error::Result<()> {
//!     let client = NutanixClient::new(config)?;
//!     let task = client.get_task("0b3c...").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
#[allow(clippy::module_inception)]
pub mod client;
pub mod foundation;
pub mod foundation_central;
pub mod http;
pub mod karbon;
pub mod v3;

pub use client::NutanixClient;
