//! GCP API interaction module
//!
//! This module provides the Cloud API collaborator used by the collector:
//! authentication, an HTTP client with typed errors, and paginated listing.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client, implements [`crate::sync::collect::ResourceLister`]
//! - [`error`] - Typed API errors and their classification
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use gcpgraph::gcp::client::GcpClient;
//! use gcpgraph::sync::collect::ResourceLister;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new().await?;
//!     let def = gcpgraph::resource::get_resource("cloud-functions").unwrap();
//!     let page = client.list_page(def, "my-project", None).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;

pub use error::{ApiError, ErrorClass};
