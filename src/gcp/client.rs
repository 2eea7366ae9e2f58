//! GCP Client
//!
//! Main client for listing GCP resources, combining authentication
//! and HTTP functionality.

use super::auth::{GcpCredentials, TokenSource};
use super::error::ApiError;
use super::http::GcpHttpClient;
use crate::resource::normalize::extract_items;
use crate::resource::{ResourceDef, PROJECT_PLACEHOLDER};
use crate::sync::collect::{Page, ResourceLister};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    tokens: Arc<dyn TokenSource>,
    http: GcpHttpClient,
    /// Replaces every definition's `api_base` (emulators, tests)
    endpoint_override: Option<String>,
}

impl GcpClient {
    /// Create a client using the ambient credentials
    pub async fn new() -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_token_source(Arc::new(credentials)).context("Failed to create HTTP client")
    }

    /// Create a client with an explicit token source
    pub fn with_token_source(tokens: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        Ok(Self {
            tokens,
            http: GcpHttpClient::new()?,
            endpoint_override: None,
        })
    }

    /// Send every request to `base` instead of the Google endpoint
    pub fn with_endpoint(mut self, base: impl Into<String>) -> Self {
        self.endpoint_override = Some(base.into());
        self
    }

    /// Build the list URL for one page of `def` under `project`
    pub fn list_url(
        &self,
        def: &ResourceDef,
        project: &str,
        page_token: Option<&str>,
    ) -> Result<Url, ApiError> {
        let base = self.endpoint_override.as_deref().unwrap_or(&def.api_base);
        let raw = format!(
            "{}{}",
            base.trim_end_matches('/'),
            def.list_path.replace(PROJECT_PLACEHOLDER, project)
        );
        let mut url =
            Url::parse(&raw).map_err(|e| ApiError::Decode(format!("bad list URL '{}': {}", raw, e)))?;

        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &def.list_query {
                query.append_pair(key, &value.replace(PROJECT_PLACEHOLDER, project));
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        // An empty query_pairs_mut still leaves a trailing '?'
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }
}

#[async_trait]
impl ResourceLister for GcpClient {
    async fn list_page(
        &self,
        def: &ResourceDef,
        scope_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page, ApiError> {
        let url = self.list_url(def, scope_id, page_token)?;
        let token = self.tokens.token().await?;
        let response = self.http.get(url.as_str(), &token).await?;

        let next_token = response
            .get("nextPageToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Page {
            items: extract_items(&response, &def.response_path),
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::auth::StaticToken;
    use crate::resource::get_resource;

    fn client() -> GcpClient {
        GcpClient::with_token_source(Arc::new(StaticToken("t".into()))).unwrap()
    }

    #[test]
    fn test_functions_list_url() {
        let def = get_resource("cloud-functions").unwrap();
        let url = client().list_url(def, "my-project", None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloudfunctions.googleapis.com/v1/projects/my-project/locations/-/functions"
        );
    }

    #[test]
    fn test_buckets_list_url_with_page_token() {
        let def = get_resource("storage-buckets").unwrap();
        let url = client()
            .with_endpoint("http://127.0.0.1:9000/")
            .list_url(def, "my-project", Some("abc=="))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/storage/v1/b?project=my-project&pageToken=abc%3D%3D"
        );
    }
}
