//! HTTP API client for the chama REST server.

use std::sync::Arc;

use chama_shared::ApiError;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::capability::CapabilityRegistry;
use crate::error::SyncError;

/// HTTP client for the read-only endpoints the sync core depends on.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    capabilities: Arc<CapabilityRegistry>,
}

impl ApiClient {
    /// Create a new API client sharing `capabilities` with the rest of the app.
    pub fn new(capabilities: Arc<CapabilityRegistry>) -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
            capabilities,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Configure the bearer token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    /// Make a GET request and decode the JSON body
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        let mut rb = self.client.get(&url);
        if let Some(token) = &self.token {
            rb = rb.bearer_auth(token);
        }

        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// `GET /{resource}/user/{userId}`, an endpoint every server provides.
    pub async fn get_user_records<T: DeserializeOwned>(
        &self,
        resource: &str,
        user_id: &str,
    ) -> Result<Vec<T>, ApiError> {
        self.get_json(&user_records_path(resource, user_id)).await
    }

    /// Like [`ApiClient::get_user_records`] for endpoints some servers lack.
    ///
    /// A 404 marks the endpoint absent in the capability registry and fails
    /// with [`SyncError::NotFound`]; while it stays marked, no request is made.
    pub async fn get_optional_user_records<T: DeserializeOwned>(
        &self,
        resource: &str,
        user_id: &str,
    ) -> Result<Vec<T>, SyncError> {
        let endpoint = user_records_endpoint(resource);
        if self.capabilities.is_absent(&endpoint) {
            tracing::trace!(endpoint = %endpoint, "skipping absent endpoint");
            return Err(SyncError::NotFound { endpoint });
        }

        match self.get_user_records(resource, user_id).await {
            Err(e) if e.is_not_found() => {
                self.capabilities.mark_absent(&endpoint);
                Err(SyncError::NotFound { endpoint })
            }
            other => other.map_err(SyncError::from),
        }
    }
}

/// Capability key for a per-user endpoint: the path without the user id.
pub fn user_records_endpoint(resource: &str) -> String {
    format!("/{}/user", resource.trim_matches('/'))
}

pub fn user_records_path(resource: &str, user_id: &str) -> String {
    format!(
        "{}/{}",
        user_records_endpoint(resource),
        urlencoding::encode(user_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(Arc::new(CapabilityRegistry::new(Duration::from_secs(60))))
            .with_base_url(base)
    }

    #[test]
    fn url_joins_base_and_path() {
        assert_eq!(
            client("http://localhost:5000/api/").url("/groups/user/u1"),
            "http://localhost:5000/api/groups/user/u1"
        );
        assert_eq!(client("").url("groups/user/u1"), "/groups/user/u1");
        assert_eq!(
            client("http://a").url("https://b/groups"),
            "https://b/groups"
        );
    }

    #[test]
    fn user_ids_are_percent_encoded() {
        assert_eq!(user_records_path("groups", "u1"), "/groups/user/u1");
        assert_eq!(
            user_records_path("/notifications/", "jane doe/2"),
            "/notifications/user/jane%20doe%2F2"
        );
        assert_eq!(user_records_endpoint("loans"), "/loans/user");
    }
}
