//! HTTP client for the remote document store.
//!
//! Thin authenticated wrapper over the store's REST surface. The
//! authorization header comes from the injected [`AuthProvider`]; the
//! client holds no credential state of its own. 404 handling follows
//! the store contract: an empty list on `GET /documents`, `None` on
//! `GET /documents/{id}`, and `NotFound` on update (which feeds the
//! caller's create fallback).

use crate::auth::AuthProvider;
use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use mindloom_types::{Attachment, MindMap};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::debug;

/// HTTP client for the canonical document store.
pub struct MapApiClient {
    client: Client,
    config: CloudConfig,
    auth: Arc<dyn AuthProvider>,
}

impl MapApiClient {
    pub fn new(config: CloudConfig, auth: Arc<dyn AuthProvider>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            config,
            auth,
        }
    }

    async fn auth_header(&self) -> CloudResult<String> {
        self.auth
            .authorization_header()
            .await
            .ok_or(CloudError::AuthRequired)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    // ── Health ──

    /// Remote liveness, consulted before remote-dependent decisions.
    /// Any transport failure reads as unhealthy.
    pub async fn health(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("health check failed: {e}");
                false
            }
        }
    }

    // ── Documents ──

    /// Lists all documents. A 404 is an empty list, not an error.
    pub async fn list_maps(&self) -> CloudResult<Vec<MindMap>> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .get(self.url("/documents"))
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(resp.json().await?)
    }

    /// Fetches a single document. 404 maps to `None`.
    pub async fn get_map(&self, id: &str) -> CloudResult<Option<MindMap>> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .get(self.url(&format!("/documents/{id}")))
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(Some(resp.json().await?))
    }

    /// Creates a document, returning the canonical copy.
    pub async fn create_map(&self, map: &MindMap) -> CloudResult<MindMap> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .post(self.url("/documents"))
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(map)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(resp.json().await?)
    }

    /// Updates a document, returning the canonical copy. A 404 surfaces
    /// as `NotFound` so callers can fall back to create — and only then.
    pub async fn update_map(&self, map: &MindMap) -> CloudResult<MindMap> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .put(self.url(&format!("/documents/{}", map.id)))
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(map)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(map.id.clone()));
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(resp.json().await?)
    }

    pub async fn delete_map(&self, id: &str) -> CloudResult<()> {
        let auth = self.auth_header().await?;
        self.client
            .delete(self.url(&format!("/documents/{id}")))
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(())
    }

    /// Bulk upsert, returning the canonical list.
    pub async fn sync_maps(&self, maps: &[MindMap]) -> CloudResult<Vec<MindMap>> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .post(self.url("/documents/sync"))
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(maps)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(resp.json().await?)
    }

    // ── Node file sub-resources ──
    //
    // Consumed by the file-attachment collaborator; the engine only
    // provides the transport.

    pub async fn upload_file(
        &self,
        map_id: &str,
        node_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> CloudResult<Attachment> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .post(self.url(&format!(
                "/documents/{map_id}/nodes/{node_id}/files?name={file_name}"
            )))
            .header(reqwest::header::AUTHORIZATION, auth)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(resp.json().await?)
    }

    pub async fn download_file(
        &self,
        map_id: &str,
        node_id: &str,
        file_id: &str,
    ) -> CloudResult<Vec<u8>> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .get(self.url(&format!(
                "/documents/{map_id}/nodes/{node_id}/files/{file_id}"
            )))
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(file_id.to_string()));
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn delete_file(
        &self,
        map_id: &str,
        node_id: &str,
        file_id: &str,
    ) -> CloudResult<()> {
        let auth = self.auth_header().await?;
        self.client
            .delete(self.url(&format!(
                "/documents/{map_id}/nodes/{node_id}/files/{file_id}"
            )))
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(())
    }

    pub async fn file_info(
        &self,
        map_id: &str,
        node_id: &str,
        file_id: &str,
    ) -> CloudResult<Option<Attachment>> {
        let auth = self.auth_header().await?;
        let resp = self
            .client
            .get(self.url(&format!(
                "/documents/{map_id}/nodes/{node_id}/files/{file_id}/info"
            )))
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| CloudError::RemoteUnreachable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CloudError::Api(e.to_string()))?;
        Ok(Some(resp.json().await?))
    }
}

/// Pushes one document: update first, create only on `NotFound`.
///
/// This is the engine's sole conflict strategy — last write wins.
pub async fn push_map_once(api: &MapApiClient, map: &MindMap) -> CloudResult<MindMap> {
    match api.update_map(map).await {
        Ok(canonical) => Ok(canonical),
        Err(e) if e.is_not_found() => {
            debug!("document {} absent remotely, creating", map.id);
            api.create_map(map).await
        }
        Err(e) => Err(e),
    }
}
