//! HTTP client for the caching server's sync API.
//!
//! Thin typed wrapper over `reqwest` that maps HTTP status codes onto the
//! [`SyncError`] taxonomy: 403 is a permission denial, 404 a missing path,
//! 409 a stale delta base, 5xx and transport failures are transient.

use crate::path::SyncPath;
use crate::protocol::{
    ApplyResponse, ContentPayload, DatasiteList, DiffPayload, ErrorBody, ManifestEntry, SyncBatch,
    ACTING_USER_HEADER,
};
use crate::sync::error::{SyncError, SyncResult};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

/// Client for one caching server, acting as one identity.
#[derive(Debug, Clone)]
pub struct SyncClient {
    http: Client,
    server_url: String,
    user: String,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>, user: impl Into<String>) -> Self {
        SyncClient {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.server_url, route)
    }

    async fn check(&self, resp: Response) -> SyncResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };
        Err(match status {
            StatusCode::FORBIDDEN => SyncError::PermissionDenied(message),
            StatusCode::NOT_FOUND => SyncError::NotFound(message),
            StatusCode::CONFLICT => SyncError::StaleBase(message),
            s if s.is_server_error() => SyncError::TransientNetwork(message),
            _ => SyncError::Protocol(message),
        })
    }

    /// Datasites known to the server.
    pub async fn list_datasites(&self) -> SyncResult<Vec<String>> {
        let resp = self
            .http
            .get(self.url("sync/datasites"))
            .header(ACTING_USER_HEADER, &self.user)
            .send()
            .await?;
        let list: DatasiteList = self.check(resp).await?.json().await?;
        Ok(list.datasites)
    }

    /// Hash manifest for a scope, filtered to paths this user may read.
    pub async fn manifest(&self, scope: &SyncPath) -> SyncResult<Vec<ManifestEntry>> {
        let resp = self
            .http
            .get(self.url(&format!("sync/manifest/{scope}")))
            .header(ACTING_USER_HEADER, &self.user)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// Full readable content of a scope in one exchange (bootstrap only).
    pub async fn batch(&self, scope: &SyncPath) -> SyncResult<SyncBatch> {
        let resp = self
            .http
            .get(self.url(&format!("sync/batch/{scope}")))
            .header(ACTING_USER_HEADER, &self.user)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// Download one file's content and hash.
    pub async fn download(&self, path: &SyncPath) -> SyncResult<ContentPayload> {
        let resp = self
            .http
            .get(self.url(&format!("sync/content/{path}")))
            .header(ACTING_USER_HEADER, &self.user)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// Create or replace one file with full content.
    pub async fn upload(&self, path: &SyncPath, payload: &ContentPayload) -> SyncResult<String> {
        debug!(%path, "uploading full content");
        let resp = self
            .http
            .put(self.url(&format!("sync/content/{path}")))
            .header(ACTING_USER_HEADER, &self.user)
            .json(payload)
            .send()
            .await?;
        let ack: ApplyResponse = self.check(resp).await?.json().await?;
        Ok(ack.hash)
    }

    /// Apply a delta against the server's stored content.
    pub async fn apply_diff(&self, path: &SyncPath, payload: &DiffPayload) -> SyncResult<String> {
        debug!(%path, base = %payload.base_hash, "uploading delta");
        let resp = self
            .http
            .patch(self.url(&format!("sync/diff/{path}")))
            .header(ACTING_USER_HEADER, &self.user)
            .json(payload)
            .send()
            .await?;
        let ack: ApplyResponse = self.check(resp).await?.json().await?;
        Ok(ack.hash)
    }

    /// Delete one file remotely.
    pub async fn delete(&self, path: &SyncPath) -> SyncResult<()> {
        debug!(%path, "requesting remote delete");
        let resp = self
            .http
            .delete(self.url(&format!("sync/content/{path}")))
            .header(ACTING_USER_HEADER, &self.user)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }
}
