//! Sync API handlers.
//!
//! Every mutating handler follows the same apply path: resolve the acting
//! identity, check the permission model, reject with no state change on
//! denial, apply atomically through the [`FileStore`], and return the
//! resulting hash so the client can confirm its record. Reads are filtered
//! by the same model: the manifest and batch omit paths the caller may not
//! read, and direct downloads of them are 403.

use crate::path::SyncPath;
use crate::perms::{is_permission_path, AccessLevel};
use crate::protocol::{
    ApplyResponse, BatchEntry, ContentPayload, DatasiteList, DiffPayload, ManifestEntry,
    SyncBatch, ACTING_USER_HEADER,
};
use crate::server::error::ApiError;
use crate::server::store::FileStore;
use crate::server::ServerState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use std::sync::Arc;
use tracing::debug;

fn acting_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(ACTING_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ApiError::BadRequest(format!("missing {ACTING_USER_HEADER} header"))
        })
}

fn parse(raw: &str) -> Result<SyncPath, ApiError> {
    Ok(SyncPath::parse(raw)?)
}

/// Permission level required to mutate `path`. Permission marker files are
/// admin-controlled so write access to a directory does not allow
/// rewriting its grants.
fn mutation_level(path: &SyncPath, admin_only: bool) -> AccessLevel {
    if is_permission_path(path) || admin_only {
        AccessLevel::Admin
    } else {
        AccessLevel::Write
    }
}

fn authorize(
    store: &FileStore,
    user: &str,
    path: &SyncPath,
    level: AccessLevel,
) -> Result<(), ApiError> {
    let tree = store.permission_tree();
    if tree.check(user, path, level) {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied(format!(
            "{user} may not access {path}"
        )))
    }
}

pub async fn healthz() -> &'static str {
    "OK"
}

pub async fn list_datasites(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<DatasiteList>, ApiError> {
    Ok(Json(DatasiteList {
        datasites: state.store.datasites()?,
    }))
}

pub async fn get_manifest(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(scope): Path<String>,
) -> Result<Json<Vec<ManifestEntry>>, ApiError> {
    let user = acting_user(&headers)?;
    let scope = parse(&scope)?;
    let tree = state.store.permission_tree();
    let entries: Vec<ManifestEntry> = state
        .store
        .list(&scope)?
        .into_iter()
        .filter(|(path, _)| tree.check(&user, path, AccessLevel::Read))
        .map(|(path, record)| record.to_manifest_entry(&path))
        .collect();
    debug!(%scope, %user, entries = entries.len(), "manifest served");
    Ok(Json(entries))
}

pub async fn get_batch(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(scope): Path<String>,
) -> Result<Json<SyncBatch>, ApiError> {
    let user = acting_user(&headers)?;
    let scope = parse(&scope)?;
    let tree = state.store.permission_tree();
    let mut entries = Vec::new();
    for (path, record) in state.store.list(&scope)? {
        if !tree.check(&user, &path, AccessLevel::Read) {
            continue;
        }
        let (content, _) = state.store.read(&path).await?;
        entries.push(BatchEntry {
            path,
            content_b64: B64.encode(&content),
            hash: record.hash,
        });
    }
    debug!(%scope, %user, entries = entries.len(), "batch served");
    Ok(Json(SyncBatch { entries }))
}

pub async fn get_content(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<ContentPayload>, ApiError> {
    let user = acting_user(&headers)?;
    let path = parse(&path)?;
    authorize(&state.store, &user, &path, AccessLevel::Read)?;
    let (content, record) = state.store.read(&path).await?;
    Ok(Json(ContentPayload {
        content_b64: B64.encode(&content),
        hash: record.hash,
    }))
}

pub async fn put_content(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Json(payload): Json<ContentPayload>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let path = parse(&path)?;
    let level = mutation_level(&path, false);
    authorize(&state.store, &user, &path, level)?;
    let content = B64.decode(&payload.content_b64)?;
    let record = state.store.put(&path, &content, &payload.hash).await?;
    Ok(Json(ApplyResponse { hash: record.hash }))
}

pub async fn patch_diff(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Json(payload): Json<DiffPayload>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let path = parse(&path)?;
    let level = mutation_level(&path, false);
    authorize(&state.store, &user, &path, level)?;
    let delta = B64.decode(&payload.delta_b64)?;
    let record = state
        .store
        .apply_diff(&path, &payload.base_hash, &delta, &payload.expected_hash)
        .await?;
    Ok(Json(ApplyResponse { hash: record.hash }))
}

pub async fn delete_content(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let user = acting_user(&headers)?;
    let path = parse(&path)?;
    let level = mutation_level(&path, state.config.admin_only_delete);
    authorize(&state.store, &user, &path, level)?;
    let record = state
        .store
        .read(&path)
        .await
        .map(|(_, record)| record)
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::NotFound(path.to_string()),
            other => other,
        })?;
    state.store.delete(&path).await?;
    Ok(Json(ApplyResponse { hash: record.hash }))
}
