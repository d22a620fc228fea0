//! The `/api/fuse/*` read-side endpoints (spec §6): every query a FUSE
//! front-end needs to serve `readdir`/`getattr`/`read`/... is answered here
//! by taking a read lock on the shared [`Projection`] and returning a
//! JSON-shaped view of it. No handler ever mutates the projection — the
//! only writer is the background engine task (spec §5).

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use metafs_core::{FsAttrs, ReadResult};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use crate::infra::engine::EngineCommand;

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

fn validate_path(path: &str) -> AppResult<()> {
    if path.is_empty() {
        return Err(AppError::bad_request("path must not be empty"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub file_count: u64,
    pub directory_count: u64,
    pub total_size: u64,
    pub last_refresh_epoch_ms: Option<i64>,
    pub connected: bool,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let projection = state.projection.read().expect("projection lock poisoned");
    let stats = projection.get_stats();
    Json(StatsResponse {
        file_count: stats.file_count,
        directory_count: stats.directory_count,
        total_size: stats.total_size,
        last_refresh_epoch_ms: stats.last_refresh_epoch_ms,
        connected: state.is_ready(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReaddirResponse {
    pub entries: Vec<String>,
}

pub async fn readdir(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> AppResult<Json<ReaddirResponse>> {
    validate_path(&req.path)?;
    let projection = state.projection.read().expect("projection lock poisoned");
    let entries = projection
        .readdir(&req.path)
        .ok_or_else(|| AppError::not_found(format!("not a directory: {}", req.path)))?;
    Ok(Json(ReaddirResponse { entries }))
}

#[derive(Debug, Serialize)]
pub struct GetattrResponse {
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    pub mtime_epoch: i64,
    pub ctime_epoch: i64,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
}

impl From<FsAttrs> for GetattrResponse {
    fn from(attrs: FsAttrs) -> Self {
        Self {
            is_dir: attrs.is_dir,
            size: attrs.size,
            mode: attrs.mode,
            mtime_epoch: attrs.mtime_epoch,
            ctime_epoch: attrs.ctime_epoch,
            uid: attrs.uid,
            gid: attrs.gid,
            nlink: attrs.nlink,
        }
    }
}

pub async fn getattr(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> AppResult<Json<GetattrResponse>> {
    validate_path(&req.path)?;
    let projection = state.projection.read().expect("projection lock poisoned");
    let attrs = projection
        .getattr(&req.path)
        .ok_or_else(|| AppError::not_found(format!("no such path: {}", req.path)))?;
    Ok(Json(attrs.into()))
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

pub async fn exists(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> AppResult<Json<ExistsResponse>> {
    validate_path(&req.path)?;
    let projection = state.projection.read().expect("projection lock poisoned");
    Ok(Json(ExistsResponse {
        exists: projection.exists(&req.path),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub source_path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdav_url: Option<String>,
}

impl From<ReadResult> for ReadResponse {
    fn from(result: ReadResult) -> Self {
        Self {
            source_path: result.source_path,
            size: result.size,
            webdav_url: result.webdav_url,
        }
    }
}

pub async fn read(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> AppResult<Json<ReadResponse>> {
    validate_path(&req.path)?;
    let projection = state.projection.read().expect("projection lock poisoned");
    let result = projection
        .read(&req.path)
        .ok_or_else(|| AppError::not_found(format!("no such file: {}", req.path)))?;
    Ok(Json(result.into()))
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub file_path: String,
    pub size: u64,
    pub mtime: Option<chrono::DateTime<chrono::Utc>>,
    pub ctime: Option<chrono::DateTime<chrono::Utc>>,
    pub file_name: String,
    pub extension: String,
    pub file_type: Option<String>,
    pub properties: BTreeMap<String, String>,
}

pub async fn metadata(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> AppResult<Json<MetadataResponse>> {
    validate_path(&req.path)?;
    let projection = state.projection.read().expect("projection lock poisoned");
    let metadata = projection
        .get_metadata(&req.path)
        .ok_or_else(|| AppError::not_found(format!("no such file: {}", req.path)))?;
    Ok(Json(MetadataResponse {
        file_path: metadata.file_path,
        size: metadata.size,
        mtime: metadata.mtime,
        ctime: metadata.ctime,
        file_name: metadata.file_name,
        extension: metadata.extension,
        file_type: metadata.file_type,
        properties: metadata.properties,
    }))
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

pub async fn files(State(state): State<AppState>) -> Json<FilesResponse> {
    let projection = state.projection.read().expect("projection lock poisoned");
    Json(FilesResponse {
        files: projection.get_all_files(),
    })
}

#[derive(Debug, Serialize)]
pub struct DirectoriesResponse {
    pub directories: Vec<String>,
}

pub async fn directories(State(state): State<AppState>) -> Json<DirectoriesResponse> {
    let projection = state.projection.read().expect("projection lock poisoned");
    Json(DirectoriesResponse {
        directories: projection.get_all_directories(),
    })
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub status: &'static str,
}

pub async fn refresh(State(state): State<AppState>) -> AppResult<Json<RefreshResponse>> {
    let (respond_to, response) = tokio::sync::oneshot::channel();
    state
        .engine_commands
        .send(EngineCommand::Refresh { respond_to })
        .await
        .map_err(|_| AppError::internal("projection engine has shut down"))?;
    response
        .await
        .map_err(|_| AppError::internal("projection engine dropped the refresh request"))??;
    Ok(Json(RefreshResponse { status: "ok" }))
}
