//! Endpoint handlers.
//!
//! Each handler decodes its request, normalizes the pathname for this host,
//! runs one primitive and encodes the result. Filesystem work runs on the
//! blocking pool.

use axum::extract::State;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::codec::{ApiError, JsonRequest, Reply};
use super::AppState;
use crate::fetch::{fetch_to_file, FetchTls};
use crate::files::{self, FileError, Removal};
use crate::ospath;
use crate::protocol::{
    effective_timestamp, DirectoryCreateRequest, DirectoryRequest, DirectoryResponse, Envelope,
    ExecRequest, ExecResponse, FileDeleteRequest, FileDownloadRequest, FileDownloadResponse,
    FileGetRequest, FileGetResponse, FileResponse, FileUploadRequest, GetOsResponse, IsRequest,
    IsResponse, SpawnRequest, SpawnResponse,
};

type ApiResult<T> = Result<Reply<T>, ApiError>;

fn local_path(pathname: &str) -> PathBuf {
    PathBuf::from(ospath::local_path(pathname))
}

/// Client-facing message for a filesystem failure.
///
/// Path-state conflicts get their own message; I/O failures are named by
/// the step that failed, falling back to `fallback`.
fn file_error(e: FileError, fallback: &'static str) -> ApiError {
    let message = match &e {
        FileError::FileExists(_) => "file exists",
        FileError::DirectoryExists(_) => "directory exists",
        FileError::NotADirectory(_) => "not a directory",
        FileError::Io { op: "stat", .. } => "stat failed",
        FileError::Io { op: "read", .. } => "read failed",
        FileError::Io {
            op: "set modification time",
            ..
        } => "time update failed",
        FileError::Io {
            op: "read directory",
            ..
        } => return ApiError::internal("failed reading directory", e.to_string()),
        FileError::Io { .. } => fallback,
    };
    ApiError::bad_request(message, e)
}

/// Run a filesystem operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal("internal error", e))?
}

/// Host OS in the form clients expect (`linux`, `windows`, `darwin`, ...)
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

pub async fn ping() -> Reply<Envelope> {
    Reply::ok(Envelope::ok("pong"))
}

pub async fn os() -> Reply<GetOsResponse> {
    Reply::ok(GetOsResponse {
        success: true,
        message: "os".to_string(),
        os: host_os().to_string(),
    })
}

pub async fn exec(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<ExecRequest>,
) -> ApiResult<ExecResponse> {
    if state.verbose {
        info!("exec: {} {:?} env={:?}", req.command, req.args, req.env);
    }
    let output = state
        .executor
        .exec(&req.command, &req.args, &req.env)
        .await
        .map_err(|e| ApiError::bad_request("exec failed", e))?;

    Ok(Reply::ok(ExecResponse {
        success: true,
        message: "executed".to_string(),
        command: output.command,
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    }))
}

pub async fn spawn(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<SpawnRequest>,
) -> ApiResult<SpawnResponse> {
    if state.verbose {
        info!("spawn: {} {:?} env={:?}", req.command, req.args, req.env);
    }
    let output = state
        .executor
        .spawn(&req.command, &req.args, &req.env)
        .await
        .map_err(|e| ApiError::bad_request("spawn failed", e))?;

    Ok(Reply::ok(SpawnResponse {
        success: true,
        message: "spawned".to_string(),
        command: output.command,
        exit_code: output.exit_code,
    }))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<FileUploadRequest>,
) -> ApiResult<FileResponse> {
    if state.verbose {
        info!(
            "upload: {} ({} bytes, mode {:o}, force={})",
            req.pathname,
            req.content.len(),
            req.mode.0,
            req.force
        );
    }
    let path = local_path(&req.pathname);
    let timestamp = effective_timestamp(req.timestamp);
    let FileUploadRequest {
        pathname,
        content,
        mode,
        force,
        ..
    } = req;

    blocking(move || {
        files::write_file(&path, &content, mode, timestamp, force)
            .map_err(|e| file_error(e, "write failed"))
    })
    .await?;

    Ok(Reply::ok(FileResponse {
        success: true,
        message: "uploaded".to_string(),
        pathname,
    }))
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<FileDownloadRequest>,
) -> ApiResult<FileDownloadResponse> {
    if state.verbose {
        info!("download: {}", req.pathname);
    }
    let path = local_path(&req.pathname);
    let contents =
        blocking(move || files::read_file(&path).map_err(|e| file_error(e, "read failed"))).await?;

    Ok(Reply::ok(FileDownloadResponse {
        success: true,
        message: "download".to_string(),
        pathname: req.pathname,
        content: contents.content,
        timestamp: contents.timestamp,
        mode: contents.mode,
    }))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<FileDeleteRequest>,
) -> ApiResult<FileResponse> {
    if state.verbose {
        info!("delete: {}", req.pathname);
    }
    let path = local_path(&req.pathname);
    let removal =
        blocking(move || files::delete_file(&path).map_err(|e| file_error(e, "delete failed")))
            .await?;

    let message = match removal {
        Removal::Deleted => "deleted",
        Removal::NotPresent => "file not present",
    };
    Ok(Reply::ok(FileResponse {
        success: true,
        message: message.to_string(),
        pathname: req.pathname,
    }))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<FileGetRequest>,
) -> ApiResult<FileGetResponse> {
    if state.verbose {
        info!(
            "get: {} -> {} (auto-delete {}s)",
            req.url, req.pathname, req.auto_delete_seconds
        );
    }
    let path = local_path(&req.pathname);
    let tls = FetchTls {
        ca: &req.ca,
        cert: &req.cert,
        key: &req.key,
    };
    let bytes = fetch_to_file(&path, &req.url, tls)
        .await
        .map_err(|e| ApiError::bad_request("fetch failed", e))?;

    if req.auto_delete_seconds > 0 {
        let absolute = absolute(&path);
        let expires = state
            .registry
            .register(absolute, Duration::from_secs(req.auto_delete_seconds));
        debug!("{} will be deleted at {}", req.pathname, expires);
    }

    Ok(Reply::ok(FileGetResponse {
        success: true,
        message: "downloaded".to_string(),
        pathname: req.pathname,
        bytes,
    }))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub async fn dir(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<DirectoryRequest>,
) -> ApiResult<DirectoryResponse> {
    if state.verbose {
        info!("dir: {}", req.pathname);
    }
    let path = local_path(&req.pathname);
    let entries = blocking(move || {
        files::list_dir(&path).map_err(|e| file_error(e, "failed reading directory"))
    })
    .await?;

    Ok(Reply::ok(DirectoryResponse {
        success: true,
        message: "entries".to_string(),
        pathname: req.pathname,
        entries,
    }))
}

pub async fn mkdir(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<DirectoryCreateRequest>,
) -> ApiResult<FileResponse> {
    if state.verbose {
        info!("mkdir: {} (mode {:o})", req.pathname, req.mode.0);
    }
    let path = local_path(&req.pathname);
    let mode = req.mode;
    blocking(move || {
        files::create_dir_all(&path, mode).map_err(|e| file_error(e, "create failed"))
    })
    .await?;

    Ok(Reply::ok(FileResponse {
        success: true,
        message: "created".to_string(),
        pathname: req.pathname,
    }))
}

pub async fn rmdir(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<DirectoryRequest>,
) -> ApiResult<FileResponse> {
    if state.verbose {
        info!("rmdir: {}", req.pathname);
    }
    let path = local_path(&req.pathname);
    blocking(move || files::remove_dir_all(&path).map_err(|e| file_error(e, "destroy failed")))
        .await?;

    Ok(Reply::ok(FileResponse {
        success: true,
        message: "destroyed".to_string(),
        pathname: req.pathname,
    }))
}

pub async fn is_file(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<IsRequest>,
) -> ApiResult<IsResponse> {
    if state.verbose {
        info!("isfile: {}", req.pathname);
    }
    let path = local_path(&req.pathname);
    let result = blocking(move || Ok(files::is_file(&path))).await?;

    Ok(Reply::ok(IsResponse {
        success: true,
        message: "isfile".to_string(),
        pathname: req.pathname,
        result,
    }))
}

pub async fn is_dir(
    State(state): State<Arc<AppState>>,
    JsonRequest(req): JsonRequest<IsRequest>,
) -> ApiResult<IsResponse> {
    if state.verbose {
        info!("isdir: {}", req.pathname);
    }
    let path = local_path(&req.pathname);
    let result = blocking(move || Ok(files::is_dir(&path))).await?;

    Ok(Reply::ok(IsResponse {
        success: true,
        message: "isdir".to_string(),
        pathname: req.pathname,
        result,
    }))
}
