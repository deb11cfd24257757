//! HTTPS API: routes and handlers.
//!
//! The router is plain axum and knows nothing about TLS; the listener in
//! `daemon` terminates TLS and hands each connection to it.

pub mod codec;
pub mod handlers;

pub use codec::{ApiError, JsonRequest, Reply};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::executor::Executor;
use crate::sweeper::AutoDeleteRegistry;

/// Shared application state.
pub struct AppState {
    /// Files fetched with an auto-delete time
    pub registry: AutoDeleteRegistry,
    pub executor: Executor,
    /// Log each decoded request
    pub verbose: bool,
}

impl AppState {
    pub fn new(registry: AutoDeleteRegistry, executor: Executor, verbose: bool) -> Self {
        Self {
            registry,
            executor,
            verbose,
        }
    }
}

/// Build the router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping/", get(handlers::ping))
        .route("/os/", get(handlers::os))
        .route("/exec/", post(handlers::exec))
        .route("/spawn/", post(handlers::spawn))
        .route("/upload/", post(handlers::upload))
        .route("/download/", post(handlers::download))
        .route("/delete/", post(handlers::delete))
        .route("/get/", post(handlers::get))
        .route("/dir/", post(handlers::dir))
        .route("/mkdir/", post(handlers::mkdir))
        .route("/rmdir/", post(handlers::rmdir))
        .route("/isfile/", post(handlers::is_file))
        .route("/isdir/", post(handlers::is_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        DirectoryResponse, Envelope, ExecResponse, FileDownloadResponse, FileGetResponse,
        FileResponse, GetOsResponse, IsResponse, SpawnResponse,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn create_test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            AutoDeleteRegistry::new(),
            Executor::new(false),
            true,
        ))
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    async fn call_with(
        state: Arc<AppState>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let app = build_router(state);
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn post_json<T: DeserializeOwned>(uri: &str, body: Value) -> (StatusCode, T) {
        let (status, bytes) = call_with(create_test_state(), "POST", uri, Some(body)).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_ping() {
        let (status, bytes) = call_with(create_test_state(), "GET", "/ping/", None).await;
        assert_eq!(status, StatusCode::OK);
        let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope, Envelope::ok("pong"));
    }

    #[tokio::test]
    async fn test_os() {
        let (status, bytes) = call_with(create_test_state(), "GET", "/os/", None).await;
        assert_eq!(status, StatusCode::OK);
        let response: GetOsResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(response.success);
        assert_eq!(response.os, handlers::host_os());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = call_with(create_test_state(), "GET", "/nope/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let app = build_router(create_test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/exec/")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope, Envelope::fail("failed decoding request"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_nonzero_exit_is_success() {
        let (status, response): (_, ExecResponse) = post_json(
            "/exec/",
            json!({"Command": "sh", "Args": ["-c", "echo hi; exit 3"], "Env": null}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(response.message, "executed");
        assert_eq!(response.exit_code, 3);
        assert_eq!(response.stdout, "hi\n");
        assert_eq!(response.command, "sh -c echo hi; exit 3");
    }

    #[tokio::test]
    async fn test_exec_unstartable_is_400() {
        let (status, response): (_, Envelope) =
            post_json("/exec/", json!({"Command": "/definitely/not/here"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, Envelope::fail("exec failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_returns_without_waiting() {
        let start = std::time::Instant::now();
        let (status, response): (_, SpawnResponse) =
            post_json("/spawn/", json!({"Command": "sleep", "Args": ["5"]})).await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(response.message, "spawned");
        assert_eq!(response.exit_code, 0);
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = path_str(&temp_dir.path().join("blob.bin"));
        let content = b"\x00\xffbinary content";

        let (status, response): (_, FileResponse) = post_json(
            "/upload/",
            json!({
                "Pathname": path,
                "Content": b64(content),
                "Timestamp": "2020-05-06T07:08:09Z",
                "Mode": 0o600,
                "Force": false
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.message, "uploaded");

        let (status, response): (_, FileDownloadResponse) =
            post_json("/download/", json!({"Pathname": path})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(response.content, content);
        assert_eq!(response.timestamp.to_rfc3339(), "2020-05-06T07:08:09+00:00");
        assert!(response.mode.is_regular());
        #[cfg(unix)]
        assert_eq!(response.mode.perm(), 0o600);
    }

    #[tokio::test]
    async fn test_upload_existing_requires_force() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("keep.txt");
        std::fs::write(&file, "original").unwrap();
        let path = path_str(&file);

        let (status, response): (_, Envelope) = post_json(
            "/upload/",
            json!({"Pathname": path, "Content": b64(b"new")}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, Envelope::fail("file exists"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");

        let (status, _): (_, FileResponse) = post_json(
            "/upload/",
            json!({"Pathname": path, "Content": b64(b"new"), "Force": true}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_download_missing_is_400() {
        let temp_dir = TempDir::new().unwrap();
        let path = path_str(&temp_dir.path().join("missing"));

        let (status, response): (_, Envelope) =
            post_json("/download/", json!({"Pathname": path})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, Envelope::fail("stat failed"));
    }

    #[tokio::test]
    async fn test_delete_missing_reports_not_present() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("gone.txt");
        std::fs::write(&file, "x").unwrap();
        let path = path_str(&file);

        let (_, response): (_, FileResponse) =
            post_json("/delete/", json!({"Pathname": path})).await;
        assert!(response.success);
        assert_eq!(response.message, "deleted");

        let (status, response): (_, FileResponse) =
            post_json("/delete/", json!({"Pathname": path})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(response.message, "file not present");
    }

    #[tokio::test]
    async fn test_mkdir_dir_rmdir() {
        let temp_dir = TempDir::new().unwrap();
        let foo = temp_dir.path().join("foo");
        let moo = path_str(&foo.join("moo"));

        let (status, response): (_, FileResponse) =
            post_json("/mkdir/", json!({"Pathname": moo, "Mode": 0o755})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.message, "created");

        let (status, response): (_, DirectoryResponse) = post_json(
            "/dir/",
            json!({"Pathname": path_str(temp_dir.path())}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.message, "entries");
        let entry = response.entries.get("foo").expect("foo listed");
        assert!(entry.mode.is_dir());

        let (status, response): (_, Envelope) =
            post_json("/mkdir/", json!({"Pathname": moo})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, Envelope::fail("directory exists"));

        let (status, response): (_, FileResponse) =
            post_json("/rmdir/", json!({"Pathname": path_str(&foo)})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.message, "destroyed");
        assert!(!foo.exists());
    }

    #[tokio::test]
    async fn test_dir_on_file_is_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        for uri in ["/dir/", "/rmdir/"] {
            let (status, response): (_, Envelope) =
                post_json(uri, json!({"Pathname": path_str(&file)})).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response, Envelope::fail("not a directory"));
        }
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_isfile_isdir() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        let dir = path_str(temp_dir.path());
        let file = path_str(&file);

        let (_, response): (_, IsResponse) =
            post_json("/isfile/", json!({"Pathname": file})).await;
        assert!(response.result);
        assert_eq!(response.message, "isfile");

        let (_, response): (_, IsResponse) = post_json("/isfile/", json!({"Pathname": dir})).await;
        assert!(!response.result);

        let (_, response): (_, IsResponse) = post_json("/isdir/", json!({"Pathname": dir})).await;
        assert!(response.result);
        assert_eq!(response.message, "isdir");

        let (_, response): (_, IsResponse) = post_json("/isdir/", json!({"Pathname": file})).await;
        assert!(!response.result);
    }

    #[tokio::test]
    async fn test_get_registers_auto_delete() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
                .await
                .unwrap();
        });

        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("fetched.bin");
        let state = create_test_state();

        let (status, bytes) = call_with(
            state.clone(),
            "POST",
            "/get/",
            Some(json!({
                "Pathname": path_str(&dst),
                "URL": format!("http://{}/file", addr),
                "AutoDeleteSeconds": 600
            })),
        )
        .await;
        let response: FileGetResponse = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.message, "downloaded");
        assert_eq!(response.bytes, 5);
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
        assert!(state.registry.contains(&std::path::absolute(&dst).unwrap()));
    }

    #[tokio::test]
    async fn test_get_failure_is_generic() {
        let temp_dir = TempDir::new().unwrap();
        let (status, response): (_, Envelope) = post_json(
            "/get/",
            json!({
                "Pathname": path_str(&temp_dir.path().join("x")),
                "URL": "ftp://example.invalid/x"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, Envelope::fail("fetch failed"));
    }
}
