//! Common Test Infrastructure
//!
//! Starts a server on an OS-assigned port backed by a temporary upload
//! directory, and wraps the tus requests the tests make.

#![allow(dead_code)]

use bytes::Bytes;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tus_uploadr::config::{Config, ServerConfig, UploadConfig};
use tus_uploadr::server::{Server, ShutdownCoordinator};
use tus_uploadr::upload::UploadRegistry;

pub const TUS_VERSION: &str = "1.0.0";
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Test environment with a running server
pub struct TestEnv {
    pub server_addr: SocketAddr,
    pub client: reqwest::Client,
    pub registry: Arc<UploadRegistry>,
    pub coordinator: ShutdownCoordinator,
    pub upload_dir: PathBuf,
    _dir: tempfile::TempDir,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl TestEnv {
    /// Start a server with default limits
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Start a server after letting `customize` adjust the configuration
    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let upload_dir = dir.path().join("uploads");

        let mut config = Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
                ..Default::default()
            },
            upload: UploadConfig {
                directory: upload_dir.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        customize(&mut config);

        let server = Server::bind(config).await.expect("Failed to bind server");
        let server_addr = server.local_addr();
        let registry = server.registry();
        let coordinator = server.shutdown_coordinator();

        let server_handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build client");

        Self {
            server_addr,
            client,
            registry,
            coordinator,
            upload_dir,
            _dir: dir,
            _server_handle: server_handle,
        }
    }

    /// Base URL of the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.server_addr)
    }

    /// URL of the upload collection
    pub fn files_url(&self) -> String {
        format!("{}/files", self.base_url())
    }

    pub async fn options(&self) -> reqwest::Response {
        self.client
            .request(reqwest::Method::OPTIONS, self.files_url())
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .expect("OPTIONS failed")
    }

    /// POST a new upload, optionally with raw `Upload-Metadata`
    pub async fn create(&self, length: u64, metadata: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.files_url())
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Length", length.to_string());
        if let Some(metadata) = metadata {
            request = request.header("Upload-Metadata", metadata);
        }
        request.send().await.expect("POST failed")
    }

    /// POST a new upload and return its Location
    pub async fn create_upload(&self, length: u64) -> String {
        let response = self.create(length, None).await;
        assert_eq!(response.status(), 201);
        location(&response)
    }

    pub async fn head(&self, url: &str) -> reqwest::Response {
        self.client
            .head(url)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .expect("HEAD failed")
    }

    /// PATCH `body` at `offset` with the tus content type
    pub async fn patch(&self, url: &str, offset: u64, body: impl Into<Bytes>) -> reqwest::Response {
        self.client
            .patch(url)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Content-Type", OFFSET_OCTET_STREAM)
            .header("Upload-Offset", offset.to_string())
            .body(body.into())
            .send()
            .await
            .expect("PATCH failed")
    }

    /// Path of the stored bytes of the upload at `url`
    pub fn blob_path(&self, url: &str) -> PathBuf {
        self.upload_dir.join(upload_id(url))
    }

    /// Generate random test data
    pub fn random_payload(size: usize) -> Bytes {
        use rand::Rng;
        let mut rng = rand::rng();
        let data: Vec<u8> = (0..size).map(|_| rng.random()).collect();
        Bytes::from(data)
    }
}

/// Header value as a string
pub fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// `Location` of a create response
pub fn location(response: &reqwest::Response) -> String {
    header(response, "Location")
        .expect("Location header missing")
        .to_string()
}

/// Last path segment of an upload URL
pub fn upload_id(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or_default()
}
