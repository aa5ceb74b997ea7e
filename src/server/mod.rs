//! HTTP server for tus-uploadr
//!
//! Binds the listener, serves HTTP/1.1 connections with `hyper` and hands
//! every request to [`handler::handle_request`]. Shutdown is driven through
//! the [`ShutdownCoordinator`]: once it fires, the accept loop exits and
//! open connections finish their current request before closing.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tus_uploadr::{config::Config, server::Server};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::bind(Config::default()).await?;
//! let coordinator = server.shutdown_coordinator();
//! let running = tokio::spawn(server.run());
//!
//! coordinator.shutdown(Duration::from_secs(30)).await?;
//! running.await??;
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod shutdown;

pub use shutdown::{shutdown_signal, RequestGuard, ShutdownCoordinator, ShutdownError};

use crate::config::{Config, ConfigError};
use crate::protocol::Capabilities;
use crate::router::TusRequestParser;
use crate::upload::{FileStore, UploadRegistry};
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Failed to prepare upload storage: {0}")]
    StorageError(#[source] std::io::Error),

    #[error(transparent)]
    ConfigError(#[from] ConfigError),
}

/// State shared by every connection
pub struct AppState {
    pub registry: Arc<UploadRegistry>,
    pub parser: TusRequestParser,
    pub capabilities: Capabilities,
    /// Scheme and authority prefixed to `Location` headers, without trailing `/`
    pub public_url: String,
    pub metrics_enabled: bool,
}

impl AppState {
    /// Absolute URL of an upload
    pub fn location_for(&self, id: &str) -> String {
        format!("{}{}/{}", self.public_url, self.parser.base_path(), id)
    }
}

/// HTTP Server
///
/// Binding happens in [`Server::bind`], so with port 0 the assigned port is
/// known before [`Server::run`] is called.
pub struct Server {
    state: Arc<AppState>,
    coordinator: ShutdownCoordinator,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Validate `config`, prepare the upload directory and bind the listener
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        config.validate()?;

        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        tokio::fs::create_dir_all(&config.upload.directory)
            .await
            .map_err(ServerError::StorageError)?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Actual bound address, important for port 0
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        let public_url = config
            .server
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", local_addr))
            .trim_end_matches('/')
            .to_string();

        let store = Arc::new(FileStore::new(&config.upload.directory));
        let limits = config.upload.limits();
        let state = AppState {
            registry: Arc::new(UploadRegistry::new(store, limits)),
            parser: TusRequestParser::new(&config.server.base_path),
            capabilities: Capabilities::new(limits.max_size),
            public_url,
            metrics_enabled: config.metrics.enabled,
        };

        if HeaderValue::from_str(&state.location_for("id")).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "public_url '{}' cannot be used in a Location header",
                state.public_url
            ))
            .into());
        }

        info!(
            address = %local_addr,
            public_url = %state.public_url,
            base_path = %state.parser.base_path(),
            upload_dir = %config.upload.directory.display(),
            max_size = limits.max_size,
            "Server bound"
        );

        Ok(Self {
            state: Arc::new(state),
            coordinator: ShutdownCoordinator::new(),
            listener,
            local_addr,
        })
    }

    /// The address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry holding every upload served by this instance
    pub fn registry(&self) -> Arc<UploadRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Handle used to stop the server
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        self.coordinator.clone()
    }

    /// Accept connections until shutdown begins.
    ///
    /// Connection errors are logged and never stop the server. Returns once
    /// the listener is closed; connections still open at that point finish
    /// their current request in their own tasks.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "Starting server");

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = self.coordinator.stopped() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "Accepted connection");

            let state = Arc::clone(&self.state);
            let coordinator = self.coordinator.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let tracker = coordinator.clone();
                let service = service_fn(move |req| {
                    // Counted from the moment the request arrives
                    let guard = tracker.track();
                    let state = Arc::clone(&state);
                    async move {
                        let _guard = guard;
                        handler::handle_request(req, state).await
                    }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    () = coordinator.stopped() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };

                if let Err(e) = result {
                    debug!(peer = %peer_addr, error = %e, "Connection closed with error");
                }
            });
        }

        info!(in_flight = self.coordinator.in_flight(), "Stopped accepting connections");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, UploadConfig};

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
                ..Default::default()
            },
            upload: UploadConfig {
                directory: dir.join("uploads"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_assigns_port_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let server = Server::bind(config).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        assert!(dir.path().join("uploads").is_dir());
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.address = "invalid".into();

        let result = Server::bind(config).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }

    #[tokio::test]
    async fn test_bind_address_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let first = Server::bind(test_config(dir.path())).await.unwrap();

        let mut config = test_config(dir.path());
        config.server.address = first.local_addr().to_string();

        let result = Server::bind(config).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.base_path = "files".into();

        let result = Server::bind(config).await;
        assert!(matches!(result, Err(ServerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_location_uses_bound_address_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(test_config(dir.path())).await.unwrap();

        let expected = format!("http://{}/files/abc", server.local_addr());
        assert_eq!(server.state.location_for("abc"), expected);
    }

    #[tokio::test]
    async fn test_location_uses_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.public_url = Some("https://uploads.example.com/".into());
        config.server.base_path = "/api/files/".into();

        let server = Server::bind(config).await.unwrap();
        assert_eq!(
            server.state.location_for("abc"),
            "https://uploads.example.com/api/files/abc"
        );
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(test_config(dir.path())).await.unwrap();
        let coordinator = server.shutdown_coordinator();

        let running = tokio::spawn(server.run());
        coordinator
            .shutdown(Duration::from_millis(100))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("run() should return after shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}
