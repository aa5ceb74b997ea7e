//! tus-uploadr Library
//!
//! Resumable upload server speaking the tus 1.0.0 protocol with the
//! `creation` extension.
//!
//! # Features
//!
//! - **Resumable**: Clients append chunks at an agreed offset and can query
//!   progress after a dropped connection
//! - **Bounded Writes**: Request bodies are streamed to disk in fixed-size
//!   chunks, never buffered whole
//! - **Serialized Appends**: Concurrent appends to one upload are ordered by
//!   a per-upload lock, the loser sees a conflict
//! - **Graceful Shutdown**: In-flight requests drain within a deadline
//!
//! # Example
//!
//! ```no_run
//! use tus_uploadr::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metadata;
pub mod metrics;
pub mod protocol;
pub mod router;
pub mod server;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::{Server, ShutdownCoordinator};
pub use upload::{UploadError, UploadId, UploadRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
