//! Container runtime interface.
//!
//! The executor never talks to a container daemon directly. Everything it
//! needs from one is expressed by the [`Runtime`] trait: build-scoped
//! resources (network, volume, setup/teardown hooks), container lifecycle
//! (setup → run → wait → inspect → remove), log tailing, and reading files
//! out of a running or exited container.
//!
//! # Lifecycle
//!
//! ```text
//! setup_build → create_network → create_volume → setup_container(s)
//!     → assemble_build → run_container → wait_container → inspect_container
//!     → remove_container(s) → remove_volume → remove_network → remove_build
//! ```
//!
//! # Implementations
//!
//! - `MockRuntime`: in-memory runtime recording calls (see [`crate::runtimes`])

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::pipeline::{Container, Pipeline};
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Byte stream of a container's combined stdout/stderr.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Container runtime capability set consumed by the executor.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; stages call into the runtime
/// concurrently for distinct containers.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Returns the runtime driver name (e.g. `"docker"`).
    fn driver(&self) -> &str;

    // =========================================================================
    // Build Resources
    // =========================================================================

    /// Prepares build-scoped runtime state before any resource is created.
    async fn setup_build(&self, pipeline: &Pipeline) -> Result<()>;

    /// Final pass once every container was set up, before any runs.
    async fn assemble_build(&self, pipeline: &Pipeline) -> Result<()>;

    /// Runs build-level log/event plumbing until `token` is canceled.
    async fn stream_build(&self, token: &CancelToken, pipeline: &Pipeline) -> Result<()>;

    /// Tears down build-scoped runtime state.
    async fn remove_build(&self, pipeline: &Pipeline) -> Result<()>;

    async fn create_network(&self, pipeline: &Pipeline) -> Result<()>;

    /// Returns a human-readable description of the network.
    async fn inspect_network(&self, pipeline: &Pipeline) -> Result<Vec<u8>>;

    async fn remove_network(&self, pipeline: &Pipeline) -> Result<()>;

    async fn create_volume(&self, pipeline: &Pipeline) -> Result<()>;

    /// Returns a human-readable description of the volume.
    async fn inspect_volume(&self, pipeline: &Pipeline) -> Result<Vec<u8>>;

    async fn remove_volume(&self, pipeline: &Pipeline) -> Result<()>;

    // =========================================================================
    // Containers
    // =========================================================================

    /// Prepares a container's image according to its pull policy.
    async fn setup_container(&self, ctn: &Container) -> Result<()>;

    /// Returns a human-readable description of the container's image.
    async fn inspect_image(&self, ctn: &Container) -> Result<Vec<u8>>;

    /// Creates and starts the container.
    async fn run_container(&self, ctn: &Container, pipeline: &Pipeline) -> Result<()>;

    /// Blocks until the container exits.
    async fn wait_container(&self, ctn: &Container) -> Result<()>;

    /// Refreshes runtime-owned fields of the container (exit code).
    async fn inspect_container(&self, ctn: &mut Container) -> Result<()>;

    async fn remove_container(&self, ctn: &Container) -> Result<()>;

    /// Opens the container's log stream, following until it exits.
    async fn tail_container(&self, ctn: &Container) -> Result<LogStream>;

    // =========================================================================
    // Files
    // =========================================================================

    /// Reads a file out of the running outputs container.
    async fn poll_outputs_container(&self, ctn: &Container, path: &str) -> Result<Vec<u8>>;

    /// Lists files under the container's declared artifact paths.
    async fn poll_file_names(&self, ctn: &Container) -> Result<Vec<String>>;

    /// Reads one file from the container's filesystem.
    async fn poll_file_content(&self, ctn: &Container, path: &str) -> Result<Vec<u8>>;
}
