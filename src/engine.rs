//! Build engine interface.
//!
//! [`Engine`] is what the rest of a worker process drives once a build is
//! assigned. The build-level phases are called in order:
//!
//! ```text
//! create_build → plan_build → assemble_build → exec_build ─┐
//!                                         stream_build ────┤ (concurrent)
//!                                         destroy_build ◄──┘ (always)
//! ```
//!
//! Unit-level operations (services, stages, steps) are exposed so callers
//! and tests can drive a single unit through its lifecycle:
//!
//! ```text
//! create → plan → exec → [stream] → destroy
//! ```

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::pipeline::{Container, Pipeline, Stage};
use crate::record::Build;
use crate::signal::StageMap;
use async_trait::async_trait;

#[async_trait]
pub trait Engine: Send + Sync {
    /// Returns the executor driver name.
    fn driver(&self) -> &str;

    /// Returns the current build record.
    fn get_build(&self) -> Result<Build>;

    /// Returns the working copy of the pipeline.
    fn get_pipeline(&self) -> Result<Pipeline>;

    /// Marks the build canceled, tears it down and returns the final record.
    async fn cancel_build(&self) -> Result<Build>;

    // =========================================================================
    // Build
    // =========================================================================

    async fn create_build(&self, token: &CancelToken) -> Result<()>;

    async fn plan_build(&self, token: &CancelToken) -> Result<()>;

    async fn assemble_build(&self, token: &CancelToken) -> Result<()>;

    async fn exec_build(&self, token: &CancelToken) -> Result<()>;

    /// Multiplexes log streams until `token` is canceled.
    async fn stream_build(&self, token: &CancelToken) -> Result<()>;

    /// Tears the build down. Call with a token that is not the Exec token.
    async fn destroy_build(&self, token: &CancelToken) -> Result<()>;

    // =========================================================================
    // Services
    // =========================================================================

    async fn create_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()>;

    async fn plan_service(&self, token: &CancelToken, ctn: &Container) -> Result<()>;

    async fn exec_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()>;

    async fn stream_service(&self, token: &CancelToken, ctn: &Container) -> Result<()>;

    async fn destroy_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()>;

    // =========================================================================
    // Stages
    // =========================================================================

    async fn create_stage(&self, token: &CancelToken, stage: &mut Stage) -> Result<()>;

    async fn plan_stage(&self, token: &CancelToken, stage: &Stage, map: &StageMap) -> Result<()>;

    async fn exec_stage(&self, token: &CancelToken, stage: &mut Stage, map: &StageMap) -> Result<()>;

    async fn destroy_stage(&self, token: &CancelToken, stage: &mut Stage) -> Result<()>;

    // =========================================================================
    // Steps
    // =========================================================================

    async fn create_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()>;

    async fn plan_step(&self, token: &CancelToken, ctn: &Container) -> Result<()>;

    async fn exec_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()>;

    async fn stream_step(&self, token: &CancelToken, ctn: &Container) -> Result<()>;

    async fn destroy_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()>;
}
