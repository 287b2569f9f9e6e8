//! Linux build executor.
//!
//! [`Executor`] implements [`Engine`] on top of any [`Runtime`]. One
//! executor runs exactly one build; it is cheap to clone (all state is
//! shared) so stage tasks and stream workers can each hold a handle.
//!
//! # Shared State
//!
//! ```text
//! ┌──────────────────────────── Executor ────────────────────────────┐
//! │ build record (Mutex)      pipeline working copy (RwLock<Arc<_>>) │
//! │ tracker: container id → step/service record                      │
//! │ stream requests: mpsc (units emit, stream_build drains)          │
//! │ init step, outputs container, first build error                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Record handles are only ever mutated by the unit that owns them; the
//! tracker and stage map are the only structures touched concurrently.

mod build;
mod outputs;
mod service;
mod stage;
mod step;
mod stream;

pub use outputs::{merge_outputs, parse_env_file, sanitize_outputs};
pub use stream::{StreamFn, StreamRequest};

use crate::api::ApiClient;
use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::constants::{DEFAULT_HOSTNAME, EXECUTOR_DRIVER, INIT_NAME};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::output::{OutputSink, StdoutSink, step_prefix};
use crate::pipeline::{Container, Pipeline, RuleData, Stage};
use crate::record::{Build, Repo};
use crate::report;
use crate::runtime::Runtime;
use crate::signal::StageMap;
use crate::storage::ArtifactStore;
use crate::tracker::Tracker;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Executor for a single build.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Arc<dyn Runtime>,
    client: Option<Arc<dyn ApiClient>>,
    storage: Option<Arc<dyn ArtifactStore>>,
    output: Arc<dyn OutputSink>,
    hostname: String,
    version: String,
    settings: Settings,
    repo: Repo,
    build: Mutex<Build>,
    pipeline: RwLock<Arc<Pipeline>>,
    init: Mutex<Container>,
    outputs: Mutex<Container>,
    tracker: Tracker,
    stream_tx: mpsc::Sender<StreamRequest>,
    stream_rx: tokio::sync::Mutex<mpsc::Receiver<StreamRequest>>,
    build_error: Mutex<Option<String>>,
}

// =============================================================================
// Builder
// =============================================================================

/// Configuration bundle for an [`Executor`].
#[derive(Default)]
pub struct ExecutorBuilder {
    build: Option<Build>,
    pipeline: Option<Pipeline>,
    repo: Option<Repo>,
    runtime: Option<Arc<dyn Runtime>>,
    client: Option<Arc<dyn ApiClient>>,
    storage: Option<Arc<dyn ArtifactStore>>,
    output: Option<Arc<dyn OutputSink>>,
    hostname: String,
    version: String,
    settings: Settings,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mut self, build: Build) -> Self {
        self.build = Some(build);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn repo(mut self, repo: Repo) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ArtifactStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Validates the bundle and produces an executor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first missing field.
    pub fn finish(self) -> Result<Executor> {
        let build = self
            .build
            .ok_or_else(|| Error::InvalidConfig("no build provided".to_string()))?;
        let pipeline = self
            .pipeline
            .ok_or_else(|| Error::InvalidConfig("no pipeline provided".to_string()))?;
        let repo = self
            .repo
            .ok_or_else(|| Error::InvalidConfig("no repo provided".to_string()))?;
        let runtime = self
            .runtime
            .ok_or_else(|| Error::InvalidConfig("no runtime provided".to_string()))?;

        if pipeline.id.is_empty() {
            return Err(Error::InvalidConfig("pipeline has no id".to_string()));
        }

        let hostname = match self.hostname.trim() {
            "" => DEFAULT_HOSTNAME.to_string(),
            host => host.to_string(),
        };

        let outputs = outputs::outputs_container(&pipeline.id, &self.settings.outputs_image);
        let (stream_tx, stream_rx) = mpsc::channel(self.settings.stream_buffer.max(1));

        Ok(Executor {
            inner: Arc::new(Inner {
                runtime,
                client: self.client,
                storage: self.storage,
                output: self.output.unwrap_or_else(|| Arc::new(StdoutSink)),
                hostname,
                version: self.version,
                settings: self.settings,
                repo,
                build: Mutex::new(build),
                pipeline: RwLock::new(Arc::new(pipeline)),
                init: Mutex::new(Container::default()),
                outputs: Mutex::new(outputs),
                tracker: Tracker::new(),
                stream_tx,
                stream_rx: tokio::sync::Mutex::new(stream_rx),
                build_error: Mutex::new(None),
            }),
        })
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

impl Executor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn tracker(&self) -> &Tracker {
        &self.inner.tracker
    }

    pub(crate) fn runtime(&self) -> &dyn Runtime {
        self.inner.runtime.as_ref()
    }

    pub(crate) fn client(&self) -> Option<&dyn ApiClient> {
        self.inner.client.as_deref()
    }

    pub(crate) fn repo(&self) -> &Repo {
        &self.inner.repo
    }

    pub(crate) fn build_record(&self) -> MutexGuard<'_, Build> {
        self.inner.build.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared, read-only view of the pipeline working copy.
    pub(crate) fn pipeline(&self) -> Arc<Pipeline> {
        self.inner
            .pipeline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies an edit to the pipeline working copy (copy-on-write).
    pub(crate) fn update_pipeline(&self, edit: impl FnOnce(&mut Pipeline)) {
        let mut guard = self.inner.pipeline.write().unwrap_or_else(PoisonError::into_inner);
        edit(Arc::make_mut(&mut guard));
    }

    pub(crate) fn store_step(&self, index: usize, ctn: Container) {
        self.update_pipeline(|p| {
            if let Some(slot) = p.steps.get_mut(index) {
                *slot = ctn;
            }
        });
    }

    pub(crate) fn store_service(&self, index: usize, ctn: Container) {
        self.update_pipeline(|p| {
            if let Some(slot) = p.services.get_mut(index) {
                *slot = ctn;
            }
        });
    }

    pub(crate) fn store_stage(&self, index: usize, stage: Stage) {
        self.update_pipeline(|p| {
            if let Some(slot) = p.stages.get_mut(index) {
                *slot = stage;
            }
        });
    }

    pub(crate) fn init_step(&self) -> Container {
        self.inner.init.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn store_init(&self, ctn: Container) {
        *self.inner.init.lock().unwrap_or_else(PoisonError::into_inner) = ctn;
    }

    pub(crate) fn outputs(&self) -> Container {
        self.inner.outputs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn store_outputs(&self, ctn: Container) {
        *self.inner.outputs.lock().unwrap_or_else(PoisonError::into_inner) = ctn;
    }

    /// Remembers the first error that should fail the build.
    pub(crate) fn set_build_error(&self, err: &Error) {
        let mut slot = self.inner.build_error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err.to_string());
        }
    }

    pub(crate) fn build_error(&self) -> Option<String> {
        self.inner.build_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Values skip rulesets are evaluated against.
    pub(crate) fn rule_data(&self) -> RuleData {
        let build = self.build_record();
        RuleData {
            branch: build.branch.clone(),
            event: build.event.clone(),
            repo: self.inner.repo.full_name(),
            status: build.status,
        }
    }

    /// Writes a line to the build output.
    pub(crate) fn log_output(&self, line: &str) {
        self.inner.output.write_line(line);
    }

    /// Writes a line under the init step's prefix.
    pub(crate) fn log_init(&self, line: &str) {
        self.log_output(&format!("{} {line}", step_prefix(None, INIT_NAME)));
    }

    /// Writes runtime inspect output under the init step's prefix.
    pub(crate) fn log_init_bytes(&self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            self.log_init(line);
        }
    }

    pub(crate) fn storage(&self) -> Option<&dyn ArtifactStore> {
        self.inner.storage.as_deref()
    }

    pub(crate) fn stream_sender(&self) -> &mpsc::Sender<StreamRequest> {
        &self.inner.stream_tx
    }

    pub(crate) fn stream_receiver(&self) -> &tokio::sync::Mutex<mpsc::Receiver<StreamRequest>> {
        &self.inner.stream_rx
    }

    pub(crate) fn version(&self) -> &str {
        &self.inner.version
    }

    /// Applies `err` to the build record and reports it.
    pub(crate) async fn snapshot_build(&self, err: Option<&str>) {
        let build = {
            let mut build = self.build_record();
            report::snapshot_build(&mut build, err);
            build.clone()
        };
        report::send_build(self.client(), self.repo(), &build).await;
    }

    /// Resolves the final build status and reports it.
    pub(crate) async fn upload_build(&self) {
        let err = self.build_error();
        let build = {
            let mut build = self.build_record();
            report::finalize_build(&mut build, err.as_deref());
            build.clone()
        };
        report::send_build(self.client(), self.repo(), &build).await;
    }
}

// =============================================================================
// Engine
// =============================================================================

#[async_trait]
impl Engine for Executor {
    fn driver(&self) -> &str {
        EXECUTOR_DRIVER
    }

    fn get_build(&self) -> Result<Build> {
        Ok(self.build_record().clone())
    }

    fn get_pipeline(&self) -> Result<Pipeline> {
        Ok(self.pipeline().as_ref().clone())
    }

    async fn cancel_build(&self) -> Result<Build> {
        Executor::cancel_build(self).await
    }

    async fn create_build(&self, token: &CancelToken) -> Result<()> {
        Executor::create_build(self, token).await
    }

    async fn plan_build(&self, token: &CancelToken) -> Result<()> {
        Executor::plan_build(self, token).await
    }

    async fn assemble_build(&self, token: &CancelToken) -> Result<()> {
        Executor::assemble_build(self, token).await
    }

    async fn exec_build(&self, token: &CancelToken) -> Result<()> {
        Executor::exec_build(self, token).await
    }

    async fn stream_build(&self, token: &CancelToken) -> Result<()> {
        Executor::stream_build(self, token).await
    }

    async fn destroy_build(&self, token: &CancelToken) -> Result<()> {
        Executor::destroy_build(self, token).await
    }

    async fn create_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        Executor::create_service(self, token, ctn).await
    }

    async fn plan_service(&self, token: &CancelToken, ctn: &Container) -> Result<()> {
        Executor::plan_service(self, token, ctn).await
    }

    async fn exec_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        Executor::exec_service(self, token, ctn).await
    }

    async fn stream_service(&self, token: &CancelToken, ctn: &Container) -> Result<()> {
        Executor::stream_service(self, token, ctn).await
    }

    async fn destroy_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        Executor::destroy_service(self, token, ctn).await
    }

    async fn create_stage(&self, token: &CancelToken, stage: &mut Stage) -> Result<()> {
        Executor::create_stage(self, token, stage).await
    }

    async fn plan_stage(&self, token: &CancelToken, stage: &Stage, map: &StageMap) -> Result<()> {
        Executor::plan_stage(self, token, stage, map).await
    }

    async fn exec_stage(&self, token: &CancelToken, stage: &mut Stage, map: &StageMap) -> Result<()> {
        Executor::exec_stage(self, token, stage, map).await
    }

    async fn destroy_stage(&self, token: &CancelToken, stage: &mut Stage) -> Result<()> {
        Executor::destroy_stage(self, token, stage).await
    }

    async fn create_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        Executor::create_step(self, token, ctn).await
    }

    async fn plan_step(&self, token: &CancelToken, ctn: &Container) -> Result<()> {
        Executor::plan_step(self, token, ctn).await
    }

    async fn exec_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        Executor::exec_step(self, token, ctn).await
    }

    async fn stream_step(&self, token: &CancelToken, ctn: &Container) -> Result<()> {
        Executor::stream_step(self, token, ctn).await
    }

    async fn destroy_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        Executor::destroy_step(self, token, ctn).await
    }
}
