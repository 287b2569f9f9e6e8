//! Build-level phases.
//!
//! Create, Plan, Assemble and Exec abort on the first failure and snapshot
//! the build record on every exit path. Destroy is best-effort: every
//! teardown is attempted, failures are logged, and the final record is
//! uploaded last.

use super::Executor;
use crate::cancel::CancelToken;
use crate::constants::EXECUTOR_DRIVER;
use crate::error::{Error, Result};
use crate::group::TaskGroup;
use crate::pipeline::Stage;
use crate::record::{Build, Status, now};
use crate::report;
use crate::signal::StageMap;
use crate::tracker::Tracked;
use std::sync::PoisonError;
use tracing::{error, info, warn};

impl Executor {
    // =========================================================================
    // Create
    // =========================================================================

    pub(crate) async fn create_build(&self, token: &CancelToken) -> Result<()> {
        let result = self.try_create_build(token).await;

        let err = result.as_ref().err().map(ToString::to_string);
        if let Err(e) = &result {
            self.set_build_error(e);
        }
        self.snapshot_build(err.as_deref()).await;

        result
    }

    async fn try_create_build(&self, token: &CancelToken) -> Result<()> {
        let pipeline = self.pipeline();

        if self.storage().is_none()
            && let Some(ctn) = pipeline.containers().find(|c| !c.artifacts.is_empty())
        {
            return Err(Error::MissingStorage {
                container: ctn.name.clone(),
            });
        }

        {
            let mut build = self.build_record();
            build.status = Status::Running;
            build.started = now();
            build.host = self.hostname().to_string();
            build.distribution = EXECUTOR_DRIVER.to_string();
            build.runtime = self.runtime().driver().to_string();
        }

        self.runtime().setup_build(&pipeline).await?;

        let mut init = pipeline
            .init_step()
            .cloned()
            .ok_or_else(|| Error::MissingInit(pipeline.id.clone()))?;

        self.create_step(token, &mut init)
            .await
            .map_err(|e| Error::unit("create", "step", &init.name, e))?;
        self.plan_step(token, &init)
            .await
            .map_err(|e| Error::unit("plan", "step", &init.name, e))?;
        self.store_init(init);

        info!(pipeline = %pipeline.id, "Created build");
        Ok(())
    }

    // =========================================================================
    // Plan
    // =========================================================================

    pub(crate) async fn plan_build(&self, _token: &CancelToken) -> Result<()> {
        let result = async {
            let pipeline = self.pipeline();

            self.log_init("> Preparing network for build...");
            self.runtime().create_network(&pipeline).await?;
            let network = self.runtime().inspect_network(&pipeline).await?;
            self.log_init_bytes(&network);

            self.log_init("> Preparing volume for build...");
            self.runtime().create_volume(&pipeline).await?;
            let volume = self.runtime().inspect_volume(&pipeline).await?;
            self.log_init_bytes(&volume);

            Ok(())
        }
        .await;

        let err = result.as_ref().err().map(ToString::to_string);
        if let Err(e) = &result {
            self.set_build_error(e);
        }
        self.snapshot_init(err.as_deref()).await;
        self.snapshot_build(err.as_deref()).await;

        result
    }

    // =========================================================================
    // Assemble
    // =========================================================================

    pub(crate) async fn assemble_build(&self, token: &CancelToken) -> Result<()> {
        let result = self.try_assemble_build(token).await;

        let err = result.as_ref().err().map(ToString::to_string);
        if let Err(e) = &result {
            self.set_build_error(e);
        }
        self.upload_init(err.as_deref()).await;
        self.snapshot_build(err.as_deref()).await;

        result
    }

    async fn try_assemble_build(&self, token: &CancelToken) -> Result<()> {
        let pipeline = self.pipeline();

        if self.settings().enforce_trusted_repos
            && !self.repo().trusted
            && let Some(ctn) = pipeline.containers().find(|c| c.privileged && !c.is_init())
        {
            return Err(Error::Untrusted {
                repo: self.repo().full_name(),
                container: ctn.name.clone(),
            });
        }

        for (index, mut ctn) in pipeline.services.iter().cloned().enumerate() {
            self.log_init(&format!("> Preparing service image {}", ctn.image));
            self.create_service(token, &mut ctn)
                .await
                .map_err(|e| Error::unit("create", "service", &ctn.name, e))?;
            let image = self
                .runtime()
                .inspect_image(&ctn)
                .await
                .map_err(|e| Error::unit("inspect", "service", &ctn.name, e))?;
            self.log_init_bytes(&image);
            self.store_service(index, ctn);
        }

        for (index, mut stage) in pipeline.stages.iter().cloned().enumerate() {
            if stage.is_init() {
                continue;
            }
            self.create_stage(token, &mut stage)
                .await
                .map_err(|e| Error::unit("create", "stage", &stage.name, e))?;
            self.store_stage(index, stage);
        }

        for (index, mut ctn) in pipeline.steps.iter().cloned().enumerate() {
            if ctn.is_init() {
                continue;
            }
            self.log_init(&format!("> Preparing step image {}", ctn.image));
            self.create_step(token, &mut ctn)
                .await
                .map_err(|e| Error::unit("create", "step", &ctn.name, e))?;
            let image = self
                .runtime()
                .inspect_image(&ctn)
                .await
                .map_err(|e| Error::unit("inspect", "step", &ctn.name, e))?;
            self.log_init_bytes(&image);
            self.store_step(index, ctn);
        }

        self.create_outputs(token)
            .await
            .map_err(|e| Error::unit("create", "container", "outputs", e))?;

        self.runtime().assemble_build(&self.pipeline()).await?;
        info!(pipeline = %pipeline.id, "Assembled build");
        Ok(())
    }

    // =========================================================================
    // Exec
    // =========================================================================

    pub(crate) async fn exec_build(&self, token: &CancelToken) -> Result<()> {
        let result = self.try_exec_build(token).await;

        let err = result.as_ref().err().map(ToString::to_string);
        if let Err(e) = &result {
            self.set_build_error(e);
        }
        self.snapshot_build(err.as_deref()).await;

        result
    }

    async fn try_exec_build(&self, token: &CancelToken) -> Result<()> {
        self.exec_outputs(token)
            .await
            .map_err(|e| Error::unit("execute", "container", "outputs", e))?;

        let pipeline = self.pipeline();

        for (index, mut ctn) in pipeline.services.iter().cloned().enumerate() {
            self.plan_service(token, &ctn)
                .await
                .map_err(|e| Error::unit("plan", "service", &ctn.name, e))?;
            let executed = self
                .exec_service(token, &mut ctn)
                .await
                .map_err(|e| Error::unit("execute", "service", &ctn.name, e));
            self.store_service(index, ctn);
            executed?;
        }

        for (index, mut ctn) in pipeline.steps.iter().cloned().enumerate() {
            if ctn.is_init() {
                continue;
            }
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let ran = self.run_step(token, &mut ctn).await;
            self.store_step(index, ctn);
            ran?;
        }

        let stages: Vec<(usize, Stage)> = pipeline
            .stages
            .iter()
            .cloned()
            .enumerate()
            .filter(|(_, stage)| !stage.is_init())
            .collect();
        if stages.is_empty() {
            return Ok(());
        }

        let map = StageMap::new();
        for (_, stage) in &stages {
            map.register(&stage.name);
        }

        let mut group = TaskGroup::new(token);
        for (index, mut stage) in stages {
            let executor = self.clone();
            let map = map.clone();
            let token = group.token();

            group.spawn(async move {
                if let Err(e) = executor.plan_stage(&token, &stage, &map).await {
                    map.register(&stage.name).complete(Some(e.to_string()));
                    return Err(Error::unit("plan", "stage", &stage.name, e));
                }

                let result = executor
                    .exec_stage(&token, &mut stage, &map)
                    .await
                    .map_err(|e| Error::unit("execute", "stage", &stage.name, e));
                executor.store_stage(index, stage);
                result
            });
        }

        group.wait().await
    }

    // =========================================================================
    // Destroy
    // =========================================================================

    pub(crate) async fn destroy_build(&self, token: &CancelToken) -> Result<()> {
        let pipeline = self.pipeline();
        let mut first = None;

        for (index, mut ctn) in pipeline.steps.iter().cloned().enumerate() {
            if ctn.is_init() {
                continue;
            }
            if let Err(e) = self.destroy_step(token, &mut ctn).await {
                self.cleanup_failed(&format!("step {}", ctn.name), e, &mut first);
            }
            self.store_step(index, ctn);
        }

        for (index, mut stage) in pipeline.stages.iter().cloned().enumerate() {
            if let Err(e) = self.destroy_stage(token, &mut stage).await {
                self.cleanup_failed(&format!("stage {}", stage.name), e, &mut first);
            }
            self.store_stage(index, stage);
        }

        for (index, mut ctn) in pipeline.services.iter().cloned().enumerate() {
            if let Err(e) = self.destroy_service(token, &mut ctn).await {
                self.cleanup_failed(&format!("service {}", ctn.name), e, &mut first);
            }
            self.store_service(index, ctn);
        }

        if let Err(e) = self.destroy_outputs(token).await {
            self.cleanup_failed("outputs container", e, &mut first);
        }
        if let Err(e) = self.runtime().remove_volume(&pipeline).await {
            self.cleanup_failed("volume", e, &mut first);
        }
        if let Err(e) = self.runtime().remove_network(&pipeline).await {
            self.cleanup_failed("network", e, &mut first);
        }
        if let Err(e) = self.runtime().remove_build(&pipeline).await {
            self.cleanup_failed("build", e, &mut first);
        }

        self.upload_build().await;
        info!(pipeline = %pipeline.id, "Destroyed build");

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn cleanup_failed(&self, what: &str, err: Error, first: &mut Option<Error>) {
        self.log_output(&format!("unable to destroy {what}: {err}"));
        error!(resource = what, error = %err, "Unable to destroy resource");
        first.get_or_insert(err);
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    pub(crate) async fn cancel_build(&self) -> Result<Build> {
        let build = {
            let mut build = self.build_record();
            build.status = Status::Canceled;
            build.clone()
        };
        warn!(build = build.number, "Canceling build");

        for entry in self.tracker().entries() {
            match entry {
                Tracked::Step(handle) => {
                    let step = {
                        let mut step = handle.lock().unwrap_or_else(PoisonError::into_inner);
                        if step.status.is_terminal() {
                            continue;
                        }
                        step.status = Status::Canceled;
                        step.finished = now();
                        step.clone()
                    };
                    report::send_step(self.client(), self.repo(), &build, &step).await;
                }
                Tracked::Service(handle) => {
                    let service = {
                        let mut service = handle.lock().unwrap_or_else(PoisonError::into_inner);
                        if service.status.is_terminal() {
                            continue;
                        }
                        service.status = Status::Canceled;
                        service.finished = now();
                        service.clone()
                    };
                    report::send_service(self.client(), self.repo(), &build, &service).await;
                }
            }
        }

        if let Err(e) = self.destroy_build(&CancelToken::new()).await {
            error!(error = %e, "Unable to destroy canceled build");
        }

        Ok(self.build_record().clone())
    }

    // =========================================================================
    // Init Step Reporting
    // =========================================================================

    async fn snapshot_init(&self, err: Option<&str>) {
        let init = self.init_step();
        let Ok(handle) = self.tracker().step(&init.id) else {
            return;
        };

        let (build, step) = {
            let mut build = self.build_record();
            let mut step = handle.lock().unwrap_or_else(PoisonError::into_inner);
            report::snapshot_step(&mut build, &mut step, &init, err);
            (build.clone(), step.clone())
        };
        report::send_step(self.client(), self.repo(), &build, &step).await;
    }

    async fn upload_init(&self, err: Option<&str>) {
        let init = self.init_step();
        let Ok(handle) = self.tracker().step(&init.id) else {
            return;
        };

        let (build, step) = {
            let build = self.build_record().clone();
            let mut step = handle.lock().unwrap_or_else(PoisonError::into_inner);
            match err {
                Some(err) => {
                    step.status = Status::Error;
                    step.error = err.to_string();
                }
                None => step.status = Status::Success,
            }
            step.finished = now();
            (build, step.clone())
        };
        report::send_step(self.client(), self.repo(), &build, &step).await;
    }
}
