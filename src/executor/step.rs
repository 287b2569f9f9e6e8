//! Step lifecycle.

use super::Executor;
use super::stream::StreamRequest;
use crate::cancel::CancelToken;
use crate::constants::EXIT_CODE_KILLED;
use crate::environment::{set_step_status, step_environment};
use crate::error::{Error, Result};
use crate::output::step_prefix;
use crate::pipeline::Container;
use crate::record::{Status, Step, now};
use crate::report;
use crate::storage::artifact_key;
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

impl Executor {
    pub(crate) async fn create_step(&self, _token: &CancelToken, ctn: &mut Container) -> Result<()> {
        if ctn.is_empty() {
            return Err(Error::EmptyContainer);
        }
        if ctn.is_init() {
            return Ok(());
        }

        debug!(step = %ctn.name, image = %ctn.image, "Setting up step container");
        self.runtime().setup_container(ctn).await?;

        let build = self.build_record().clone();
        step_environment(ctn, &build, self.repo(), self.version());
        ctn.substitute()
    }

    pub(crate) async fn plan_step(&self, _token: &CancelToken, ctn: &Container) -> Result<()> {
        if ctn.is_empty() {
            return Err(Error::EmptyContainer);
        }

        let (build, step) = {
            let build = self.build_record().clone();
            let mut step = Step::from_build_and_container(&build, ctn);
            step.status = Status::Running;
            step.started = now();
            (build, step)
        };

        self.tracker().insert_step(&ctn.id, step.clone())?;
        report::send_step(self.client(), self.repo(), &build, &step).await;
        Ok(())
    }

    pub(crate) async fn exec_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        if ctn.is_init() {
            return Ok(());
        }

        let handle = self.tracker().step(&ctn.id)?;
        let result = self.run_step_container(token, ctn).await;

        let err = result.as_ref().err().map(ToString::to_string);
        let (build, step) = {
            let mut build = self.build_record();
            let mut step = handle.lock().unwrap_or_else(PoisonError::into_inner);
            report::snapshot_step(&mut build, &mut step, ctn, err.as_deref());
            (build.clone(), step.clone())
        };
        report::send_step(self.client(), self.repo(), &build, &step).await;

        result
    }

    async fn run_step_container(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        let pipeline = self.pipeline();
        self.runtime().run_container(ctn, &pipeline).await?;
        info!(step = %ctn.name, id = %ctn.id, "Started step container");

        let executor = self.clone();
        self.emit_stream(
            token,
            StreamRequest::new("step", ctn.clone(), move |token, ctn| {
                async move { executor.stream_step(&token, &ctn).await }.boxed()
            }),
        )
        .await?;

        if ctn.detach {
            return Ok(());
        }

        tokio::select! {
            waited = self.runtime().wait_container(ctn) => waited?,
            () = token.cancelled() => return Err(Error::Cancelled),
        }
        self.runtime().inspect_container(ctn).await?;

        if !ctn.artifacts.is_empty() {
            self.collect_artifacts(ctn).await;
        }
        Ok(())
    }

    /// Copies declared artifacts out of an exited step.
    async fn collect_artifacts(&self, ctn: &Container) {
        let Some(store) = self.storage() else {
            return;
        };

        let names = match self.runtime().poll_file_names(ctn).await {
            Ok(names) => names,
            Err(e) => {
                warn!(step = %ctn.name, error = %e, "Unable to list artifacts");
                return;
            }
        };

        let repo = self.repo().full_name();
        let number = self.build_record().number;
        for name in names {
            let data = match self.runtime().poll_file_content(ctn, &name).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(step = %ctn.name, file = %name, error = %e, "Unable to read artifact");
                    continue;
                }
            };

            let key = artifact_key(&repo, number, &ctn.name, &name);
            match store.upload(&key, &data).await {
                Ok(digest) => info!(key = %key, digest = %digest, "Uploaded artifact"),
                Err(e) => warn!(key = %key, error = %e, "Unable to upload artifact"),
            }
        }
    }

    pub(crate) async fn stream_step(&self, token: &CancelToken, ctn: &Container) -> Result<()> {
        if ctn.is_init() {
            return Ok(());
        }

        let logs = self.runtime().tail_container(ctn).await?;
        let prefix = step_prefix(ctn.stage(), &ctn.name);
        self.copy_logs(token, ctn, &prefix, logs).await
    }

    pub(crate) async fn destroy_step(&self, _token: &CancelToken, ctn: &mut Container) -> Result<()> {
        if ctn.is_init() {
            return Ok(());
        }

        let handle = match self.tracker().step(&ctn.id) {
            Ok(handle) => handle,
            Err(_) => Arc::new(Mutex::new(Step::from_container_environment(ctn))),
        };

        {
            let mut step = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if step.status == Status::Pending {
                step.status = Status::Killed;
                step.exit_code = EXIT_CODE_KILLED;
                step.finished = now();
            }
        }

        let inspected = self.runtime().inspect_container(ctn).await;
        let removed = self.runtime().remove_container(ctn).await;
        let result = inspected.and(removed);

        let (build, step) = {
            let build = self.build_record().clone();
            let mut step = handle.lock().unwrap_or_else(PoisonError::into_inner);
            report::finalize_step(&build, &mut step, ctn);
            (build, step.clone())
        };
        report::send_step(self.client(), self.repo(), &build, &step).await;

        result
    }

    /// Runs one step of a sequence: skip check, plan, outputs merge, exec.
    ///
    /// Returns `Ok(())` without touching the runtime when the step is skipped.
    pub(crate) async fn run_step(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        if !ctn.execute(&self.rule_data()) {
            set_step_status(ctn, Status::Skipped);
            self.log_output(&format!(
                "{} skipping step: does not satisfy ruleset",
                step_prefix(ctn.stage(), &ctn.name)
            ));
            info!(step = %ctn.name, "Skipped step");
            return Ok(());
        }

        self.plan_step(token, ctn)
            .await
            .map_err(|e| Error::unit("plan", "step", &ctn.name, e))?;

        let (outputs, masked) = self
            .poll_outputs(token)
            .await
            .map_err(|e| Error::unit("poll outputs for", "step", &ctn.name, e))?;
        super::merge_outputs(ctn, outputs, masked);

        self.exec_step(token, ctn)
            .await
            .map_err(|e| Error::unit("execute", "step", &ctn.name, e))
    }
}
