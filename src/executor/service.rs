//! Service lifecycle.
//!
//! Services never block Exec: the container is started, its stream request
//! emitted, and the service keeps running until Destroy.

use super::Executor;
use super::stream::StreamRequest;
use crate::cancel::CancelToken;
use crate::constants::EXIT_CODE_KILLED;
use crate::environment::service_environment;
use crate::error::{Error, Result};
use crate::output::service_prefix;
use crate::pipeline::Container;
use crate::record::{Service, Status, now};
use crate::report;
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

impl Executor {
    pub(crate) async fn create_service(&self, _token: &CancelToken, ctn: &mut Container) -> Result<()> {
        if ctn.is_empty() {
            return Err(Error::EmptyContainer);
        }

        debug!(service = %ctn.name, image = %ctn.image, "Setting up service container");
        self.runtime().setup_container(ctn).await?;

        let build = self.build_record().clone();
        service_environment(ctn, &build, self.repo(), self.version());
        ctn.substitute()
    }

    pub(crate) async fn plan_service(&self, _token: &CancelToken, ctn: &Container) -> Result<()> {
        if ctn.is_empty() {
            return Err(Error::EmptyContainer);
        }

        let build = self.build_record().clone();
        let mut service = Service::from_build_and_container(&build, ctn);
        service.status = Status::Running;
        service.started = now();

        self.tracker().insert_service(&ctn.id, service.clone())?;
        report::send_service(self.client(), self.repo(), &build, &service).await;
        Ok(())
    }

    pub(crate) async fn exec_service(&self, token: &CancelToken, ctn: &mut Container) -> Result<()> {
        let handle = self.tracker().service(&ctn.id)?;

        let result = async {
            let pipeline = self.pipeline();
            self.runtime().run_container(ctn, &pipeline).await?;
            info!(service = %ctn.name, id = %ctn.id, "Started service container");

            let executor = self.clone();
            self.emit_stream(
                token,
                StreamRequest::new("service", ctn.clone(), move |token, ctn| {
                    async move { executor.stream_service(&token, &ctn).await }.boxed()
                }),
            )
            .await
        }
        .await;

        let err = result.as_ref().err().map(ToString::to_string);
        let (build, service) = {
            let build = self.build_record().clone();
            let mut service = handle.lock().unwrap_or_else(PoisonError::into_inner);
            report::snapshot_service(&mut service, ctn, err.as_deref());
            (build, service.clone())
        };
        report::send_service(self.client(), self.repo(), &build, &service).await;

        result
    }

    pub(crate) async fn stream_service(&self, token: &CancelToken, ctn: &Container) -> Result<()> {
        let logs = self.runtime().tail_container(ctn).await?;
        self.copy_logs(token, ctn, &service_prefix(&ctn.name), logs)
            .await
    }

    pub(crate) async fn destroy_service(&self, _token: &CancelToken, ctn: &mut Container) -> Result<()> {
        let handle = match self.tracker().service(&ctn.id) {
            Ok(handle) => handle,
            Err(_) => Arc::new(Mutex::new(Service::from_container_environment(ctn))),
        };

        {
            let mut service = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if service.status == Status::Pending {
                service.status = Status::Killed;
                service.exit_code = EXIT_CODE_KILLED;
                service.finished = now();
            }
        }

        let inspected = self.runtime().inspect_container(ctn).await;
        let removed = self.runtime().remove_container(ctn).await;
        let result = inspected.and(removed);

        let (build, service) = {
            let build = self.build_record().clone();
            let mut service = handle.lock().unwrap_or_else(PoisonError::into_inner);
            report::finalize_service(&build, &mut service, ctn);
            (build, service.clone())
        };
        report::send_service(self.client(), self.repo(), &build, &service).await;

        result
    }
}
