//! Snapshot and upload of build, step and service records.
//!
//! Each record has two reporting points:
//!
//! - **snapshot**: push the current state mid-flight (error fields applied
//!   when an error is given)
//! - **upload**: resolve the final status, stamp `finished`, push
//!
//! The mutation half is synchronous so callers can apply it under their own
//! lock and push a clone afterwards. Pushing never fails the caller: an
//! unreachable server is logged and ignored.

use crate::api::ApiClient;
use crate::pipeline::Container;
use crate::record::{Build, Repo, Service, Status, Step, now};
use tracing::{debug, error};

// =============================================================================
// Build
// =============================================================================

/// Applies an error to a build mid-flight. Canceled builds keep their status.
pub fn snapshot_build(build: &mut Build, err: Option<&str>) {
    if let Some(err) = err {
        build.error = err.to_string();
        if build.status != Status::Canceled {
            build.status = Status::Error;
        }
        build.finished = now();
    }
}

/// Resolves a build's terminal status.
///
/// - `canceled` is never overwritten
/// - an attached error forces `error`
/// - `pending` at this point means the build never ran and becomes `killed`
/// - anything else that is not `error`/`failure` becomes `success`
pub fn finalize_build(build: &mut Build, err: Option<&str>) {
    build.finished = now();
    if build.started == 0 {
        build.started = build.finished;
    }

    if let Some(err) = err {
        build.error = err.to_string();
    }

    match build.status {
        Status::Canceled => {}
        _ if err.is_some() => build.status = Status::Error,
        Status::Pending => build.status = Status::Killed,
        Status::Error | Status::Failure => {}
        _ => build.status = Status::Success,
    }
}

// =============================================================================
// Step
// =============================================================================

/// Applies exit code and error to a step mid-flight. Canceled steps keep
/// their status.
///
/// A non-zero exit code fails the step, and fails the build unless the
/// step's ruleset continues on failure.
pub fn snapshot_step(build: &mut Build, step: &mut Step, ctn: &Container, err: Option<&str>) {
    step.exit_code = ctn.exit_code;

    if let Some(err) = err {
        step.error = err.to_string();
        if step.status != Status::Canceled {
            step.status = Status::Error;
        }
        step.finished = now();
        return;
    }

    if ctn.exit_code != 0 && !step.status.is_terminal() {
        step.status = Status::Failure;
        step.finished = now();
        if !ctn.ruleset.continue_on_failure && build.status == Status::Running {
            build.status = Status::Failure;
        }
    }
}

/// Resolves a step's terminal status.
pub fn finalize_step(build: &Build, step: &mut Step, ctn: &Container) {
    if step.finished == 0 {
        step.finished = now();
    }
    if step.started == 0 {
        step.started = step.finished;
    }
    if ctn.exit_code != 0 && step.exit_code == 0 {
        step.exit_code = ctn.exit_code;
    }

    if build.status == Status::Canceled && !step.status.is_terminal() {
        step.status = Status::Canceled;
        return;
    }

    if step.status == Status::Running {
        step.status = if step.exit_code != 0 {
            Status::Failure
        } else {
            Status::Success
        };
    }
}

// =============================================================================
// Service
// =============================================================================

/// Applies exit code and error to a service mid-flight.
pub fn snapshot_service(service: &mut Service, ctn: &Container, err: Option<&str>) {
    service.exit_code = ctn.exit_code;

    if let Some(err) = err {
        service.error = err.to_string();
        if service.status != Status::Canceled {
            service.status = Status::Error;
        }
        service.finished = now();
    }
}

/// Resolves a service's terminal status.
pub fn finalize_service(build: &Build, service: &mut Service, ctn: &Container) {
    if service.finished == 0 {
        service.finished = now();
    }
    if service.started == 0 {
        service.started = service.finished;
    }
    if ctn.exit_code != 0 && service.exit_code == 0 {
        service.exit_code = ctn.exit_code;
    }

    if build.status == Status::Canceled && !service.status.is_terminal() {
        service.status = Status::Canceled;
        return;
    }

    if service.status == Status::Running {
        service.status = if service.exit_code != 0 {
            Status::Failure
        } else {
            Status::Success
        };
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Pushes a build record; failures are logged only.
pub async fn send_build(client: Option<&dyn ApiClient>, repo: &Repo, build: &Build) {
    let Some(client) = client else {
        return;
    };
    debug!(build = build.number, status = %build.status, "Reporting build");
    if let Err(e) = client.update_build(repo, build).await {
        error!(build = build.number, error = %e, "Unable to report build");
    }
}

/// Pushes a step record; failures are logged only.
pub async fn send_step(client: Option<&dyn ApiClient>, repo: &Repo, build: &Build, step: &Step) {
    let Some(client) = client else {
        return;
    };
    debug!(step = %step.name, status = %step.status, "Reporting step");
    if let Err(e) = client.update_step(repo, build, step).await {
        error!(step = %step.name, error = %e, "Unable to report step");
    }
}

/// Pushes a service record; failures are logged only.
pub async fn send_service(
    client: Option<&dyn ApiClient>,
    repo: &Repo,
    build: &Build,
    service: &Service,
) {
    let Some(client) = client else {
        return;
    };
    debug!(service = %service.name, status = %service.status, "Reporting service");
    if let Err(e) = client.update_service(repo, build, service).await {
        error!(service = %service.name, error = %e, "Unable to report service");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_canceled_build_keeps_status() {
        let mut build = Build {
            status: Status::Canceled,
            ..Default::default()
        };
        finalize_build(&mut build, Some("context done"));
        assert_eq!(build.status, Status::Canceled);
        assert_eq!(build.error, "context done");
    }

    #[test]
    fn test_finalize_build_status_resolution() {
        let mut pending = Build::default();
        finalize_build(&mut pending, None);
        assert_eq!(pending.status, Status::Killed);

        let mut running = Build {
            status: Status::Running,
            ..Default::default()
        };
        finalize_build(&mut running, None);
        assert_eq!(running.status, Status::Success);
        assert!(running.finished > 0);

        let mut failed = Build {
            status: Status::Failure,
            ..Default::default()
        };
        finalize_build(&mut failed, None);
        assert_eq!(failed.status, Status::Failure);

        let mut errored = Build {
            status: Status::Running,
            ..Default::default()
        };
        finalize_build(&mut errored, Some("boom"));
        assert_eq!(errored.status, Status::Error);
        assert_eq!(errored.error, "boom");
    }

    #[test]
    fn test_snapshot_step_failure_fails_build() {
        let mut build = Build {
            status: Status::Running,
            ..Default::default()
        };
        let mut step = Step {
            status: Status::Running,
            ..Default::default()
        };
        let ctn = Container {
            name: "test".to_string(),
            exit_code: 1,
            ..Default::default()
        };

        snapshot_step(&mut build, &mut step, &ctn, None);
        assert_eq!(step.status, Status::Failure);
        assert_eq!(build.status, Status::Failure);
    }

    #[test]
    fn test_snapshot_step_continue_keeps_build_running() {
        let mut build = Build {
            status: Status::Running,
            ..Default::default()
        };
        let mut step = Step {
            status: Status::Running,
            ..Default::default()
        };
        let mut ctn = Container {
            name: "lint".to_string(),
            exit_code: 2,
            ..Default::default()
        };
        ctn.ruleset.continue_on_failure = true;

        snapshot_step(&mut build, &mut step, &ctn, None);
        assert_eq!(step.status, Status::Failure);
        assert_eq!(build.status, Status::Running);
    }

    #[test]
    fn test_finalize_step_running_becomes_success() {
        let build = Build {
            status: Status::Running,
            ..Default::default()
        };
        let mut step = Step {
            status: Status::Running,
            ..Default::default()
        };
        finalize_step(&build, &mut step, &Container::default());
        assert_eq!(step.status, Status::Success);
        assert!(step.finished > 0);
    }
}
