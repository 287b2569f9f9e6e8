//! Build and repo context injected into container environments.

use crate::constants::{
    ENV_BUILD_BRANCH, ENV_BUILD_EVENT, ENV_BUILD_NUMBER, ENV_DISTRIBUTION, ENV_HOST,
    ENV_REPO_FULL_NAME, ENV_RUNTIME, ENV_SERVICE_IMAGE, ENV_SERVICE_NAME, ENV_SERVICE_NUMBER,
    ENV_SERVICE_STATUS, ENV_STEP_IMAGE, ENV_STEP_NAME, ENV_STEP_NUMBER, ENV_STEP_STATUS,
    ENV_VERSION,
};
use crate::pipeline::Container;
use crate::record::{Build, Repo, Status};

fn inject_context(ctn: &mut Container, build: &Build, repo: &Repo, version: &str) {
    let env = &mut ctn.environment;
    env.insert(ENV_BUILD_NUMBER.to_string(), build.number.to_string());
    env.insert(ENV_BUILD_BRANCH.to_string(), build.branch.clone());
    env.insert(ENV_BUILD_EVENT.to_string(), build.event.clone());
    env.insert(ENV_REPO_FULL_NAME.to_string(), repo.full_name());
    env.insert(ENV_VERSION.to_string(), version.to_string());
    env.insert(ENV_HOST.to_string(), build.host.clone());
    env.insert(ENV_RUNTIME.to_string(), build.runtime.clone());
    env.insert(ENV_DISTRIBUTION.to_string(), build.distribution.clone());
}

/// Injects build/repo context and step identity into a step container.
pub fn step_environment(ctn: &mut Container, build: &Build, repo: &Repo, version: &str) {
    inject_context(ctn, build, repo, version);

    let (name, number, image) = (ctn.name.clone(), ctn.number, ctn.image.clone());
    let env = &mut ctn.environment;
    env.insert(ENV_STEP_NAME.to_string(), name);
    env.insert(ENV_STEP_NUMBER.to_string(), number.to_string());
    env.insert(ENV_STEP_IMAGE.to_string(), image);
    env.entry(ENV_STEP_STATUS.to_string())
        .or_insert_with(|| Status::Pending.to_string());
}

/// Injects build/repo context and service identity into a service container.
pub fn service_environment(ctn: &mut Container, build: &Build, repo: &Repo, version: &str) {
    inject_context(ctn, build, repo, version);

    let (name, number, image) = (ctn.name.clone(), ctn.number, ctn.image.clone());
    let env = &mut ctn.environment;
    env.insert(ENV_SERVICE_NAME.to_string(), name);
    env.insert(ENV_SERVICE_NUMBER.to_string(), number.to_string());
    env.insert(ENV_SERVICE_IMAGE.to_string(), image);
    env.entry(ENV_SERVICE_STATUS.to_string())
        .or_insert_with(|| Status::Pending.to_string());
}

/// Records a unit status in its environment so Destroy can recover it.
pub fn set_step_status(ctn: &mut Container, status: Status) {
    ctn.environment
        .insert(ENV_STEP_STATUS.to_string(), status.to_string());
}
