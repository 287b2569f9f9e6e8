//! Records reported to the control server.
//!
//! - `Status`: unit/build lifecycle status
//! - `Repo`: repository the build belongs to
//! - `Build`: the build being executed
//! - `Step` / `Service`: per-container records created at Plan time
//!
//! Timestamps are unix seconds, zero when unset.

use crate::constants::{
    ENV_SERVICE_IMAGE, ENV_SERVICE_NAME, ENV_SERVICE_NUMBER, ENV_SERVICE_STATUS, ENV_STEP_IMAGE,
    ENV_STEP_NAME, ENV_STEP_NUMBER, ENV_STEP_STAGE, ENV_STEP_STATUS,
};
use crate::pipeline::Container;
use serde::{Deserialize, Serialize};

/// Current time as unix seconds.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a build, step or service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
    Error,
    Killed,
    Canceled,
    Skipped,
}

impl Status {
    /// Returns true once the status can no longer change on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Error | Self::Killed | Self::Canceled | Self::Skipped
        )
    }

    /// Parses a lowercase status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "error" => Some(Self::Error),
            "killed" => Some(Self::Killed),
            "canceled" => Some(Self::Canceled),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Killed => "killed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Repo
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub org: String,
    pub name: String,
    /// Allowed to run privileged containers.
    #[serde(default)]
    pub trusted: bool,
}

impl Repo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }
}

// =============================================================================
// Build
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub repo_id: i64,
    pub number: i32,
    pub status: Status,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub distribution: String,
}

// =============================================================================
// Step
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub build_id: i64,
    pub repo_id: i64,
    pub number: i32,
    pub name: String,
    #[serde(default)]
    pub stage: String,
    pub image: String,
    pub status: Status,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub distribution: String,
}

impl Step {
    /// Builds a pending step record from the build and container.
    pub fn from_build_and_container(build: &Build, ctn: &Container) -> Self {
        Self {
            build_id: build.id,
            repo_id: build.repo_id,
            number: ctn.number,
            name: ctn.name.clone(),
            stage: ctn.stage().unwrap_or_default().to_string(),
            image: ctn.image.clone(),
            status: Status::Pending,
            created: now(),
            host: build.host.clone(),
            runtime: build.runtime.clone(),
            distribution: build.distribution.clone(),
            ..Default::default()
        }
    }

    /// Rebuilds a best-effort record from the container's environment.
    pub fn from_container_environment(ctn: &Container) -> Self {
        let env = &ctn.environment;
        Self {
            number: env
                .get(ENV_STEP_NUMBER)
                .and_then(|n| n.parse().ok())
                .unwrap_or(ctn.number),
            name: env.get(ENV_STEP_NAME).cloned().unwrap_or_else(|| ctn.name.clone()),
            stage: env.get(ENV_STEP_STAGE).cloned().unwrap_or_default(),
            image: env.get(ENV_STEP_IMAGE).cloned().unwrap_or_else(|| ctn.image.clone()),
            status: env
                .get(ENV_STEP_STATUS)
                .and_then(|s| Status::parse(s))
                .unwrap_or_default(),
            exit_code: ctn.exit_code,
            host: env.get(crate::constants::ENV_HOST).cloned().unwrap_or_default(),
            runtime: env.get(crate::constants::ENV_RUNTIME).cloned().unwrap_or_default(),
            distribution: env
                .get(crate::constants::ENV_DISTRIBUTION)
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub build_id: i64,
    pub repo_id: i64,
    pub number: i32,
    pub name: String,
    pub image: String,
    pub status: Status,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub distribution: String,
}

impl Service {
    /// Builds a pending service record from the build and container.
    pub fn from_build_and_container(build: &Build, ctn: &Container) -> Self {
        Self {
            build_id: build.id,
            repo_id: build.repo_id,
            number: ctn.number,
            name: ctn.name.clone(),
            image: ctn.image.clone(),
            status: Status::Pending,
            created: now(),
            host: build.host.clone(),
            runtime: build.runtime.clone(),
            distribution: build.distribution.clone(),
            ..Default::default()
        }
    }

    /// Rebuilds a best-effort record from the container's environment.
    pub fn from_container_environment(ctn: &Container) -> Self {
        let env = &ctn.environment;
        Self {
            number: env
                .get(ENV_SERVICE_NUMBER)
                .and_then(|n| n.parse().ok())
                .unwrap_or(ctn.number),
            name: env.get(ENV_SERVICE_NAME).cloned().unwrap_or_else(|| ctn.name.clone()),
            image: env.get(ENV_SERVICE_IMAGE).cloned().unwrap_or_else(|| ctn.image.clone()),
            status: env
                .get(ENV_SERVICE_STATUS)
                .and_then(|s| Status::parse(s))
                .unwrap_or_default(),
            exit_code: ctn.exit_code,
            host: env.get(crate::constants::ENV_HOST).cloned().unwrap_or_default(),
            runtime: env.get(crate::constants::ENV_RUNTIME).cloned().unwrap_or_default(),
            distribution: env
                .get(crate::constants::ENV_DISTRIBUTION)
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_round_trips_through_parse() {
        for status in [Status::Pending, Status::Running, Status::Canceled, Status::Skipped] {
            assert_eq!(Status::parse(&status.to_string()), Some(status));
        }
        assert_eq!(Status::parse("bogus"), None);
    }

    #[test]
    fn test_step_from_container_environment() {
        let mut ctn = Container {
            id: "step_1_test".to_string(),
            name: "test".to_string(),
            image: "alpine".to_string(),
            ..Default::default()
        };
        ctn.environment.insert(ENV_STEP_NAME.to_string(), "test".to_string());
        ctn.environment.insert(ENV_STEP_NUMBER.to_string(), "3".to_string());
        ctn.environment.insert(ENV_STEP_STATUS.to_string(), "skipped".to_string());

        let step = Step::from_container_environment(&ctn);
        assert_eq!(step.name, "test");
        assert_eq!(step.number, 3);
        assert_eq!(step.status, Status::Skipped);
        assert_eq!(step.image, "alpine");
    }
}
