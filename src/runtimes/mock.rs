//! In-memory runtime.
//!
//! `MockRuntime` performs no container work. It records every call, serves
//! canned logs, files and exit codes, and fails any operation it was told
//! to fail. It backs local dry runs and the executor's test suite.
//!
//! # Failure Injection
//!
//! ```rust,ignore
//! let runtime = MockRuntime::new();
//! runtime.fail("run_container", "step_github_octocat_1_test");
//! runtime.fail("remove_network", "*");
//! ```

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::pipeline::{Container, Pipeline};
use crate::runtime::{LogStream, Runtime};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    /// Pipeline ID for build resources, container ID otherwise.
    pub target: String,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    failures: HashSet<(String, String)>,
    logs: HashMap<String, Vec<u8>>,
    files: HashMap<(String, String), Vec<u8>>,
    exit_codes: HashMap<String, i32>,
    wait_delays: HashMap<String, Duration>,
}

/// Runtime that records calls instead of running containers.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `operation` fail for `target` (`"*"` matches every target).
    pub fn fail(&self, operation: &str, target: &str) {
        self.state()
            .failures
            .insert((operation.to_string(), target.to_string()));
    }

    /// Sets the log output served for a container.
    pub fn set_logs(&self, container: &str, logs: impl Into<Vec<u8>>) {
        self.state().logs.insert(container.to_string(), logs.into());
    }

    /// Places a file inside a container.
    pub fn set_file(&self, container: &str, path: &str, content: impl Into<Vec<u8>>) {
        self.state()
            .files
            .insert((container.to_string(), path.to_string()), content.into());
    }

    /// Sets the exit code reported when the container is inspected.
    pub fn set_exit_code(&self, container: &str, code: i32) {
        self.state().exit_codes.insert(container.to_string(), code);
    }

    /// Delays `wait_container` for a container.
    pub fn set_wait_delay(&self, container: &str, delay: Duration) {
        self.state().wait_delays.insert(container.to_string(), delay);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Targets of every call to `operation`, in order.
    pub fn targets(&self, operation: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Number of calls to `operation` for `target`.
    pub fn count(&self, operation: &str, target: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.target == target)
            .count()
    }

    /// Records a call, then fails it if a failure was injected.
    fn record(&self, operation: &'static str, target: &str) -> Result<()> {
        trace!(operation, target, "Mock runtime call");
        let mut state = self.state();
        state.calls.push(Call {
            operation,
            target: target.to_string(),
        });

        let injected = state.failures.contains(&(operation.to_string(), target.to_string()))
            || state.failures.contains(&(operation.to_string(), "*".to_string()));
        if injected {
            return Err(Error::runtime(operation, target, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    fn driver(&self) -> &str {
        "mock"
    }

    async fn setup_build(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("setup_build", &pipeline.id)
    }

    async fn assemble_build(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("assemble_build", &pipeline.id)
    }

    async fn stream_build(&self, _token: &CancelToken, pipeline: &Pipeline) -> Result<()> {
        self.record("stream_build", &pipeline.id)
    }

    async fn remove_build(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("remove_build", &pipeline.id)
    }

    async fn create_network(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("create_network", &pipeline.id)
    }

    async fn inspect_network(&self, pipeline: &Pipeline) -> Result<Vec<u8>> {
        self.record("inspect_network", &pipeline.id)?;
        Ok(format!("network {}: driver=bridge\n", pipeline.id).into_bytes())
    }

    async fn remove_network(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("remove_network", &pipeline.id)
    }

    async fn create_volume(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("create_volume", &pipeline.id)
    }

    async fn inspect_volume(&self, pipeline: &Pipeline) -> Result<Vec<u8>> {
        self.record("inspect_volume", &pipeline.id)?;
        Ok(format!("volume {}: driver=local\n", pipeline.id).into_bytes())
    }

    async fn remove_volume(&self, pipeline: &Pipeline) -> Result<()> {
        self.record("remove_volume", &pipeline.id)
    }

    async fn setup_container(&self, ctn: &Container) -> Result<()> {
        self.record("setup_container", &ctn.id)
    }

    async fn inspect_image(&self, ctn: &Container) -> Result<Vec<u8>> {
        self.record("inspect_image", &ctn.id)?;
        Ok(format!("image {}: present\n", ctn.image).into_bytes())
    }

    async fn run_container(&self, ctn: &Container, _pipeline: &Pipeline) -> Result<()> {
        self.record("run_container", &ctn.id)
    }

    async fn wait_container(&self, ctn: &Container) -> Result<()> {
        self.record("wait_container", &ctn.id)?;
        let delay = self.state().wait_delays.get(&ctn.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn inspect_container(&self, ctn: &mut Container) -> Result<()> {
        self.record("inspect_container", &ctn.id)?;
        if let Some(code) = self.state().exit_codes.get(&ctn.id) {
            ctn.exit_code = *code;
        }
        Ok(())
    }

    async fn remove_container(&self, ctn: &Container) -> Result<()> {
        self.record("remove_container", &ctn.id)
    }

    async fn tail_container(&self, ctn: &Container) -> Result<LogStream> {
        self.record("tail_container", &ctn.id)?;
        let logs = self
            .state()
            .logs
            .get(&ctn.id)
            .cloned()
            .unwrap_or_else(|| format!("{} output\n", ctn.name).into_bytes());
        Ok(Box::new(Cursor::new(logs)))
    }

    async fn poll_outputs_container(&self, ctn: &Container, path: &str) -> Result<Vec<u8>> {
        self.record("poll_outputs_container", &ctn.id)?;
        Ok(self
            .state()
            .files
            .get(&(ctn.id.clone(), path.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn poll_file_names(&self, ctn: &Container) -> Result<Vec<String>> {
        self.record("poll_file_names", &ctn.id)?;
        let mut names: Vec<String> = self
            .state()
            .files
            .keys()
            .filter(|(id, path)| {
                *id == ctn.id && ctn.artifacts.iter().any(|a| path.starts_with(a.as_str()))
            })
            .map(|(_, path)| path.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn poll_file_content(&self, ctn: &Container, path: &str) -> Result<Vec<u8>> {
        self.record("poll_file_content", &ctn.id)?;
        self.state()
            .files
            .get(&(ctn.id.clone(), path.to_string()))
            .cloned()
            .ok_or_else(|| Error::runtime("poll_file_content", &ctn.id, format!("no such file {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failure() {
        let runtime = MockRuntime::new();
        let ctn = Container {
            id: "step_1_test".to_string(),
            name: "test".to_string(),
            image: "alpine".to_string(),
            ..Default::default()
        };
        runtime.fail("run_container", "step_1_test");

        assert!(runtime.setup_container(&ctn).await.is_ok());
        assert!(runtime.run_container(&ctn, &Pipeline::default()).await.is_err());
        assert_eq!(runtime.count("run_container", "step_1_test"), 1);
    }

    #[tokio::test]
    async fn test_wildcard_failure() {
        let runtime = MockRuntime::new();
        runtime.fail("remove_network", "*");
        let pipeline = Pipeline {
            id: "p1".to_string(),
            ..Default::default()
        };
        assert!(runtime.remove_network(&pipeline).await.is_err());
        assert!(runtime.remove_volume(&pipeline).await.is_ok());
    }

    #[tokio::test]
    async fn test_exit_code_applied_on_inspect() {
        let runtime = MockRuntime::new();
        runtime.set_exit_code("step_1_test", 3);
        let mut ctn = Container {
            id: "step_1_test".to_string(),
            ..Default::default()
        };
        runtime.inspect_container(&mut ctn).await.unwrap();
        assert_eq!(ctn.exit_code, 3);
    }
}
