//! Control server reporting client.
//!
//! The executor only ever pushes records; it never reads them back. A
//! missing client (`None`) means "don't report", which is how local runs
//! and most tests operate.

use crate::error::{Error, Result};
use crate::record::{Build, Repo, Service, Step};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Sink for build, step and service state.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn update_build(&self, repo: &Repo, build: &Build) -> Result<()>;

    async fn update_step(&self, repo: &Repo, build: &Build, step: &Step) -> Result<()>;

    async fn update_service(&self, repo: &Repo, build: &Build, service: &Service) -> Result<()>;
}

/// Client that keeps every update in memory.
///
/// It can be switched into an unreachable mode in which every update is
/// dropped and rejected with [`Error::Api`].
#[derive(Debug, Default)]
pub struct RecordingClient {
    unreachable: AtomicBool,
    builds: Mutex<Vec<Build>>,
    steps: Mutex<Vec<Step>>,
    services: Mutex<Vec<Service>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects (or accepts again) every subsequent update.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Api("server unreachable".to_string()));
        }
        Ok(())
    }

    /// Every build update, oldest first.
    pub fn builds(&self) -> Vec<Build> {
        self.builds.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every step update, oldest first.
    pub fn steps(&self) -> Vec<Step> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every service update, oldest first.
    pub fn services(&self) -> Vec<Service> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent update for the named step.
    pub fn last_step(&self, name: &str) -> Option<Step> {
        self.steps().into_iter().rev().find(|s| s.name == name)
    }

    /// Most recent update for the named service.
    pub fn last_service(&self, name: &str) -> Option<Service> {
        self.services().into_iter().rev().find(|s| s.name == name)
    }
}

#[async_trait]
impl ApiClient for RecordingClient {
    async fn update_build(&self, _repo: &Repo, build: &Build) -> Result<()> {
        self.check_reachable()?;
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(build.clone());
        Ok(())
    }

    async fn update_step(&self, _repo: &Repo, _build: &Build, step: &Step) -> Result<()> {
        self.check_reachable()?;
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(step.clone());
        Ok(())
    }

    async fn update_service(&self, _repo: &Repo, _build: &Build, service: &Service) -> Result<()> {
        self.check_reachable()?;
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(service.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_client_rejects_updates() {
        let client = RecordingClient::new();
        client.set_unreachable(true);

        let err = client
            .update_build(&Repo::default(), &Build::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api(_)), "got: {err}");
        assert!(client.builds().is_empty());

        client.set_unreachable(false);
        client
            .update_build(&Repo::default(), &Build::default())
            .await
            .unwrap();
        assert_eq!(client.builds().len(), 1);
    }
}
