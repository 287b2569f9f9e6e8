//! Per-build resource tracker.
//!
//! Maps a container ID to the record created for it during Plan so Exec,
//! Stream and Destroy can recover it. Entries are never removed; the tracker
//! lives and dies with its build.

use crate::error::{Error, Result};
use crate::record::{Service, Step};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Shared handle to a step record. Only the owning unit mutates it.
pub type StepHandle = Arc<Mutex<Step>>;

/// Shared handle to a service record. Only the owning unit mutates it.
pub type ServiceHandle = Arc<Mutex<Service>>;

/// In-flight record for a tracked container.
#[derive(Debug, Clone)]
pub enum Tracked {
    Step(StepHandle),
    Service(ServiceHandle),
}

#[derive(Debug, Default)]
pub struct Tracker {
    entries: RwLock<HashMap<String, Tracked>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a step record under `id`, replacing any previous entry.
    pub fn insert_step(&self, id: &str, step: Step) -> Result<StepHandle> {
        let handle = Arc::new(Mutex::new(step));
        self.entries
            .write()
            .map_err(|_| Error::Internal("tracker lock poisoned".to_string()))?
            .insert(id.to_string(), Tracked::Step(Arc::clone(&handle)));
        Ok(handle)
    }

    /// Tracks a service record under `id`, replacing any previous entry.
    pub fn insert_service(&self, id: &str, service: Service) -> Result<ServiceHandle> {
        let handle = Arc::new(Mutex::new(service));
        self.entries
            .write()
            .map_err(|_| Error::Internal("tracker lock poisoned".to_string()))?
            .insert(id.to_string(), Tracked::Service(Arc::clone(&handle)));
        Ok(handle)
    }

    /// Loads the step record tracked under `id`.
    pub fn step(&self, id: &str) -> Result<StepHandle> {
        match self.get(id) {
            Some(Tracked::Step(handle)) => Ok(handle),
            _ => Err(Error::NotPlanned {
                kind: "step",
                id: id.to_string(),
            }),
        }
    }

    /// Loads the service record tracked under `id`.
    pub fn service(&self, id: &str) -> Result<ServiceHandle> {
        match self.get(id) {
            Some(Tracked::Service(handle)) => Ok(handle),
            _ => Err(Error::NotPlanned {
                kind: "service",
                id: id.to_string(),
            }),
        }
    }

    pub fn get(&self, id: &str) -> Option<Tracked> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of every tracked entry.
    pub fn entries(&self) -> Vec<Tracked> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_round_trip() {
        let tracker = Tracker::new();
        let step = Step {
            name: "clone".to_string(),
            ..Default::default()
        };
        tracker.insert_step("step_1_clone", step).unwrap();

        let handle = tracker.step("step_1_clone").unwrap();
        assert_eq!(handle.lock().unwrap().name, "clone");
    }

    #[test]
    fn test_missing_or_mistyped_entry_is_not_planned() {
        let tracker = Tracker::new();
        tracker
            .insert_service("service_1_postgres", Service::default())
            .unwrap();

        assert!(matches!(tracker.step("nope"), Err(Error::NotPlanned { .. })));
        assert!(matches!(
            tracker.step("service_1_postgres"),
            Err(Error::NotPlanned { kind: "step", .. })
        ));
        assert!(tracker.service("service_1_postgres").is_ok());
    }

    #[test]
    fn test_concurrent_inserts() {
        let tracker = Arc::new(Tracker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    tracker
                        .insert_step(&format!("step_{i}"), Step::default())
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.len(), 8);
    }
}
