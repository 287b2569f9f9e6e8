//! Cancel-on-first-error task group.
//!
//! Every task spawned into a [`TaskGroup`] shares one child token. The first
//! task to fail records its error and cancels that token so siblings can
//! stop early; [`TaskGroup::wait`] joins every task and returns the first
//! error.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;

pub struct TaskGroup {
    token: CancelToken,
    tasks: JoinSet<()>,
    first_error: Arc<Mutex<Option<Error>>>,
}

impl TaskGroup {
    /// Creates a group whose token is a child of `parent`.
    pub fn new(parent: &CancelToken) -> Self {
        Self {
            token: parent.child_token(),
            tasks: JoinSet::new(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Token shared by the group's tasks.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Spawns a task into the group.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let first_error = Arc::clone(&self.first_error);
        self.tasks.spawn(async move {
            if let Err(err) = task.await {
                record_first(&first_error, err);
                token.cancel();
            }
        });
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every task and returns the first error, if any.
    pub async fn wait(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                record_first(&self.first_error, Error::Internal(format!("task failed: {err}")));
                self.token.cancel();
            }
        }
        self.token.cancel();

        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record_first(slot: &Mutex<Option<Error>>, err: Error) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(err);
    }
}
