//! Stage completion signals.
//!
//! Each stage owns one [`StageSignal`] in the build's [`StageMap`]. The stage
//! completes it exactly once when its Exec phase returns; stages that `need`
//! it wait on it before executing. The first completion wins; later calls are
//! ignored, so a signal can never be "closed twice".

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Outcome carried by a completed signal: `None` on success.
type Outcome = Option<String>;

/// Error recorded when a stage ends without completing its signal.
const STAGE_ABORTED: &str = "stage aborted";

/// Set-once, multi-waiter completion carrying an optional error.
#[derive(Debug, Clone)]
pub struct StageSignal {
    tx: Arc<watch::Sender<Option<Outcome>>>,
}

impl StageSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Completes the signal. Returns false if it was already complete.
    pub fn complete(&self, error: Option<String>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(error);
            true
        })
    }

    /// Returns a guard that completes the signal when dropped.
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard {
            signal: self.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Waits for completion or for `token` to be canceled.
    ///
    /// Returns the upstream error message, or [`Error::Cancelled`].
    pub async fn wait(&self, token: &CancelToken) -> Result<Outcome> {
        let mut rx = self.tx.subscribe();
        let completed = async {
            loop {
                if let Some(outcome) = rx.borrow_and_update().clone() {
                    return outcome;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        tokio::select! {
            outcome = completed => Ok(outcome),
            () = token.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl Default for StageSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes a [`StageSignal`] on every exit path.
///
/// Dropping the guard without calling [`CompletionGuard::complete`] (early
/// return, panic, aborted task) completes the signal with a
/// "stage aborted" error.
#[derive(Debug)]
pub struct CompletionGuard {
    signal: StageSignal,
}

impl CompletionGuard {
    pub fn complete(self, error: Option<String>) {
        self.signal.complete(error);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.signal.complete(Some(STAGE_ABORTED.to_string()));
    }
}

/// Concurrency-safe map of stage name to completion signal.
#[derive(Debug, Clone, Default)]
pub struct StageMap {
    inner: Arc<RwLock<HashMap<String, StageSignal>>>,
}

impl StageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a signal for `stage`, returning the existing one if present.
    pub fn register(&self, stage: &str) -> StageSignal {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage.to_string())
            .or_default()
            .clone()
    }

    pub fn get(&self, stage: &str) -> Option<StageSignal> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stage)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiters_see_completion() {
        let signal = StageSignal::new();
        let token = CancelToken::new();

        let waiter = {
            let signal = signal.clone();
            let token = token.clone();
            tokio::spawn(async move { signal.wait(&token).await })
        };

        assert!(signal.complete(None));
        let outcome = waiter.await.expect("waiter should not panic");
        assert!(matches!(outcome, Ok(None)));
    }

    #[tokio::test]
    async fn test_first_completion_wins() {
        let signal = StageSignal::new();
        assert!(signal.complete(Some("first".to_string())));
        assert!(!signal.complete(None));

        let outcome = signal.wait(&CancelToken::new()).await.unwrap();
        assert_eq!(outcome.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_wait() {
        let signal = StageSignal::new();
        let token = CancelToken::new();
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), signal.wait(&token))
            .await
            .expect("wait should return");
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_guard_completes_on_panic() {
        let signal = StageSignal::new();

        let task = {
            let guard = signal.guard();
            tokio::spawn(async move {
                let _guard = guard;
                panic!("runtime backend blew up");
            })
        };
        assert!(task.await.is_err());

        let outcome = signal.wait(&CancelToken::new()).await.unwrap();
        assert_eq!(outcome.as_deref(), Some(STAGE_ABORTED));
    }

    #[tokio::test]
    async fn test_guard_keeps_explicit_outcome() {
        let signal = StageSignal::new();
        signal.guard().complete(None);

        let outcome = signal.wait(&CancelToken::new()).await.unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let map = StageMap::new();
        let a = map.register("build");
        let b = map.register("build");
        a.complete(None);
        assert!(b.is_complete());
        assert!(map.get("missing").is_none());
    }
}
