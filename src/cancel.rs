//! Hierarchical cancellation.
//!
//! A [`CancelToken`] is cloned into every task working on a build. Canceling
//! a token cancels all of its descendants; a child never cancels its parent.
//!
//! ```text
//! root ──► exec group ──► stage task
//!   │
//!   └────► stream ──────► stream worker (delayed)
//! ```

/// Clone-able cancellation signal with parent propagation.
pub type CancelToken = tokio_util::sync::CancellationToken;
