//! Runtime backends.
//!
//! Each backend implements [`crate::runtime::Runtime`]. Daemon-backed
//! runtimes live outside this crate; the in-memory backend ships here for
//! dry runs and tests.

pub mod mock;

pub use self::mock::{Call, MockRuntime};
