//! Executor tunables.
//!
//! [`Settings`] holds everything about an executor that is not tied to a
//! specific build. Workers typically deserialize it once from their own
//! configuration and reuse it for every build they are assigned.

use crate::constants::{
    DEFAULT_LOG_STREAMING_TIMEOUT, DEFAULT_MAX_LOG_SIZE, DEFAULT_OUTPUTS_TIMEOUT,
    DEFAULT_STREAM_BUFFER,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum bytes of log output kept per container (0 = unlimited).
    pub max_log_size: usize,
    /// Grace period for log streams once the build is done.
    pub log_streaming_timeout: Duration,
    /// Refuse privileged containers for untrusted repos.
    pub enforce_trusted_repos: bool,
    /// Image of the outputs sidecar; empty disables outputs.
    pub outputs_image: String,
    /// Watchdog sleep of the outputs sidecar.
    pub outputs_timeout: Duration,
    /// Capacity of the stream request channel (minimum 1).
    pub stream_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            log_streaming_timeout: DEFAULT_LOG_STREAMING_TIMEOUT,
            enforce_trusted_repos: false,
            outputs_image: String::new(),
            outputs_timeout: DEFAULT_OUTPUTS_TIMEOUT,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"outputs_image": "alpine:latest", "max_log_size": 1024}"#)
                .unwrap();
        assert_eq!(settings.outputs_image, "alpine:latest");
        assert_eq!(settings.max_log_size, 1024);
        assert_eq!(settings.stream_buffer, DEFAULT_STREAM_BUFFER);
        assert_eq!(settings.outputs_timeout, DEFAULT_OUTPUTS_TIMEOUT);
    }
}
