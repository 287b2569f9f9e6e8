//! # Executor Constants
//!
//! Well-known names, paths, environment keys and limits shared by the
//! build, stage, step, service and outputs lifecycles. These constants are
//! the single source of truth for values that also appear inside containers
//! (the outputs paths) or on the control server (exit codes, statuses).
//!
//! ## Cross-References
//!
//! - [`crate::executor`]: Uses the init names, outputs paths and watchdog
//! - [`crate::environment`]: Uses the `VELA_*` environment keys
//! - [`crate::record`]: Uses the killed exit code when finalizing records

use std::time::Duration;

// =============================================================================
// Executor Identity
// =============================================================================

/// Driver name reported by this executor.
pub const EXECUTOR_DRIVER: &str = "linux";

/// Hostname used when none is configured.
pub const DEFAULT_HOSTNAME: &str = "localhost";

// =============================================================================
// Init Unit
// =============================================================================
//
// The compiler injects a synthetic init step (and, for staged pipelines, an
// init stage) that carries no container of its own. The executor uses it as
// the reporting target for Plan/Assemble progress.
// =============================================================================

/// Name of the synthetic init step and init stage.
pub const INIT_NAME: &str = "init";

/// Image of the synthetic init step.
pub const INIT_IMAGE: &str = "#init";

// =============================================================================
// Outputs Container
// =============================================================================

/// Directory created inside the outputs container.
pub const OUTPUTS_DIR: &str = "/vela/outputs";

/// File steps write plain outputs to.
pub const OUTPUTS_ENV_PATH: &str = "/vela/outputs/.env";

/// File steps write masked outputs to.
pub const OUTPUTS_MASKED_ENV_PATH: &str = "/vela/outputs/masked.env";

/// Watchdog sleep for the outputs container (30 minutes).
///
/// **Rationale**: the outputs container sleeps for this long so a hung build
/// cannot keep it alive forever. It is not derived from the build timeout.
pub const DEFAULT_OUTPUTS_TIMEOUT: Duration = Duration::from_secs(60 * 30);

/// Environment variable carrying the base64-encoded outputs script.
pub const OUTPUTS_SCRIPT_ENV: &str = "VELA_BUILD_SCRIPT";

// =============================================================================
// Environment Keys
// =============================================================================

/// Stage name tag written into every staged step's environment.
pub const ENV_STEP_STAGE: &str = "VELA_STEP_STAGE";

/// Step identity keys (used to rebuild records during Destroy).
pub const ENV_STEP_NAME: &str = "VELA_STEP_NAME";
pub const ENV_STEP_NUMBER: &str = "VELA_STEP_NUMBER";
pub const ENV_STEP_IMAGE: &str = "VELA_STEP_IMAGE";
pub const ENV_STEP_STATUS: &str = "VELA_STEP_STATUS";

/// Service identity keys (used to rebuild records during Destroy).
pub const ENV_SERVICE_NAME: &str = "VELA_SERVICE_NAME";
pub const ENV_SERVICE_NUMBER: &str = "VELA_SERVICE_NUMBER";
pub const ENV_SERVICE_IMAGE: &str = "VELA_SERVICE_IMAGE";
pub const ENV_SERVICE_STATUS: &str = "VELA_SERVICE_STATUS";

/// Build and repo context keys.
pub const ENV_BUILD_NUMBER: &str = "VELA_BUILD_NUMBER";
pub const ENV_BUILD_BRANCH: &str = "VELA_BUILD_BRANCH";
pub const ENV_BUILD_EVENT: &str = "VELA_BUILD_EVENT";
pub const ENV_REPO_FULL_NAME: &str = "VELA_REPO_FULL_NAME";
pub const ENV_VERSION: &str = "VELA_VERSION";
pub const ENV_HOST: &str = "VELA_HOST";
pub const ENV_RUNTIME: &str = "VELA_RUNTIME";
pub const ENV_DISTRIBUTION: &str = "VELA_DISTRIBUTION";

// =============================================================================
// Streaming
// =============================================================================

/// Default capacity of the stream request channel.
///
/// A capacity of one is the closest tokio offers to an unbuffered channel:
/// an emitting unit waits until the multiplexer drains the previous request.
pub const DEFAULT_STREAM_BUFFER: usize = 1;

/// Default grace period for log streams after the build finishes.
pub const DEFAULT_LOG_STREAMING_TIMEOUT: Duration = Duration::from_secs(300);

/// Default maximum bytes of log output per container (0 = unlimited).
pub const DEFAULT_MAX_LOG_SIZE: usize = 0;

/// Replacement written in place of masked secret values.
pub const SECRET_MASK: &str = "***";

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit code recorded for units that never left `pending` (SIGKILL).
pub const EXIT_CODE_KILLED: i32 = 137;

// =============================================================================
// Artifacts
// =============================================================================

/// Directory name for the default artifact store under the data dir.
pub const ARTIFACT_STORE_DIR: &str = "vela-artifacts";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_paths_live_under_outputs_dir() {
        assert!(OUTPUTS_ENV_PATH.starts_with(OUTPUTS_DIR));
        assert!(OUTPUTS_MASKED_ENV_PATH.starts_with(OUTPUTS_DIR));
    }

    #[test]
    fn test_outputs_watchdog_is_thirty_minutes() {
        assert_eq!(DEFAULT_OUTPUTS_TIMEOUT.as_secs(), 1800);
    }
}
