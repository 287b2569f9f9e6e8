//! Tests for constants module.
//!
//! Validates well-known paths, environment keys and defaults that other
//! components (runtimes, the outputs sidecar, the control server) rely on.

use std::time::Duration;
use vela_executor::*;

// =============================================================================
// Outputs Sidecar Tests
// =============================================================================

#[test]
fn test_outputs_files_live_in_outputs_dir() {
    assert_eq!(OUTPUTS_ENV_PATH, "/vela/outputs/.env");
    assert_eq!(OUTPUTS_MASKED_ENV_PATH, "/vela/outputs/masked.env");
    assert!(OUTPUTS_ENV_PATH.starts_with(OUTPUTS_DIR));
}

#[test]
fn test_outputs_watchdog_is_bounded() {
    assert_eq!(DEFAULT_OUTPUTS_TIMEOUT, Duration::from_secs(30 * 60));
}

// =============================================================================
// Environment Key Tests
// =============================================================================

#[test]
fn test_environment_keys_are_namespaced() {
    for key in [
        ENV_STEP_STAGE,
        ENV_STEP_NAME,
        ENV_STEP_STATUS,
        ENV_SERVICE_NAME,
        ENV_SERVICE_STATUS,
        ENV_BUILD_NUMBER,
        ENV_REPO_FULL_NAME,
        OUTPUTS_SCRIPT_ENV,
    ] {
        assert!(key.starts_with("VELA_"), "{key} should be namespaced");
    }
}

// =============================================================================
// Default Tests
// =============================================================================

#[test]
fn test_defaults() {
    assert_eq!(EXECUTOR_DRIVER, "linux");
    assert_eq!(DEFAULT_HOSTNAME, "localhost");
    assert_eq!(INIT_NAME, "init");
    assert_eq!(EXIT_CODE_KILLED, 137);
    assert_eq!(SECRET_MASK, "***");
    assert!(DEFAULT_STREAM_BUFFER >= 1, "stream channel needs capacity");
}

#[test]
fn test_default_settings_use_constants() {
    let settings = Settings::default();
    assert_eq!(settings.max_log_size, DEFAULT_MAX_LOG_SIZE);
    assert_eq!(settings.log_streaming_timeout, DEFAULT_LOG_STREAMING_TIMEOUT);
    assert_eq!(settings.outputs_timeout, DEFAULT_OUTPUTS_TIMEOUT);
    assert!(settings.outputs_image.is_empty());
    assert!(!settings.enforce_trusted_repos);
}
