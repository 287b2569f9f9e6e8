//! Outputs sidecar.
//!
//! Steps write `KEY=VALUE` lines to two files inside the sidecar; before a
//! step runs the executor reads both back and merges them into the step's
//! environment:
//!
//! ```text
//! /vela/outputs/.env         → plain outputs
//! /vela/outputs/masked.env   → outputs redacted from logs
//! ```
//!
//! The sidecar's only process is a watchdog sleep, so a hung build cannot
//! keep it alive forever.

use super::Executor;
use crate::cancel::CancelToken;
use crate::constants::{OUTPUTS_DIR, OUTPUTS_ENV_PATH, OUTPUTS_MASKED_ENV_PATH, OUTPUTS_SCRIPT_ENV};
use crate::error::Result;
use crate::pipeline::{Container, StepSecret};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use tracing::debug;

/// Initial definition of the outputs sidecar for a pipeline.
pub(super) fn outputs_container(pipeline_id: &str, image: &str) -> Container {
    Container {
        id: format!("outputs_{pipeline_id}"),
        name: "outputs".to_string(),
        image: image.to_string(),
        detach: true,
        ..Default::default()
    }
}

fn watchdog_script(timeout_secs: u64) -> String {
    format!("mkdir -p {OUTPUTS_DIR}\nsleep {timeout_secs}\n")
}

impl Executor {
    pub(crate) async fn create_outputs(&self, _token: &CancelToken) -> Result<()> {
        let mut ctn = self.outputs();
        if ctn.image.is_empty() {
            return Ok(());
        }

        let script = watchdog_script(self.settings().outputs_timeout.as_secs());
        let env = &mut ctn.environment;
        env.insert(OUTPUTS_SCRIPT_ENV.to_string(), STANDARD.encode(script));
        env.insert("HOME".to_string(), "/root".to_string());
        env.insert("SHELL".to_string(), "/bin/sh".to_string());
        ctn.entrypoint = vec!["/bin/sh".to_string(), "-c".to_string()];
        ctn.commands = vec![format!("echo ${OUTPUTS_SCRIPT_ENV} | base64 -d | /bin/sh -e")];

        self.runtime().setup_container(&ctn).await?;
        self.store_outputs(ctn);
        Ok(())
    }

    pub(crate) async fn exec_outputs(&self, _token: &CancelToken) -> Result<()> {
        let mut ctn = self.outputs();
        if ctn.image.is_empty() {
            return Ok(());
        }

        let pipeline = self.pipeline();
        self.runtime().run_container(&ctn, &pipeline).await?;
        self.runtime().inspect_container(&mut ctn).await?;
        self.store_outputs(ctn);
        Ok(())
    }

    /// Reads the plain and masked outputs written so far.
    pub(crate) async fn poll_outputs(
        &self,
        _token: &CancelToken,
    ) -> Result<(HashMap<String, String>, HashMap<String, String>)> {
        let ctn = self.outputs();
        if ctn.image.is_empty() {
            return Ok((HashMap::new(), HashMap::new()));
        }

        let plain = self
            .runtime()
            .poll_outputs_container(&ctn, OUTPUTS_ENV_PATH)
            .await?;
        let masked = self
            .runtime()
            .poll_outputs_container(&ctn, OUTPUTS_MASKED_ENV_PATH)
            .await?;

        Ok((parse_env_file(&plain), parse_env_file(&masked)))
    }

    pub(crate) async fn destroy_outputs(&self, _token: &CancelToken) -> Result<()> {
        let mut ctn = self.outputs();
        if ctn.image.is_empty() {
            return Ok(());
        }

        let inspected = self.runtime().inspect_container(&mut ctn).await;
        let removed = self.runtime().remove_container(&ctn).await;
        inspected.and(removed)
    }
}

/// Parses `KEY=VALUE` lines. Blank lines, comments and an `export ` prefix
/// are tolerated; surrounding quotes on values are stripped.
pub fn parse_env_file(bytes: &[u8]) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in String::from_utf8_lossy(bytes).lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            debug!(line, "Ignoring malformed outputs line");
            continue;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            debug!(line, "Ignoring malformed outputs line");
            continue;
        }

        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Drops every output whose key already exists in `env`.
pub fn sanitize_outputs(env: &HashMap<String, String>, outputs: &mut HashMap<String, String>) {
    outputs.retain(|key, _| !env.contains_key(key));
}

/// Merges polled outputs into a step's environment.
///
/// Compiled-in keys always win. An environment value that is exactly
/// `$KEY` is resolved from the outputs; resolving from a masked output
/// makes the referencing key masked too. Every masked key merged is
/// registered as a secret target.
pub fn merge_outputs(
    ctn: &mut Container,
    mut outputs: HashMap<String, String>,
    mut masked: HashMap<String, String>,
) {
    if outputs.is_empty() && masked.is_empty() {
        return;
    }

    sanitize_outputs(&ctn.environment, &mut outputs);
    sanitize_outputs(&ctn.environment, &mut masked);

    let mut mask_targets = Vec::new();
    for (key, value) in ctn.environment.iter_mut() {
        let Some(reference) = value.strip_prefix('$') else {
            continue;
        };
        if let Some(resolved) = outputs.get(reference) {
            *value = resolved.clone();
        } else if let Some(resolved) = masked.get(reference) {
            *value = resolved.clone();
            mask_targets.push(key.clone());
        }
    }

    ctn.environment.extend(outputs);
    for (key, value) in masked {
        mask_targets.push(key.clone());
        ctn.environment.insert(key, value);
    }

    for target in mask_targets {
        if !ctn.secrets.iter().any(|s| s.target == target) {
            ctn.secrets.push(StepSecret {
                source: target.clone(),
                target,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_env_file() {
        let parsed = parse_env_file(b"# comment\nFOO=bar\nexport BAZ=\"qux\"\n\nnot a pair\nA=b=c\n");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["FOO"], "bar");
        assert_eq!(parsed["BAZ"], "qux");
        assert_eq!(parsed["A"], "b=c");
    }

    #[test]
    fn test_outputs_never_clobber_environment() {
        let mut ctn = Container {
            name: "test".to_string(),
            environment: vars(&[("FOO", "bar")]),
            ..Default::default()
        };
        merge_outputs(&mut ctn, vars(&[("FOO", "baz")]), HashMap::new());
        assert_eq!(ctn.environment["FOO"], "bar");
    }

    #[test]
    fn test_reference_resolution() {
        let mut ctn = Container {
            name: "test".to_string(),
            environment: vars(&[("HELLO", "$OUTPUT1")]),
            ..Default::default()
        };
        merge_outputs(&mut ctn, vars(&[("OUTPUT1", "value1")]), HashMap::new());
        assert_eq!(ctn.environment["HELLO"], "value1");
        assert_eq!(ctn.environment["OUTPUT1"], "value1");
        assert!(ctn.secrets.is_empty());
    }

    #[test]
    fn test_masked_output_registers_secret() {
        let mut ctn = Container {
            name: "test".to_string(),
            ..Default::default()
        };
        merge_outputs(
            &mut ctn,
            HashMap::new(),
            vars(&[("MASKED_OUTPUT1", "masked_value1")]),
        );
        assert_eq!(ctn.environment["MASKED_OUTPUT1"], "masked_value1");
        assert_eq!(ctn.secrets.len(), 1);
        assert_eq!(ctn.secrets[0].target, "MASKED_OUTPUT1");
    }

    #[test]
    fn test_watchdog_script() {
        let script = watchdog_script(1800);
        assert!(script.contains("mkdir -p /vela/outputs"));
        assert!(script.contains("sleep 1800"));
    }
}
