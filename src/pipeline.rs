//! Compiled pipeline types.
//!
//! A [`Pipeline`] is produced by the compiler and handed to the executor
//! already resolved: steps, stages and services are plain [`Container`]
//! definitions. The executor never reshapes the graph; it only grows a
//! container's environment (outputs, injected context) and records its
//! exit code.

use crate::error::{Error, Result};
use crate::record::Status;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Pipeline
// =============================================================================

/// Immutable description of a build's work graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Identifier used to namespace the build network and volume.
    pub id: String,
    /// Compiler version that produced the pipeline.
    #[serde(default)]
    pub version: String,
    /// Ungrouped steps, run sequentially.
    #[serde(default)]
    pub steps: Vec<Container>,
    /// Stages, run concurrently subject to `needs`.
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Sidecar services, detached for the life of the build.
    #[serde(default)]
    pub services: Vec<Container>,
}

impl Pipeline {
    /// Returns every container in the pipeline (services, stage steps, steps).
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.services
            .iter()
            .chain(self.stages.iter().flat_map(|s| s.steps.iter()))
            .chain(self.steps.iter())
    }

    /// Finds the synthetic init step: a top-level step, else the first step
    /// of the first stage.
    pub fn init_step(&self) -> Option<&Container> {
        self.steps
            .iter()
            .find(|s| s.is_init())
            .or_else(|| self.stages.first().and_then(|stage| stage.steps.first()))
    }
}

/// Named, ordered group of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Sibling stages that must complete before this one executes.
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Container>,
}

impl Stage {
    /// Returns true for the synthetic init stage.
    pub fn is_init(&self) -> bool {
        self.name == crate::constants::INIT_NAME
    }
}

// =============================================================================
// Container
// =============================================================================

/// When the runtime should pull a container's image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    Always,
    #[default]
    NotPresent,
    OnStart,
    Never,
}

/// Secret exposed to a container; `target` is the environment key whose
/// value is redacted from logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSecret {
    #[serde(default)]
    pub source: String,
    pub target: String,
}

/// One runtime unit: a step, a service, or the outputs sidecar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Unique container identifier (resource tracker key).
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub number: i32,
    pub image: String,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub detach: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub pull: PullPolicy,
    #[serde(default)]
    pub ruleset: Ruleset,
    #[serde(default)]
    pub secrets: Vec<StepSecret>,
    /// Paths collected as artifacts once the container exits.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Exit code captured by the runtime on inspect.
    #[serde(default)]
    pub exit_code: i32,
}

impl Container {
    /// Returns true for a zero-value container.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true for the synthetic init step.
    pub fn is_init(&self) -> bool {
        self.name == crate::constants::INIT_NAME
    }

    /// Stage name this container was tagged with, if any.
    pub fn stage(&self) -> Option<&str> {
        self.environment
            .get(crate::constants::ENV_STEP_STAGE)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Replaces `${KEY}` references with environment values.
    ///
    /// Applies to the image, entrypoint, commands and working directory.
    /// `$$` is an escaped `$`; references to unknown keys are kept verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Substitution`] for an unterminated or empty `${`.
    pub fn substitute(&mut self) -> Result<()> {
        let env = &self.environment;
        let name = &self.name;
        let sub = |input: &str| substitute_str(input, env).map_err(|reason| Error::Substitution {
            container: name.clone(),
            reason,
        });

        let image = sub(&self.image)?;
        let directory = sub(&self.directory)?;
        let entrypoint = self.entrypoint.iter().map(|e| sub(e)).collect::<Result<Vec<_>>>()?;
        let commands = self.commands.iter().map(|c| sub(c)).collect::<Result<Vec<_>>>()?;

        self.image = image;
        self.directory = directory;
        self.entrypoint = entrypoint;
        self.commands = commands;
        Ok(())
    }

    /// Evaluates the container's ruleset; true means the container runs.
    pub fn execute(&self, data: &RuleData) -> bool {
        self.ruleset.execute(data)
    }
}

fn substitute_str(input: &str, env: &HashMap<String, String>) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let end = body
                .find('}')
                .ok_or_else(|| format!("unterminated reference in {input:?}"))?;
            let key = &body[..end];
            if key.is_empty() {
                return Err(format!("empty reference in {input:?}"));
            }
            match env.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    out.push_str("${");
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }

    out.push_str(rest);
    Ok(out)
}

// =============================================================================
// Rulesets
// =============================================================================

/// Values a ruleset is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RuleData {
    pub branch: String,
    pub event: String,
    pub repo: String,
    /// Current build status.
    pub status: Status,
}

/// A set of conditions; empty fields always match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub status: Vec<Status>,
    #[serde(default)]
    pub branch: Vec<String>,
    #[serde(default)]
    pub event: Vec<String>,
}

impl Rules {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty() && self.branch.is_empty() && self.event.is_empty()
    }

    /// True when every non-empty field contains the corresponding value.
    pub fn matches(&self, data: &RuleData) -> bool {
        let status = self.status.is_empty() || self.status.contains(&data.status);
        let branch = self.branch.is_empty() || self.branch.iter().any(|b| *b == data.branch);
        let event = self.event.is_empty() || self.event.iter().any(|e| *e == data.event);
        status && branch && event
    }
}

/// Skip conditions for a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    #[serde(default, rename = "if")]
    pub if_rules: Rules,
    #[serde(default, rename = "unless")]
    pub unless_rules: Rules,
    /// A non-zero exit code does not fail the build.
    #[serde(default, rename = "continue")]
    pub continue_on_failure: bool,
}

impl Ruleset {
    /// Returns true when the container should run.
    ///
    /// Without any status rule, a failed build skips the container.
    pub fn execute(&self, data: &RuleData) -> bool {
        let wants_status = !self.if_rules.status.is_empty() || !self.unless_rules.status.is_empty();
        if !wants_status && data.status == Status::Failure {
            return false;
        }

        if !self.if_rules.is_empty() && !self.if_rules.matches(data) {
            return false;
        }

        self.unless_rules.is_empty() || !self.unless_rules.matches(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_substitute_known_and_unknown_keys() {
        let vars = env(&[("TAG", "1.2.3")]);
        assert_eq!(substitute_str("alpine:${TAG}", &vars).unwrap(), "alpine:1.2.3");
        assert_eq!(substitute_str("echo ${MISSING}", &vars).unwrap(), "echo ${MISSING}");
        assert_eq!(substitute_str("echo $$HOME $PATH", &vars).unwrap(), "echo $HOME $PATH");
    }

    #[test]
    fn test_substitute_malformed_reference() {
        let vars = env(&[]);
        assert!(substitute_str("echo ${OPEN", &vars).is_err());
        assert!(substitute_str("echo ${}", &vars).is_err());
    }

    #[test]
    fn test_empty_container() {
        assert!(Container::default().is_empty());
        let ctn = Container {
            name: "clone".to_string(),
            ..Default::default()
        };
        assert!(!ctn.is_empty());
    }
}
