//! Tests for compiled pipeline types.
//!
//! Validates decoding, init step lookup, rulesets and substitution.

use vela_executor::{Container, Pipeline, RuleData, Rules, Ruleset, Status};

fn data(status: Status, branch: &str, event: &str) -> RuleData {
    RuleData {
        branch: branch.to_string(),
        event: event.to_string(),
        repo: "github/octocat".to_string(),
        status,
    }
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_decode_compiled_pipeline() {
    let pipeline: Pipeline = serde_json::from_str(
        r##"{
            "id": "github_octocat_1",
            "version": "1",
            "services": [
                {"id": "service_github_octocat_1_postgres", "name": "postgres",
                 "number": 1, "image": "postgres:16", "detach": true}
            ],
            "steps": [
                {"id": "step_github_octocat_1_init", "name": "init", "number": 1, "image": "#init"},
                {"id": "step_github_octocat_1_test", "name": "test", "number": 2,
                 "image": "golang:1.22", "commands": ["go test ./..."], "pull": "always",
                 "ruleset": {"if": {"branch": ["main"]}, "continue": true}}
            ]
        }"##,
    )
    .unwrap();

    assert_eq!(pipeline.services.len(), 1);
    assert!(pipeline.services[0].detach);
    let test = &pipeline.steps[1];
    assert_eq!(test.ruleset.if_rules.branch, vec!["main"]);
    assert!(test.ruleset.continue_on_failure);
    assert_eq!(pipeline.containers().count(), 3);
}

// =============================================================================
// Init Step Tests
// =============================================================================

#[test]
fn test_init_step_from_steps_or_first_stage() {
    let init = Container {
        id: "step_1_init".to_string(),
        name: "init".to_string(),
        image: "#init".to_string(),
        ..Default::default()
    };

    let steps = Pipeline {
        id: "1".to_string(),
        steps: vec![init.clone()],
        ..Default::default()
    };
    assert_eq!(steps.init_step().map(|c| c.id.as_str()), Some("step_1_init"));

    let stages: Pipeline = serde_json::from_value(serde_json::json!({
        "id": "1",
        "stages": [{"name": "init", "steps": [init]}]
    }))
    .unwrap();
    assert_eq!(stages.init_step().map(|c| c.id.as_str()), Some("step_1_init"));
    assert!(stages.stages[0].is_init());

    assert!(Pipeline::default().init_step().is_none());
}

// =============================================================================
// Ruleset Tests
// =============================================================================

#[test]
fn test_empty_ruleset_skips_failed_builds() {
    let ruleset = Ruleset::default();
    assert!(ruleset.execute(&data(Status::Running, "main", "push")));
    assert!(!ruleset.execute(&data(Status::Failure, "main", "push")));
}

#[test]
fn test_if_rules_must_match() {
    let ruleset = Ruleset {
        if_rules: Rules {
            branch: vec!["main".to_string()],
            event: vec!["push".to_string(), "tag".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(ruleset.execute(&data(Status::Running, "main", "tag")));
    assert!(!ruleset.execute(&data(Status::Running, "dev", "push")));
    assert!(!ruleset.execute(&data(Status::Running, "main", "pull_request")));
}

#[test]
fn test_unless_rules_skip_on_match() {
    let ruleset = Ruleset {
        unless_rules: Rules {
            event: vec!["pull_request".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(ruleset.execute(&data(Status::Running, "main", "push")));
    assert!(!ruleset.execute(&data(Status::Running, "main", "pull_request")));
}

#[test]
fn test_status_rules_run_after_failure() {
    let ruleset = Ruleset {
        if_rules: Rules {
            status: vec![Status::Failure],
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(ruleset.execute(&data(Status::Failure, "main", "push")));
    assert!(!ruleset.execute(&data(Status::Running, "main", "push")));
}

// =============================================================================
// Substitution Tests
// =============================================================================

#[test]
fn test_substitute_container_fields() {
    let mut ctn = Container {
        name: "publish".to_string(),
        image: "plugins/docker:${PLUGIN_TAG}".to_string(),
        directory: "/vela/src/${REPO}".to_string(),
        commands: vec!["echo $${HOME} ${UNKNOWN}".to_string()],
        environment: [
            ("PLUGIN_TAG".to_string(), "v20".to_string()),
            ("REPO".to_string(), "octocat".to_string()),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };

    ctn.substitute().unwrap();

    assert_eq!(ctn.image, "plugins/docker:v20");
    assert_eq!(ctn.directory, "/vela/src/octocat");
    assert_eq!(ctn.commands, vec!["echo ${HOME} ${UNKNOWN}"]);
}
