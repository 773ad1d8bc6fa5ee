//! Trigger matching and evaluation.

use crate::glob::GlobFilter;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tripwire_core::Result;
use tripwire_core::pipeline::{PipelineDefinition, TriggerConfig, TriggerType};

/// Event that can trigger a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push {
        branch: String,
        #[serde(default)]
        paths_changed: Vec<String>,
        #[serde(default)]
        sha: Option<String>,
    },
    PullRequest {
        #[serde(default)]
        source_branch: Option<String>,
        target_branch: String,
        #[serde(default)]
        paths_changed: Vec<String>,
        #[serde(default)]
        sha: Option<String>,
    },
    Manual {
        #[serde(default)]
        actor: Option<String>,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        sha: Option<String>,
    },
}

impl TriggerEvent {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerEvent::Push { .. } => TriggerType::Push,
            TriggerEvent::PullRequest { .. } => TriggerType::PullRequest,
            TriggerEvent::Manual { .. } => TriggerType::Manual,
        }
    }

    /// Commit the run should check out, if the event names one.
    pub fn sha(&self) -> Option<&str> {
        match self {
            TriggerEvent::Push { sha, .. }
            | TriggerEvent::PullRequest { sha, .. }
            | TriggerEvent::Manual { sha, .. } => sha.as_deref(),
        }
    }

    /// Branch the event's commit lives on.
    pub fn ref_name(&self) -> Option<&str> {
        match self {
            TriggerEvent::Push { branch, .. } => Some(branch_name(branch)),
            TriggerEvent::PullRequest {
                source_branch,
                target_branch,
                ..
            } => Some(branch_name(
                source_branch.as_deref().unwrap_or(target_branch.as_str()),
            )),
            TriggerEvent::Manual { branch, .. } => branch.as_deref().map(branch_name),
        }
    }

    pub fn paths_changed(&self) -> &[String] {
        match self {
            TriggerEvent::Push { paths_changed, .. }
            | TriggerEvent::PullRequest { paths_changed, .. } => paths_changed,
            TriggerEvent::Manual { .. } => &[],
        }
    }
}

fn branch_name(reference: &str) -> &str {
    reference.strip_prefix("refs/heads/").unwrap_or(reference)
}

/// Outcome of evaluating an event against a pipeline's triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDecision {
    pub triggered: bool,
    pub trigger: TriggerType,
    /// Index of the first matching rule in the pipeline's `triggers`.
    pub rule: Option<usize>,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct CompiledTrigger {
    trigger_type: TriggerType,
    branches: GlobFilter,
    paths: GlobFilter,
}

impl CompiledTrigger {
    fn compile(config: &TriggerConfig) -> Result<Self> {
        Ok(Self {
            trigger_type: config.trigger_type,
            branches: GlobFilter::compile(&config.branches, &[])?,
            paths: GlobFilter::compile(&config.paths, &config.paths_ignore)?,
        })
    }
}

/// Matcher for determining if a pipeline should be triggered.
///
/// Patterns are compiled once so an invalid glob surfaces when the
/// pipeline is loaded rather than when an event arrives.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    rules: Vec<CompiledTrigger>,
}

impl TriggerMatcher {
    pub fn new(pipeline: &PipelineDefinition) -> Result<Self> {
        let rules = pipeline
            .triggers
            .iter()
            .map(CompiledTrigger::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Check if the pipeline should run for an event.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        self.evaluate(event).triggered
    }

    /// Evaluate an event and explain the result.
    pub fn evaluate(&self, event: &TriggerEvent) -> TriggerDecision {
        let trigger = event.trigger_type();

        if self.rules.is_empty() {
            // Default: trigger on push to any branch
            let triggered = trigger == TriggerType::Push;
            return TriggerDecision {
                triggered,
                trigger,
                rule: None,
                reason: if triggered {
                    "no triggers declared; pushes always run".to_string()
                } else {
                    format!("no triggers declared; {} events do not run", trigger)
                },
            };
        }

        let mut candidates = 0;
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.trigger_type != trigger {
                continue;
            }
            candidates += 1;
            if self.rule_matches(rule, event) {
                debug!(rule = idx, %trigger, "Trigger rule matched");
                return TriggerDecision {
                    triggered: true,
                    trigger,
                    rule: Some(idx),
                    reason: format!("matched {} trigger #{}", trigger, idx + 1),
                };
            }
        }

        let reason = if candidates == 0 {
            format!("pipeline declares no {} trigger", trigger)
        } else {
            match event {
                TriggerEvent::Push { branch, .. } => format!(
                    "push to '{}' did not pass the branch and path filters",
                    branch_name(branch)
                ),
                TriggerEvent::PullRequest { target_branch, .. } => format!(
                    "pull request into '{}' did not pass the branch and path filters",
                    branch_name(target_branch)
                ),
                TriggerEvent::Manual { .. } => "manual dispatch did not match".to_string(),
            }
        };

        TriggerDecision {
            triggered: false,
            trigger,
            rule: None,
            reason,
        }
    }

    fn rule_matches(&self, rule: &CompiledTrigger, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Push {
                branch,
                paths_changed,
                ..
            } => {
                rule.branches.allows_name(branch_name(branch))
                    && rule.paths.allows_changes(paths_changed)
            }
            TriggerEvent::PullRequest {
                target_branch,
                paths_changed,
                ..
            } => {
                rule.branches.allows_name(branch_name(target_branch))
                    && rule.paths.allows_changes(paths_changed)
            }
            TriggerEvent::Manual { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripwire_core::pipeline::StepDefinition;

    fn pipeline(triggers: Vec<TriggerConfig>) -> PipelineDefinition {
        PipelineDefinition {
            version: "1".to_string(),
            name: "ci".to_string(),
            description: None,
            job_name: None,
            triggers,
            variables: Default::default(),
            matrix: None,
            steps: vec![StepDefinition::run("test", "true")],
        }
    }

    fn ci_matcher() -> TriggerMatcher {
        TriggerMatcher::new(&pipeline(vec![
            TriggerConfig::new(TriggerType::Push).with_paths([
                "**.py",
                ".github/workflows/**",
                "!dev/**",
            ]),
            TriggerConfig::new(TriggerType::PullRequest).with_branches(["master"]),
            TriggerConfig::new(TriggerType::Manual),
        ]))
        .unwrap()
    }

    fn push(paths: &[&str]) -> TriggerEvent {
        TriggerEvent::Push {
            branch: "refs/heads/feature".to_string(),
            paths_changed: paths.iter().map(|s| s.to_string()).collect(),
            sha: None,
        }
    }

    fn pull_request(target: &str, paths: &[&str]) -> TriggerEvent {
        TriggerEvent::PullRequest {
            source_branch: Some("feature".to_string()),
            target_branch: target.to_string(),
            paths_changed: paths.iter().map(|s| s.to_string()).collect(),
            sha: None,
        }
    }

    #[test]
    fn test_push_python_change_triggers() {
        let decision = ci_matcher().evaluate(&push(&["foo.py"]));
        assert!(decision.triggered);
        assert_eq!(decision.rule, Some(0));
    }

    #[test]
    fn test_push_readme_only_does_not_trigger() {
        let decision = ci_matcher().evaluate(&push(&["README.md"]));
        assert!(!decision.triggered);
        assert!(decision.reason.contains("path filters"));
    }

    #[test]
    fn test_push_under_excluded_dir_does_not_trigger() {
        let matcher = ci_matcher();
        assert!(!matcher.matches(&push(&["dev/bootstrap.py"])));
        assert!(!matcher.matches(&push(&["dev/a.py", "dev/b.py"])));
    }

    #[test]
    fn test_push_workflow_change_triggers() {
        assert!(ci_matcher().matches(&push(&[".github/workflows/ci.yml"])));
    }

    #[test]
    fn test_pull_request_to_protected_branch_ignores_paths() {
        let matcher = ci_matcher();
        assert!(matcher.matches(&pull_request("master", &["README.md"])));
        assert!(matcher.matches(&pull_request("refs/heads/master", &[])));
        assert!(!matcher.matches(&pull_request("develop", &["foo.py"])));
    }

    #[test]
    fn test_manual_dispatch_always_triggers() {
        let event = TriggerEvent::Manual {
            actor: Some("octocat".to_string()),
            branch: None,
            sha: None,
        };
        assert!(ci_matcher().matches(&event));
    }

    #[test]
    fn test_manual_without_manual_trigger() {
        let matcher = TriggerMatcher::new(&pipeline(vec![TriggerConfig::new(TriggerType::Push)]))
            .unwrap();
        let decision = matcher.evaluate(&TriggerEvent::Manual {
            actor: None,
            branch: None,
            sha: None,
        });
        assert!(!decision.triggered);
        assert_eq!(decision.reason, "pipeline declares no manual trigger");
    }

    #[test]
    fn test_no_triggers_defaults_to_push() {
        let matcher = TriggerMatcher::new(&pipeline(vec![])).unwrap();
        assert!(matcher.matches(&push(&["anything.txt"])));
        assert!(!matcher.matches(&pull_request("master", &[])));
    }

    #[test]
    fn test_push_branch_filter() {
        let matcher = TriggerMatcher::new(&pipeline(vec![
            TriggerConfig::new(TriggerType::Push).with_branches(["main", "release/**"]),
        ]))
        .unwrap();

        let on = |branch: &str| TriggerEvent::Push {
            branch: branch.to_string(),
            paths_changed: vec![],
            sha: None,
        };
        assert!(matcher.matches(&on("main")));
        assert!(matcher.matches(&on("refs/heads/release/1.2")));
        assert!(!matcher.matches(&on("feature/x")));
    }

    #[test]
    fn test_invalid_glob_fails_compile() {
        let result = TriggerMatcher::new(&pipeline(vec![
            TriggerConfig::new(TriggerType::Push).with_paths(["[oops"]),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let event: TriggerEvent = serde_json::from_str(
            r#"{"event":"push","branch":"main","paths_changed":["foo.py"],"sha":"abc"}"#,
        )
        .unwrap();
        assert_eq!(event.trigger_type(), TriggerType::Push);
        assert_eq!(event.sha(), Some("abc"));
        assert_eq!(event.ref_name(), Some("main"));

        let manual: TriggerEvent = serde_json::from_str(r#"{"event":"manual"}"#).unwrap();
        assert_eq!(manual.trigger_type(), TriggerType::Manual);
        assert!(manual.paths_changed().is_empty());
    }
}
