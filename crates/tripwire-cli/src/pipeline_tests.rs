//! Tests for loading and planning the bundled pipeline.

#[cfg(test)]
mod tests {
    use crate::handlers::{find_pipeline_file, load_pipeline};
    use std::path::PathBuf;
    use tripwire_scheduler::{PlanOutcome, Planner, TriggerEvent};

    fn ci_pipeline() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../pipelines/ci.yaml")
    }

    fn push(paths: &[&str]) -> TriggerEvent {
        TriggerEvent::Push {
            branch: "feature".to_string(),
            paths_changed: paths.iter().map(|p| p.to_string()).collect(),
            sha: None,
        }
    }

    #[test]
    fn test_bundled_pipeline_loads() {
        let pipeline = load_pipeline(&ci_pipeline()).unwrap();
        assert_eq!(pipeline.name, "CI");
        assert_eq!(pipeline.steps.len(), 6);
    }

    #[test]
    fn test_bundled_pipeline_triggers() {
        let planner = Planner::new(load_pipeline(&ci_pipeline()).unwrap()).unwrap();

        let cases: &[(&[&str], bool)] = &[
            (&["foo.py"], true),
            (&["data_diff/databases/presto.py"], true),
            (&[".github/workflows/ci.yml"], true),
            (&["README.md"], false),
            (&["dev/dev.env", "dev/presto.py"], false),
        ];
        for (paths, expected) in cases {
            let outcome = planner.plan(&push(paths));
            assert_eq!(
                outcome.decision().triggered,
                *expected,
                "paths {:?}: {}",
                paths,
                outcome.decision().reason
            );
        }

        let outcome = planner.plan(&TriggerEvent::PullRequest {
            source_branch: None,
            target_branch: "master".to_string(),
            paths_changed: vec!["docs/index.md".to_string()],
            sha: None,
        });
        match outcome {
            PlanOutcome::Run(plan) => {
                let names: Vec<&str> = plan.jobs.iter().map(|j| j.display_name.as_str()).collect();
                assert_eq!(
                    names,
                    vec![
                        "Check Python 3.7 on ubuntu-latest",
                        "Check Python 3.8 on ubuntu-latest",
                        "Check Python 3.9 on ubuntu-latest",
                        "Check Python 3.10 on ubuntu-latest",
                    ]
                );
            }
            PlanOutcome::Skipped(decision) => panic!("not triggered: {}", decision.reason),
        }
    }

    #[test]
    fn test_unknown_action_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tripwire.yaml");
        std::fs::write(
            &path,
            "name: CI\nsteps:\n  - name: Cache\n    uses: actions/cache@v3\n",
        )
        .unwrap();
        assert!(load_pipeline(&path).is_err());
    }

    #[test]
    fn test_explicit_path_is_returned() {
        assert_eq!(
            find_pipeline_file(Some("custom.yaml")),
            Some(PathBuf::from("custom.yaml"))
        );
    }
}
