//! Tests for the executor module.

#[cfg(test)]
mod tests {
    use crate::executor::execute_plan;
    use std::sync::Arc;
    use tripwire_core::pipeline::PipelineDefinition;
    use tripwire_core::run::{JobStatus, StepStatus};
    use tripwire_runner::{ActionConfig, JobExecutor, JobExecutorConfig, ShellRunner};
    use tripwire_scheduler::{Planner, RunPlan, TriggerEvent};
    use tripwire_secrets::SecretManager;

    fn pipeline(fail_fast: bool, test_command: &str) -> PipelineDefinition {
        let yaml = format!(
            r#"
name: CI
job_name: Check Python ${{{{ matrix.python-version }}}} on ${{{{ matrix.os }}}}
triggers:
  - type: manual
matrix:
  dimensions:
    os: [ubuntu-latest]
    python-version: ["3.7", "3.8", "3.9", "3.10"]
  fail_fast: {fail_fast}
steps:
  - name: Install package
    run: echo installing
  - name: Run unit tests
    run: {test_command}
  - name: Report
    run: echo done
"#
        );
        PipelineDefinition::from_yaml(&yaml).unwrap()
    }

    fn plan(pipeline: &PipelineDefinition) -> RunPlan {
        Planner::new(pipeline.clone())
            .unwrap()
            .plan(&TriggerEvent::Manual {
                actor: None,
                branch: Some("master".to_string()),
                sha: None,
            })
            .into_plan()
            .expect("manual dispatch always triggers")
    }

    fn executor(root: &std::path::Path) -> Arc<JobExecutor> {
        Arc::new(JobExecutor::new(
            JobExecutorConfig {
                work_root: root.to_path_buf(),
                repository: root.to_path_buf(),
                keep_workspaces: false,
                actions: ActionConfig::default(),
            },
            Arc::new(ShellRunner::new()),
            Arc::new(SecretManager::default()),
        ))
    }

    #[tokio::test]
    async fn test_failing_job_does_not_affect_siblings() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(false, r#"test "${{ matrix.python-version }}" != "3.9""#);
        let plan = plan(&pipeline);

        let report = execute_plan(Arc::new(pipeline), &plan, executor(root.path()), None, false).await;

        assert!(!report.success());
        assert_eq!(report.jobs.len(), 4);
        let statuses: Vec<(&str, JobStatus)> = report
            .jobs
            .iter()
            .map(|j| (j.name.as_str(), j.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("Check Python 3.7 on ubuntu-latest", JobStatus::Success),
                ("Check Python 3.8 on ubuntu-latest", JobStatus::Success),
                ("Check Python 3.9 on ubuntu-latest", JobStatus::Failure),
                ("Check Python 3.10 on ubuntu-latest", JobStatus::Success),
            ]
        );

        let failed = &report.jobs[2];
        assert_eq!(failed.failed_step().map(|s| s.name.as_str()), Some("Run unit tests"));
        assert_eq!(failed.steps[0].status, StepStatus::Success);
        assert_eq!(failed.steps[2].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_fail_fast_keeps_queued_jobs_from_starting() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(true, "exit 1");
        let plan = plan(&pipeline);

        let report = execute_plan(Arc::new(pipeline), &plan, executor(root.path()), Some(1), false).await;

        assert_eq!(report.count(JobStatus::Failure), 1);
        assert_eq!(report.count(JobStatus::Cancelled), 3);
        for job in report.jobs.iter().filter(|j| j.status == JobStatus::Cancelled) {
            assert!(job.started_at.is_none());
            assert!(job.steps.iter().all(|s| s.status == StepStatus::Skipped));
        }
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_running_jobs() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            true,
            r#"if [ "${{ matrix.python-version }}" = "3.9" ]; then exit 1; else sleep 20; fi"#,
        );
        let plan = plan(&pipeline);

        let report = execute_plan(Arc::new(pipeline), &plan, executor(root.path()), None, false).await;

        assert_eq!(report.jobs[2].status, JobStatus::Failure);
        for index in [0, 1, 3] {
            assert_eq!(report.jobs[index].status, JobStatus::Cancelled);
        }
        assert!(report.duration_ms < 20_000);
    }

    #[tokio::test]
    async fn test_all_jobs_pass() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = pipeline(false, "echo ok");
        let plan = plan(&pipeline);

        let report = execute_plan(Arc::new(pipeline), &plan, executor(root.path()), Some(2), false).await;

        assert!(report.success());
        assert_eq!(report.count(JobStatus::Success), 4);
        assert!(report.jobs.iter().all(|j| j.steps.len() == 3));
    }
}
