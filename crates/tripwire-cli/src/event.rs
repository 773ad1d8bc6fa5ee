//! Build the triggering event from CLI flags, an event file or git.

use crate::commands::{EventArgs, EventKind};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use tripwire_scheduler::TriggerEvent;

/// Run `git <args>` in `dir`, returning trimmed stdout on success.
pub async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        debug!(?args, "git command failed");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Top of the git repository containing `dir`, or `dir` itself.
pub async fn repository_root(dir: &Path) -> PathBuf {
    git_output(dir, &["rev-parse", "--show-toplevel"])
        .await
        .map(PathBuf::from)
        .unwrap_or_else(|| dir.to_path_buf())
}

pub async fn changed_since(dir: &Path, since: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let output = git_output(dir, &["diff", "--name-only", since])
        .await
        .ok_or_else(|| format!("git diff --name-only {} failed", since))?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Resolve the event described by `args`, filling branch and sha from the
/// repository at `repo` when not given.
pub async fn build_event(
    args: &EventArgs,
    repo: &Path,
) -> Result<TriggerEvent, Box<dyn std::error::Error>> {
    if let Some(path) = &args.event_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read event file {}: {}", path.display(), e))?;
        return Ok(serde_json::from_str(&content)?);
    }

    let mut changed = args.changed.clone();
    if let Some(since) = &args.since {
        for path in changed_since(repo, since).await? {
            if !changed.contains(&path) {
                changed.push(path);
            }
        }
    }

    let branch = match &args.branch {
        Some(b) => Some(b.clone()),
        None => git_output(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .filter(|b| b != "HEAD"),
    };
    let sha = match &args.sha {
        Some(s) => Some(s.clone()),
        None => git_output(repo, &["rev-parse", "HEAD"]).await,
    };

    Ok(event_from_parts(args, branch, sha, changed)?)
}

/// Assemble an event from already resolved parts.
pub fn event_from_parts(
    args: &EventArgs,
    branch: Option<String>,
    sha: Option<String>,
    paths_changed: Vec<String>,
) -> Result<TriggerEvent, String> {
    match args.kind {
        EventKind::Push => Ok(TriggerEvent::Push {
            branch: branch.ok_or("Could not determine the pushed branch; pass --branch")?,
            paths_changed,
            sha,
        }),
        EventKind::PullRequest => Ok(TriggerEvent::PullRequest {
            source_branch: branch,
            target_branch: args
                .target_branch
                .clone()
                .ok_or("--target-branch is required for pull_request events")?,
            paths_changed,
            sha,
        }),
        EventKind::Manual => Ok(TriggerEvent::Manual {
            actor: args.actor.clone(),
            branch,
            sha,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(kind: EventKind) -> EventArgs {
        EventArgs {
            kind,
            ..Default::default()
        }
    }

    #[test]
    fn test_push_event() {
        let event = event_from_parts(
            &args(EventKind::Push),
            Some("main".to_string()),
            Some("abc123".to_string()),
            vec!["foo.py".to_string()],
        )
        .unwrap();
        assert_eq!(
            event,
            TriggerEvent::Push {
                branch: "main".to_string(),
                paths_changed: vec!["foo.py".to_string()],
                sha: Some("abc123".to_string()),
            }
        );
    }

    #[test]
    fn test_push_requires_branch() {
        assert!(event_from_parts(&args(EventKind::Push), None, None, vec![]).is_err());
    }

    #[test]
    fn test_pull_request_requires_target() {
        assert!(event_from_parts(&args(EventKind::PullRequest), None, None, vec![]).is_err());

        let mut pr = args(EventKind::PullRequest);
        pr.target_branch = Some("master".to_string());
        let event = event_from_parts(&pr, Some("feature".to_string()), None, vec![]).unwrap();
        assert_eq!(event.ref_name(), Some("feature"));
        match event {
            TriggerEvent::PullRequest {
                source_branch,
                target_branch,
                ..
            } => {
                assert_eq!(source_branch.as_deref(), Some("feature"));
                assert_eq!(target_branch, "master");
            }
            other => panic!("expected a pull request event, got {:?}", other),
        }
    }

    #[test]
    fn test_manual_needs_nothing() {
        let event = event_from_parts(&args(EventKind::Manual), None, None, vec![]).unwrap();
        assert!(matches!(event, TriggerEvent::Manual { .. }));
    }

    #[tokio::test]
    async fn test_event_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(
            &path,
            r#"{"event": "pull_request", "target_branch": "master", "paths_changed": ["docs/index.md"]}"#,
        )
        .unwrap();

        let mut a = args(EventKind::Push);
        a.event_file = Some(path);
        let event = build_event(&a, dir.path()).await.unwrap();
        assert_eq!(event.paths_changed(), ["docs/index.md".to_string()]);
        assert_eq!(event.ref_name(), Some("master"));
    }

    #[tokio::test]
    async fn test_explicit_flags_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(EventKind::Push);
        a.branch = Some("main".to_string());
        a.sha = Some("deadbeef".to_string());
        a.changed = vec!["README.md".to_string()];

        let event = build_event(&a, dir.path()).await.unwrap();
        assert_eq!(event.sha(), Some("deadbeef"));
        assert_eq!(event.paths_changed(), ["README.md".to_string()]);
    }
}
