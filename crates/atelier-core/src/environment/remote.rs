//! Fast-forward synchronization with a remote history counterpart.
//!
//! The remote is a directory holding the same `.history` layout. Conflict
//! handling is fast-forward only by design: one side's log must be a
//! strict prefix of the other's, anything else is rejected. This is a
//! deliberate scope limit, not a general merge.

use crate::environment::history::{Commit, CommitId, History};
use crate::{AtelierError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Result of a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    /// Commits transferred to the remote.
    pub pushed: usize,
    /// The remote tip after the push.
    pub remote_tip: Option<CommitId>,
}

/// Result of a pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    /// Commits transferred from the remote.
    pub pulled: usize,
    /// The local tip after the pull.
    pub new_tip: Option<CommitId>,
}

/// Verify that `prefix` is a (possibly equal) leading sequence of `full`.
fn check_prefix(prefix: &[Commit], full: &[Commit], direction: &str) -> Result<()> {
    if prefix.len() > full.len() {
        return Err(AtelierError::DivergedHistory {
            message: format!(
                "{}: counterpart has {} commits beyond the shared history",
                direction,
                prefix.len() - full.len()
            ),
        });
    }
    for (ours, theirs) in full.iter().zip(prefix.iter()) {
        if ours.id != theirs.id {
            return Err(AtelierError::DivergedHistory {
                message: format!(
                    "{}: histories split at {} vs {}",
                    direction, ours.id, theirs.id
                ),
            });
        }
    }
    Ok(())
}

/// Push the local commit sequence to the remote.
///
/// Accepted only when the remote log is a strict prefix of the local log;
/// a remote that advanced independently is never overwritten.
pub fn push(local: &History, remote: &History) -> Result<PushReport> {
    let local_log = local.commits()?;
    let remote_log = remote.commits()?;

    check_prefix(&remote_log, &local_log, "push rejected")?;

    let new_commits = &local_log[remote_log.len()..];
    for commit in new_commits {
        local.copy_snapshot_to(&commit.id, remote)?;
        remote.append_log_line(commit)?;
    }

    let remote_tip = local_log.last().map(|c| c.id.clone());
    if let Some(tip) = &remote_tip {
        remote.set_head(tip)?;
    }

    info!("Pushed {} commit(s)", new_commits.len());
    Ok(PushReport {
        pushed: new_commits.len(),
        remote_tip,
    })
}

/// Fast-forward the local commit sequence from the remote.
///
/// Accepted only when the local log is a prefix of the remote's. The
/// caller restores working files from the new tip snapshot afterwards.
pub fn pull(local: &History, remote: &History) -> Result<PullReport> {
    let local_log = local.commits()?;
    let remote_log = remote.commits()?;

    check_prefix(&local_log, &remote_log, "pull rejected")?;

    let new_commits = &remote_log[local_log.len()..];
    for commit in new_commits {
        remote.copy_snapshot_to(&commit.id, local)?;
        local.append_log_line(commit)?;
    }

    let new_tip = remote_log.last().map(|c| c.id.clone());
    if let Some(tip) = &new_tip {
        local.set_head(tip)?;
    }

    info!("Pulled {} commit(s)", new_commits.len());
    Ok(PullReport {
        pulled: new_commits.len(),
        new_tip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::history::Snapshot;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn commit(parent: Option<&CommitId>, message: &str) -> Commit {
        Commit {
            id: CommitId::generate(),
            parent_id: parent.cloned(),
            message: message.to_string(),
            timestamp: Utc::now(),
            unresolved_models: Vec::new(),
        }
    }

    fn snapshot(text: &[u8]) -> Snapshot {
        Snapshot {
            files: [(PathBuf::from("pyproject.toml"), text.to_vec())]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_push_then_pull_round_trip() {
        let dir = TempDir::new().unwrap();
        let local = History::open(dir.path().join("local")).unwrap();
        let remote = History::open(dir.path().join("remote")).unwrap();
        let clone = History::open(dir.path().join("clone")).unwrap();

        let c1 = commit(None, "one");
        local.append(&c1, &snapshot(b"v1")).unwrap();
        let c2 = commit(Some(&c1.id), "two");
        local.append(&c2, &snapshot(b"v2")).unwrap();

        let report = push(&local, &remote).unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(remote.head().unwrap(), Some(c2.id.clone()));

        let report = pull(&clone, &remote).unwrap();
        assert_eq!(report.pulled, 2);
        assert_eq!(clone.commits().unwrap().len(), 2);
        assert_eq!(
            clone.snapshot(&c2.id).unwrap(),
            snapshot(b"v2")
        );
    }

    #[test]
    fn test_push_is_incremental_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let local = History::open(dir.path().join("local")).unwrap();
        let remote = History::open(dir.path().join("remote")).unwrap();

        let c1 = commit(None, "one");
        local.append(&c1, &snapshot(b"v1")).unwrap();
        assert_eq!(push(&local, &remote).unwrap().pushed, 1);
        assert_eq!(push(&local, &remote).unwrap().pushed, 0);

        let c2 = commit(Some(&c1.id), "two");
        local.append(&c2, &snapshot(b"v2")).unwrap();
        assert_eq!(push(&local, &remote).unwrap().pushed, 1);
        assert_eq!(remote.commits().unwrap().len(), 2);
    }

    #[test]
    fn test_diverged_push_rejected() {
        let dir = TempDir::new().unwrap();
        let local = History::open(dir.path().join("local")).unwrap();
        let remote = History::open(dir.path().join("remote")).unwrap();

        // Shared ancestor.
        let base = commit(None, "base");
        local.append(&base, &snapshot(b"base")).unwrap();
        push(&local, &remote).unwrap();

        // Both sides advance independently.
        let local_next = commit(Some(&base.id), "local work");
        local.append(&local_next, &snapshot(b"local")).unwrap();
        let remote_next = commit(Some(&base.id), "remote work");
        remote.append(&remote_next, &snapshot(b"remote")).unwrap();

        let err = push(&local, &remote).unwrap_err();
        assert!(matches!(err, AtelierError::DivergedHistory { .. }));
        // The remote's own history is untouched.
        assert_eq!(remote.commits().unwrap().len(), 2);
        assert_eq!(remote.commits().unwrap()[1].id, remote_next.id);
    }

    #[test]
    fn test_diverged_pull_rejected() {
        let dir = TempDir::new().unwrap();
        let local = History::open(dir.path().join("local")).unwrap();
        let remote = History::open(dir.path().join("remote")).unwrap();

        let base = commit(None, "base");
        local.append(&base, &snapshot(b"base")).unwrap();
        push(&local, &remote).unwrap();

        let local_next = commit(Some(&base.id), "local work");
        local.append(&local_next, &snapshot(b"local")).unwrap();
        let remote_next = commit(Some(&base.id), "remote work");
        remote.append(&remote_next, &snapshot(b"remote")).unwrap();

        assert!(matches!(
            pull(&local, &remote),
            Err(AtelierError::DivergedHistory { .. })
        ));
    }
}
