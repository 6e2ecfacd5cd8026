//! Branch publisher: materializes one commit as a remote branch.
//!
//! A branch is published by cherry-picking the commit onto its parent branch
//! in a scratch worktree, then force-pushing the result. Worktrees are
//! created in detached HEAD mode so no branch is ever "checked out" twice,
//! and pushes use `HEAD:refs/heads/<name>` refspecs. Every exit path cleans
//! up the worktree and its temporary directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::git::{self, GitError};
use crate::types::Sha;

/// A scratch worktree that removes itself (and prunes git's worktree
/// metadata) when dropped.
struct ScratchWorktree {
    repo_root: PathBuf,
    path: PathBuf,
    // Owns the temp dir so it outlives the worktree removal.
    _dir: tempfile::TempDir,
}

impl ScratchWorktree {
    /// Creates a detached worktree at `start_ref` inside a fresh temp dir.
    fn create(repo_root: &Path, name_hint: &str, start_ref: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("spr-{}-", name_hint.replace('/', "-")))
            .tempdir()
            .map_err(GitError::Io)?;
        let path = dir.path().join("wt");

        git::run_git(
            repo_root,
            &[
                "worktree",
                "add",
                "--detach",
                path.to_str().unwrap_or_default(),
                start_ref,
            ],
        )?;

        Ok(ScratchWorktree {
            repo_root: repo_root.to_path_buf(),
            path,
            _dir: dir,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchWorktree {
    fn drop(&mut self) {
        // Best-effort: a failed removal must not mask the original error.
        let _ = git::run_git(
            &self.repo_root,
            &[
                "worktree",
                "remove",
                "--force",
                self.path.to_str().unwrap_or_default(),
            ],
        );
        let _ = git::run_git(&self.repo_root, &["worktree", "prune"]);
    }
}

/// Publishes `sha` as remote branch `branch`, parented on `parent_branch`.
///
/// The parent is resolved through the remote-tracking ref, so a branch pushed
/// earlier in the same operation is immediately usable as a parent. A
/// cherry-pick conflict means the commit depends on something that isn't in
/// the parent branch; the conflict is aborted and reported.
pub fn publish(
    repo_root: &Path,
    remote: &str,
    branch: &str,
    parent_branch: &str,
    sha: &Sha,
) -> Result<()> {
    let start_ref = git::origin_branch_ref(repo_root, remote, parent_branch);
    let worktree = ScratchWorktree::create(repo_root, branch, &start_ref)?;

    tracing::debug!(branch, parent = parent_branch, sha = %sha.short(), "publishing branch");

    cherry_pick(worktree.path(), branch, sha)?;

    git::run_git(
        worktree.path(),
        &[
            "push",
            "--force",
            remote,
            &format!("HEAD:refs/heads/{}", branch),
        ],
    )?;

    Ok(())
}

/// Cherry-picks `sha` onto the worktree HEAD, classifying conflicts.
fn cherry_pick(worktree: &Path, branch: &str, sha: &Sha) -> Result<()> {
    let output = crate::git::git_user_command(worktree)
        .args(["cherry-pick", sha.as_str()])
        .output()
        .map_err(GitError::Io)?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}{}", stdout, stderr);

    // Leave the worktree in a removable state.
    let _ = git::run_git(worktree, &["cherry-pick", "--abort"]);

    if combined.contains("Merge conflict in") || combined.starts_with("CONFLICT ") {
        Err(Error::CherryPickConflict {
            branch: branch.to_string(),
            sha: sha.to_string(),
        })
    } else {
        Err(GitError::CommandFailed {
            command: format!("git cherry-pick {}", sha),
            stderr: combined.to_string(),
        }
        .into())
    }
}

/// Deletes a remote branch by pushing an empty refspec.
pub fn delete_remote(repo_root: &Path, remote: &str, branch: &str) -> Result<()> {
    git::push(repo_root, remote, &[&format!(":refs/heads/{}", branch)])?;
    Ok(())
}

/// A `<sha>:refs/heads/<branch>` pair for the batch push path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub sha: Sha,
    pub branch: String,
}

impl RefUpdate {
    fn refspec(&self) -> String {
        format!("{}:refs/heads/{}", self.sha, self.branch)
    }
}

/// Force-pushes a batch of branches directly from local commits.
///
/// Used by the whole-stack flow, where every branch head is already a local
/// commit and no cherry-picking is needed. `individually` splits the batch
/// into one push per ref (for servers that time out on large atomic pushes);
/// otherwise a single `--atomic` push updates every ref or none.
pub fn push_batch(
    repo_root: &Path,
    remote: &str,
    updates: &[RefUpdate],
    individually: bool,
) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }

    if individually {
        for update in updates {
            git::run_git(repo_root, &["push", "--force", remote, &update.refspec()])?;
        }
    } else {
        let refspecs: Vec<String> = updates.iter().map(|u| u.refspec()).collect();
        let mut args = vec!["push", "--force", "--atomic", remote];
        args.extend(refspecs.iter().map(String::as_str));
        git::run_git(repo_root, &args)?;
    }

    Ok(())
}
