//! Local git operations.
//!
//! Everything here shells out to the `git` binary with a scrubbed
//! environment, so behavior does not depend on the user's global config
//! (aliases, hooks, rerere). Higher-level flows live in the submodules:
//! stack reading in [`stack`], commit-id tagging in [`tagger`].

pub mod stack;
pub mod tagger;

use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command exited non-zero.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Output that should have been a SHA wasn't one.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// The current directory is not inside a git repository.
    #[error("not a git repository (or any parent): {0}")]
    NotARepository(String),

    /// IO error spawning or reading the subprocess.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Create a git Command with a clean environment (no system/user config).
///
/// This ensures consistent behavior across machines by ignoring system and
/// user git configuration and disabling terminal prompts.
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Like [`git_command`] but with the user's own configuration visible.
///
/// Operations that create commits (cherry-pick, rebase) need the user's real
/// identity, which may live in global config.
pub(crate) fn git_user_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a [`GitError`] when the command
/// exits non-zero.
pub fn run_git(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    tracing::debug!(workdir = %workdir.display(), args = ?args, "git");
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return trimmed stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Discover the repository root containing `dir`.
pub fn repo_root(dir: &Path) -> GitResult<PathBuf> {
    match run_git_stdout(dir, &["rev-parse", "--show-toplevel"]) {
        Ok(root) => Ok(PathBuf::from(root)),
        Err(GitError::CommandFailed { .. }) => {
            Err(GitError::NotARepository(dir.display().to_string()))
        }
        Err(e) => Err(e),
    }
}

/// Get the SHA of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<Sha> {
    let sha_str = run_git_stdout(workdir, &["rev-parse", rev])?;
    Sha::parse(&sha_str).map_err(|_| GitError::InvalidSha(sha_str))
}

/// Fetch from a remote, optionally pruning deleted refs.
pub fn fetch(workdir: &Path, remote: &str, prune: bool) -> GitResult<()> {
    let mut args = vec!["fetch", remote];
    if prune {
        args.push("--prune");
    }
    run_git(workdir, &args)?;
    Ok(())
}

/// Push refspecs to a remote. An empty source (`:refs/heads/x`) deletes the
/// remote ref.
pub fn push(workdir: &Path, remote: &str, refspecs: &[&str]) -> GitResult<()> {
    let mut args = vec!["push", remote];
    args.extend(refspecs);
    run_git(workdir, &args)?;
    Ok(())
}

/// Whether a local branch with this name exists.
pub fn branch_exists(workdir: &Path, branch: &str) -> bool {
    git_command(workdir)
        .args([
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{}", branch),
        ])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Short name of the currently checked-out branch (`HEAD` when detached).
pub fn local_branch_short_name(workdir: &Path) -> GitResult<String> {
    run_git_stdout(workdir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// The configured URL of a remote.
pub fn remote_url(workdir: &Path, remote: &str) -> GitResult<String> {
    run_git_stdout(
        workdir,
        &["config", "--get", &format!("remote.{}.url", remote)],
    )
}

/// The user's configured commit email, needed by merge mutations.
pub fn user_email(workdir: &Path) -> GitResult<String> {
    // The scrubbed environment hides the global config on purpose for every
    // other command; email lookup is the one read that must see it.
    let output = std::process::Command::new("git")
        .current_dir(workdir)
        .args(["config", "--get", "user.email"])
        .output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(GitError::CommandFailed {
            command: "git config --get user.email".into(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// The ref a remote branch resolves to, e.g. `refs/remotes/origin/main`.
pub fn origin_branch_ref(workdir: &Path, remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}
