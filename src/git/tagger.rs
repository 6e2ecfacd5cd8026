//! Commit-id tagger: guarantees every unmerged commit carries a
//! `commit-id:<8hex>` trailer.
//!
//! Tagging rewrites history with `git rebase -i --autosquash --autostash`,
//! driving the interactive machinery non-interactively: the sequence editor
//! and the message editor are this same binary re-invoked with hidden
//! subcommands. The sequence editor turns every `pick` into `reword`; the
//! message editor appends a trailer only when one is missing, which makes the
//! whole operation idempotent.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::CommitId;

use super::stack::{commit_id_from_message, unmerged_commits};
use super::{git_user_command, GitError};

/// Appends a `commit-id` trailer to a commit message, separated from the
/// existing content by one blank line. Returns the message unchanged when a
/// trailer is already present.
pub fn append_commit_id(message: &str, id: &CommitId) -> String {
    if commit_id_from_message(message).is_some() {
        return message.to_string();
    }
    let trimmed = message.trim_end_matches('\n');
    if trimmed.is_empty() {
        format!("commit-id:{}\n", id)
    } else {
        format!("{}\n\ncommit-id:{}\n", trimmed, id)
    }
}

/// Rewrites a rebase todo list so that every `pick` becomes `reword`, forcing
/// git to hand each commit message to the message editor.
pub fn reword_all(todo: &str) -> String {
    todo.lines()
        .map(|line| {
            if let Some(rest) = line.strip_prefix("pick ") {
                format!("reword {}", rest)
            } else if let Some(rest) = line.strip_prefix("p ") {
                format!("reword {}", rest)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

/// Entry point for the hidden `rebase-sequence-edit` subcommand: rewrites the
/// todo file git hands to the sequence editor.
pub fn sequence_edit_file(path: &Path) -> std::io::Result<()> {
    let todo = std::fs::read_to_string(path)?;
    std::fs::write(path, reword_all(&todo))
}

/// Entry point for the hidden `rebase-reword` subcommand: appends a freshly
/// generated trailer to the message file when none is present.
pub fn reword_file(path: &Path) -> std::io::Result<()> {
    let message = std::fs::read_to_string(path)?;
    let id = CommitId::generate(&mut rand::thread_rng());
    std::fs::write(path, append_commit_id(&message, &id))
}

/// Ensures every unmerged commit carries a commit-id trailer.
///
/// When all commits are already tagged this is a no-op (no history rewrite,
/// no stash). Otherwise the stack is replayed with autosquash+autostash and
/// every message routed through the reword editor.
pub fn tag_commits(workdir: &Path, remote: &str, branch: &str) -> Result<()> {
    let commits = unmerged_commits(workdir, remote, branch)?;
    if commits.iter().all(|c| c.commit.commit_id.is_some()) {
        return Ok(());
    }

    let untagged = commits
        .iter()
        .filter(|c| c.commit.commit_id.is_none())
        .count();
    tracing::info!(untagged, "tagging commits with commit-ids");

    let exe = std::env::current_exe().map_err(GitError::Io)?;
    let exe = exe.display();
    let upstream = format!("{}/{}", remote, branch);

    let output = git_user_command(workdir)
        .args(["rebase", "-i", "--autosquash", "--autostash", &upstream])
        .env(
            "GIT_SEQUENCE_EDITOR",
            format!("\"{}\" rebase-sequence-edit", exe),
        )
        .env("GIT_EDITOR", format!("\"{}\" rebase-reword", exe))
        .output()
        .map_err(GitError::Io)?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if stderr.contains("stash") || stderr.contains("unstaged changes") {
        Err(Error::TreeDirty)
    } else {
        Err(Error::Rebase(stderr))
    }
}
