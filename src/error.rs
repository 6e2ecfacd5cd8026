//! Operation-level error taxonomy.
//!
//! Every user-visible failure funnels into [`Error`]. The variants mirror the
//! distinct situations a user can act on: fix credentials, retry the network,
//! fix the selector, include the missing dependency commit, run the merge
//! check, clean the worktree, fix the PR template, or fix the configuration.

use thiserror::Error;

use crate::git::GitError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The forge rejected our credentials.
    #[error("github rejected credentials: {0}")]
    Auth(String),

    /// Network or forge-internal failure; retrying may help.
    #[error("github request failed: {0}")]
    Transport(String),

    /// The selector is malformed or references commits/sets that don't exist.
    #[error("bad selector: {0}")]
    BadSelector(String),

    /// A cherry-pick hit a merge conflict while publishing a branch.
    #[error("cherry-pick of {sha} onto {branch} conflicts")]
    CherryPickConflict { branch: String, sha: String },

    /// The selection depends on a commit that was not selected (or not yet
    /// pushed), so the published branches cannot be built.
    #[error(
        "unable to add {sha} to the PR set: an earlier commit is required for it to merge properly"
    )]
    IntermediateCommitMissing { sha: String },

    /// `merge` was invoked without a prior successful `spr check`.
    #[error("need to run merge check 'spr check' before merging")]
    MergeCheckRequired,

    /// Uncommitted changes block a history rewrite and autostash failed.
    #[error("working tree has uncommitted changes that cannot be autostashed")]
    TreeDirty,

    /// A rebase could not be replayed.
    #[error("rebase failed: {0}")]
    Rebase(String),

    /// Configured PR template markers were not found or were ambiguous.
    #[error("pr template: {0}")]
    PrTemplate(String),

    /// Required repository configuration is missing or unusable.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A git subprocess failed for a reason with no more specific variant.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Reading or writing the persisted state file failed.
    #[error("state file: {0}")]
    State(String),
}

impl Error {
    /// The process exit code for this error: configuration and usage problems
    /// exit 2, missing credentials exit 3, everything else is an operational
    /// failure and exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigInvalid(_) | Error::BadSelector(_) => 2,
            Error::Auth(_) => 3,
            _ => 1,
        }
    }

    /// Classifies an octocrab failure into `Auth` or `Transport`.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let msg = err.to_string();
        if is_auth_error(&msg) {
            Error::Auth(msg)
        } else {
            Error::Transport(msg)
        }
    }
}

/// Whether an API error message indicates rejected credentials.
fn is_auth_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("401") || lower.contains("unauthorized") || lower.contains("bad credentials")
}
