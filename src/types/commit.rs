//! Local commit records.

use serde::{Deserialize, Serialize};

use super::ids::{CommitId, Sha};
use super::pr::PullRequest;

/// A commit on the local working branch.
///
/// Identity is the commit-id trailer; the git hash is transient and changes
/// every time the commit is amended or rebased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Stable identity from the `commit-id:` trailer. `None` means the commit
    /// has not been tagged yet and must go through the tagger before it can
    /// be reconciled.
    pub commit_id: Option<CommitId>,

    /// The git hash, reassigned on every amend.
    pub hash: Sha,

    /// First line of the commit message.
    pub subject: String,

    /// Everything after the first line.
    pub body: String,

    /// True when the subject marks the commit as work in progress.
    pub wip: bool,
}

impl Commit {
    /// The commit-id, for commits known to be tagged.
    ///
    /// Callers that run after the tagger may rely on the trailer being
    /// present; this accessor centralizes that assumption.
    pub fn id(&self) -> Option<&CommitId> {
        self.commit_id.as_ref()
    }
}

/// A local commit enriched with its position in the stack and its remote
/// counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCommit {
    pub commit: Commit,

    /// Position in the unmerged stack: 0 is the oldest unmerged commit,
    /// indices grow toward HEAD. This is the number users type in selectors.
    pub index: usize,

    /// PR-set membership, when the user has placed this commit in a set.
    pub pr_index: Option<usize>,

    /// The open pull request currently representing this commit, if any.
    pub pull_request: Option<PullRequest>,
}

impl LocalCommit {
    pub fn new(commit: Commit, index: usize) -> Self {
        LocalCommit {
            commit,
            index,
            pr_index: None,
            pull_request: None,
        }
    }
}
