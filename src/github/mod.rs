//! The forge seam: what the engine needs from GitHub.
//!
//! [`Forge`] is the trait the engine drives; [`client::GitHubClient`] is the
//! octocrab-backed implementation. Keeping the seam narrow lets the tests run
//! the whole engine against a recording fake.

pub mod body;
pub mod client;
pub mod query;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::MergeMethod;
use crate::error::Result;
use crate::types::{CommitId, PrNumber, PullRequest};

/// Everything one batched status call returns.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    /// GraphQL node id of the repository (needed by some mutations).
    pub repository_id: String,

    /// Login of the authenticated viewer.
    pub viewer_login: String,

    /// The viewer's open, core-managed PRs indexed by commit-id.
    pub prs: HashMap<CommitId, PullRequest>,
}

/// Inputs for creating a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePr {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
}

/// Inputs for updating a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePr {
    pub number: PrNumber,
    pub title: String,
    pub body: String,
    /// New base branch; `None` leaves the base untouched (a PR sitting in the
    /// merge queue must never have its base changed).
    pub base: Option<String>,
}

/// A user that can be requested as a reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoAssignee {
    pub login: String,
}

/// The operations the reconciliation engine needs from the forge.
#[async_trait]
pub trait Forge: Send + Sync {
    /// One batched call: all open PRs of the viewer with their merge, check
    /// and review status, plus repository metadata.
    async fn pull_requests_and_status(&self) -> Result<RemoteSnapshot>;

    async fn create_pull_request(&self, input: CreatePr) -> Result<PullRequest>;

    async fn update_pull_request(&self, input: UpdatePr) -> Result<()>;

    async fn comment_pull_request(&self, number: PrNumber, body: &str) -> Result<()>;

    async fn close_pull_request(&self, number: PrNumber) -> Result<()>;

    /// Merges the PR, or enqueues it when the repository uses a merge queue.
    async fn merge_pull_request(
        &self,
        pr: &PullRequest,
        method: MergeMethod,
        merge_queue: bool,
        author_email: &str,
    ) -> Result<()>;

    async fn assignable_users(&self) -> Result<Vec<RepoAssignee>>;

    async fn request_reviewers(&self, number: PrNumber, reviewers: Vec<String>) -> Result<()>;
}

/// Extracts the commit-id from a core-managed branch name.
///
/// Any branch of the form `spr/<segment>/<8hex>` is core-managed; the middle
/// segment is carried for display but not interpreted.
pub fn commit_id_from_branch(branch: &str) -> Option<CommitId> {
    let mut segments = branch.split('/');
    let (Some(prefix), Some(_target), Some(id), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    if prefix != "spr" {
        return None;
    }
    CommitId::parse(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_parse_accepts_managed_names() {
        assert_eq!(
            commit_id_from_branch("spr/main/deadbeef"),
            Some(CommitId::parse("deadbeef").unwrap())
        );
        // the middle segment is not interpreted
        assert_eq!(
            commit_id_from_branch("spr/release-2.0/0a1b2c3d"),
            Some(CommitId::parse("0a1b2c3d").unwrap())
        );
    }

    #[test]
    fn branch_parse_rejects_everything_else() {
        assert_eq!(commit_id_from_branch("main"), None);
        assert_eq!(commit_id_from_branch("spr/main"), None);
        assert_eq!(commit_id_from_branch("spr/main/deadbeef/extra"), None);
        assert_eq!(commit_id_from_branch("other/main/deadbeef"), None);
        assert_eq!(commit_id_from_branch("spr/main/nothexxx"), None);
        assert_eq!(commit_id_from_branch("spr/main/deadbee"), None);
        assert_eq!(commit_id_from_branch(""), None);
    }
}
