//! Pull request records and merge-status bits.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::commit::Commit;
use super::ids::PrNumber;

/// Aggregate state of a pull request's required checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// All checks passed, or the repository requires none.
    Pass,
    /// At least one check is still running or expected.
    Pending,
    /// At least one check failed or errored.
    Fail,
    /// The rollup was not reported.
    Unknown,
}

/// The four merge-readiness bits of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStatus {
    pub checks: CheckStatus,
    pub approved: bool,
    pub no_conflicts: bool,
    /// Derived bit: every earlier PR in the same set satisfies its gating
    /// requirements and is not WIP, so this PR could land without waiting.
    pub stacked: bool,
}

impl MergeStatus {
    pub fn new() -> Self {
        MergeStatus {
            checks: CheckStatus::Unknown,
            approved: false,
            no_conflicts: false,
            stacked: false,
        }
    }
}

impl Default for MergeStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MergeStatus {
    /// Renders the four bits as `[✔✗·?]`-style cells: checks, approval,
    /// conflicts, stacked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let checks = match self.checks {
            CheckStatus::Pass => '✔',
            CheckStatus::Pending => '·',
            CheckStatus::Fail => '✗',
            CheckStatus::Unknown => '?',
        };
        let bit = |b: bool| if b { '✔' } else { '✗' };
        write!(
            f,
            "[{}{}{}{}]",
            checks,
            bit(self.approved),
            bit(self.no_conflicts),
            bit(self.stacked)
        )
    }
}

/// An open pull request on the forge, as seen by the remote graph reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// GraphQL node id, used for mutations.
    pub id: String,

    pub number: PrNumber,

    /// Head ref name, always `spr/<target>/<commit-id>` for managed PRs.
    pub from_branch: String,

    /// Base ref name: the previous commit's branch, or the default branch for
    /// the oldest commit of a set.
    pub to_branch: String,

    pub title: String,
    pub body: String,

    /// The top commit of the PR branch as the forge knows it.
    pub commit: Commit,

    /// All commits on the PR branch, oldest first.
    pub commits: Vec<Commit>,

    pub merge_status: MergeStatus,

    /// True when the PR sits in the repository's merge queue.
    pub in_queue: bool,
}

impl PullRequest {
    /// Whether this PR meets its own gating requirements (not considering
    /// position in a stack).
    pub fn ready(&self, require_checks: bool, require_approval: bool) -> bool {
        if !self.merge_status.no_conflicts {
            return false;
        }
        if require_checks && self.merge_status.checks != CheckStatus::Pass {
            return false;
        }
        if require_approval && !self.merge_status.approved {
            return false;
        }
        true
    }
}
