//! Core domain types: identifiers, commits, and pull requests.

pub mod commit;
pub mod ids;
pub mod pr;

pub use commit::{Commit, LocalCommit};
pub use ids::{CommitId, PrNumber, RepoId, Sha};
pub use pr::{CheckStatus, MergeStatus, PullRequest};
