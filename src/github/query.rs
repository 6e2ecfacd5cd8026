//! The batched status query and its wire mapping.
//!
//! One GraphQL round-trip fetches everything reconciliation needs: the
//! viewer's open PRs with refs, mergeability, review decision, merge-queue
//! entry and per-branch commits, plus the repository node id. The mapping
//! rules here are the frozen wire behavior:
//!
//! - checks rollup: `SUCCESS` → pass, `PENDING`/`EXPECTED` → pending,
//!   `ERROR`/`FAILURE` → fail, empty/absent → pass (the forge reports
//!   nothing when no checks are required)
//! - review decision: `APPROVED` → approved, anything else → not approved
//! - mergeable: `MERGEABLE` → no conflicts, `CONFLICTING`/`UNKNOWN` → false

use serde::Deserialize;

use crate::git::stack::{commit_id_from_message, is_wip};
use crate::types::{CheckStatus, Commit, CommitId, MergeStatus, PrNumber, PullRequest, Sha};

use super::{commit_id_from_branch, RemoteSnapshot};

/// The one batched query.
pub const PULL_REQUESTS_AND_STATUS: &str = r#"
query PullRequestsAndStatus($owner: String!, $name: String!) {
  viewer {
    login
    pullRequests(first: 100, states: [OPEN]) {
      nodes {
        id
        number
        title
        body
        baseRefName
        headRefName
        mergeable
        reviewDecision
        mergeQueueEntry { id }
        commits(first: 100) {
          nodes {
            commit {
              oid
              messageHeadline
              messageBody
              statusCheckRollup { state }
            }
          }
        }
      }
    }
  }
  repository(owner: $owner, name: $name) {
    id
  }
}
"#;

#[derive(Debug, Deserialize)]
pub struct QueryData {
    pub viewer: Viewer,
    pub repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
pub struct Viewer {
    pub login: String,
    #[serde(rename = "pullRequests")]
    pub pull_requests: PrConnection,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryNode {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PrConnection {
    #[serde(default)]
    pub nodes: Option<Vec<PrNode>>,
}

#[derive(Debug, Deserialize)]
pub struct PrNode {
    pub id: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "baseRefName")]
    pub base_ref_name: String,
    #[serde(rename = "headRefName")]
    pub head_ref_name: String,
    #[serde(default)]
    pub mergeable: Option<String>,
    #[serde(rename = "reviewDecision", default)]
    pub review_decision: Option<String>,
    #[serde(rename = "mergeQueueEntry", default)]
    pub merge_queue_entry: Option<MergeQueueEntry>,
    pub commits: CommitConnection,
}

#[derive(Debug, Deserialize)]
pub struct MergeQueueEntry {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommitConnection {
    #[serde(default)]
    pub nodes: Option<Vec<CommitNodeWrap>>,
}

#[derive(Debug, Deserialize)]
pub struct CommitNodeWrap {
    pub commit: CommitNode,
}

#[derive(Debug, Deserialize)]
pub struct CommitNode {
    pub oid: String,
    #[serde(rename = "messageHeadline")]
    pub message_headline: String,
    #[serde(rename = "messageBody", default)]
    pub message_body: String,
    #[serde(rename = "statusCheckRollup", default)]
    pub status_check_rollup: Option<Rollup>,
}

#[derive(Debug, Deserialize)]
pub struct Rollup {
    #[serde(default)]
    pub state: Option<String>,
}

/// Maps a status-check rollup state to the four-valued check status.
pub fn check_status(state: Option<&str>) -> CheckStatus {
    match state {
        None | Some("") | Some("SUCCESS") => CheckStatus::Pass,
        Some("PENDING") | Some("EXPECTED") => CheckStatus::Pending,
        Some("ERROR") | Some("FAILURE") => CheckStatus::Fail,
        Some(_) => CheckStatus::Unknown,
    }
}

pub fn review_approved(decision: Option<&str>) -> bool {
    decision == Some("APPROVED")
}

pub fn no_conflicts(mergeable: Option<&str>) -> bool {
    // UNKNOWN is pessimistically treated as conflicting.
    mergeable == Some("MERGEABLE")
}

/// Turns the raw query data into the snapshot the assembler consumes: PRs
/// whose head ref parses as a core-managed branch, indexed by commit-id.
pub fn build_snapshot(data: QueryData) -> RemoteSnapshot {
    let mut snapshot = RemoteSnapshot {
        repository_id: data.repository.map(|r| r.id).unwrap_or_default(),
        viewer_login: data.viewer.login,
        prs: Default::default(),
    };

    for node in data.viewer.pull_requests.nodes.unwrap_or_default() {
        let Some(commit_id) = commit_id_from_branch(&node.head_ref_name) else {
            continue;
        };
        if let Some(pr) = pr_from_node(node, commit_id.clone()) {
            snapshot.prs.insert(commit_id, pr);
        }
    }

    snapshot
}

fn pr_from_node(node: PrNode, commit_id: CommitId) -> Option<PullRequest> {
    // Commits arrive oldest first; the newest is the commit this PR
    // represents.
    let nodes = node.commits.nodes.unwrap_or_default();
    let commits: Vec<Commit> = nodes
        .iter()
        .filter_map(|wrap| commit_from_node(&wrap.commit))
        .collect();

    let top = nodes.last()?;
    let top_commit = Commit {
        commit_id: Some(commit_id),
        hash: Sha::parse(&top.commit.oid).ok()?,
        subject: top.commit.message_headline.clone(),
        body: top.commit.message_body.clone(),
        wip: is_wip(&top.commit.message_headline),
    };

    let merge_status = MergeStatus {
        checks: check_status(
            top.commit
                .status_check_rollup
                .as_ref()
                .and_then(|r| r.state.as_deref()),
        ),
        approved: review_approved(node.review_decision.as_deref()),
        no_conflicts: no_conflicts(node.mergeable.as_deref()),
        stacked: false,
    };

    Some(PullRequest {
        id: node.id,
        number: PrNumber(node.number),
        from_branch: node.head_ref_name,
        to_branch: node.base_ref_name,
        title: node.title,
        body: node.body,
        commit: top_commit,
        commits,
        merge_status,
        in_queue: node
            .merge_queue_entry
            .as_ref()
            .and_then(|e| e.id.as_ref())
            .is_some(),
    })
}

/// A commit listed on a PR branch; only commits carrying a trailer are kept
/// (those are the ones that can be matched against local commits).
fn commit_from_node(node: &CommitNode) -> Option<Commit> {
    let commit_id = commit_id_from_message(&node.message_body)?;
    Some(Commit {
        commit_id: Some(commit_id),
        hash: Sha::parse(&node.oid).ok()?,
        subject: node.message_headline.clone(),
        body: node.message_body.clone(),
        wip: is_wip(&node.message_headline),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod mappings {
        use super::*;

        #[test]
        fn check_rollup_states() {
            assert_eq!(check_status(Some("SUCCESS")), CheckStatus::Pass);
            assert_eq!(check_status(Some("PENDING")), CheckStatus::Pending);
            assert_eq!(check_status(Some("EXPECTED")), CheckStatus::Pending);
            assert_eq!(check_status(Some("ERROR")), CheckStatus::Fail);
            assert_eq!(check_status(Some("FAILURE")), CheckStatus::Fail);
            // no required checks reports nothing, which counts as passing
            assert_eq!(check_status(None), CheckStatus::Pass);
            assert_eq!(check_status(Some("")), CheckStatus::Pass);
            assert_eq!(check_status(Some("SOMETHING_NEW")), CheckStatus::Unknown);
        }

        #[test]
        fn review_decision() {
            assert!(review_approved(Some("APPROVED")));
            assert!(!review_approved(Some("CHANGES_REQUESTED")));
            assert!(!review_approved(Some("REVIEW_REQUIRED")));
            assert!(!review_approved(None));
        }

        #[test]
        fn mergeable_is_pessimistic() {
            assert!(no_conflicts(Some("MERGEABLE")));
            assert!(!no_conflicts(Some("CONFLICTING")));
            assert!(!no_conflicts(Some("UNKNOWN")));
            assert!(!no_conflicts(None));
        }
    }

    mod snapshot {
        use super::*;

        fn data(json: serde_json::Value) -> QueryData {
            serde_json::from_value(json).unwrap()
        }

        fn sample() -> serde_json::Value {
            serde_json::json!({
                "viewer": {
                    "login": "octocat",
                    "pullRequests": {
                        "nodes": [
                            {
                                "id": "PR_1",
                                "number": 11,
                                "title": "Feature 1",
                                "body": "",
                                "baseRefName": "main",
                                "headRefName": "spr/main/aaaa1111",
                                "mergeable": "MERGEABLE",
                                "reviewDecision": "APPROVED",
                                "mergeQueueEntry": null,
                                "commits": {
                                    "nodes": [
                                        {
                                            "commit": {
                                                "oid": "1111111111111111111111111111111111111111",
                                                "messageHeadline": "Feature 1",
                                                "messageBody": "commit-id:aaaa1111",
                                                "statusCheckRollup": { "state": "SUCCESS" }
                                            }
                                        }
                                    ]
                                }
                            },
                            {
                                "id": "PR_2",
                                "number": 12,
                                "title": "Unrelated",
                                "body": "",
                                "baseRefName": "main",
                                "headRefName": "feature/manual-branch",
                                "mergeable": "MERGEABLE",
                                "reviewDecision": null,
                                "mergeQueueEntry": null,
                                "commits": { "nodes": [] }
                            }
                        ]
                    }
                },
                "repository": { "id": "R_repo" }
            })
        }

        #[test]
        fn indexes_managed_prs_by_commit_id() {
            let snapshot = build_snapshot(data(sample()));
            assert_eq!(snapshot.repository_id, "R_repo");
            assert_eq!(snapshot.viewer_login, "octocat");
            assert_eq!(snapshot.prs.len(), 1);

            let pr = &snapshot.prs[&CommitId::parse("aaaa1111").unwrap()];
            assert_eq!(pr.number, PrNumber(11));
            assert_eq!(pr.from_branch, "spr/main/aaaa1111");
            assert_eq!(pr.merge_status.checks, CheckStatus::Pass);
            assert!(pr.merge_status.approved);
            assert!(pr.merge_status.no_conflicts);
            assert!(!pr.merge_status.stacked);
            assert!(!pr.in_queue);
        }

        #[test]
        fn non_managed_head_refs_are_ignored() {
            let snapshot = build_snapshot(data(sample()));
            assert!(snapshot
                .prs
                .values()
                .all(|pr| pr.from_branch.starts_with("spr/")));
        }

        #[test]
        fn top_commit_is_the_newest_on_the_branch() {
            let mut json = sample();
            json["viewer"]["pullRequests"]["nodes"][0]["commits"]["nodes"] = serde_json::json!([
                {
                    "commit": {
                        "oid": "1111111111111111111111111111111111111111",
                        "messageHeadline": "Older",
                        "messageBody": "commit-id:bbbb2222",
                        "statusCheckRollup": null
                    }
                },
                {
                    "commit": {
                        "oid": "2222222222222222222222222222222222222222",
                        "messageHeadline": "Newer",
                        "messageBody": "commit-id:aaaa1111",
                        "statusCheckRollup": { "state": "PENDING" }
                    }
                }
            ]);
            let snapshot = build_snapshot(data(json));
            let pr = &snapshot.prs[&CommitId::parse("aaaa1111").unwrap()];
            assert_eq!(pr.commit.subject, "Newer");
            assert_eq!(pr.merge_status.checks, CheckStatus::Pending);
            assert_eq!(pr.commits.len(), 2);
            assert_eq!(pr.commits[0].subject, "Older");
        }

        #[test]
        fn merge_queue_entry_sets_in_queue() {
            let mut json = sample();
            json["viewer"]["pullRequests"]["nodes"][0]["mergeQueueEntry"] =
                serde_json::json!({ "id": "MQE_1" });
            let snapshot = build_snapshot(data(json));
            let pr = &snapshot.prs[&CommitId::parse("aaaa1111").unwrap()];
            assert!(pr.in_queue);
        }
    }
}
