//! Octocrab-backed [`Forge`] implementation scoped to one repository.

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Deserialize;

use crate::config::MergeMethod;
use crate::error::{Error, Result};
use crate::types::{CheckStatus, MergeStatus, PrNumber, PullRequest, RepoId, Sha};

use super::{query, CreatePr, Forge, RemoteSnapshot, RepoAssignee, UpdatePr};

/// A GitHub client scoped to a specific repository.
pub struct GitHubClient {
    client: Octocrab,
    repo: RepoId,
    /// Echo every call to stdout (the `--verbose` flag).
    log_calls: bool,
}

impl GitHubClient {
    /// Builds a client for `host` authenticated with `token`.
    pub fn new(host: &str, token: String, repo: RepoId, log_calls: bool) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token);
        if !host.ends_with("github.com") {
            builder = builder
                .base_uri(format!("https://{}/api/v3", host))
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        let client = builder
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(GitHubClient {
            client,
            repo,
            log_calls,
        })
    }

    fn log(&self, line: impl AsRef<str>) {
        if self.log_calls {
            println!("> github {}", line.as_ref());
        }
    }

    async fn graphql(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let response: serde_json::Value = self
            .client
            .graphql(&payload)
            .await
            .map_err(Error::from_octocrab)?;

        if let Some(errors) = response.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let messages: Vec<String> = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .map(String::from)
                    .collect();
                return Err(Error::Transport(format!(
                    "graphql errors: {}",
                    messages.join("; ")
                )));
            }
        }

        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct AssigneeRecord {
    login: String,
}

#[async_trait]
impl Forge for GitHubClient {
    async fn pull_requests_and_status(&self) -> Result<RemoteSnapshot> {
        self.log("fetch pull requests");
        let payload = serde_json::json!({
            "query": query::PULL_REQUESTS_AND_STATUS,
            "variables": {
                "owner": self.repo.owner,
                "name": self.repo.repo,
            },
        });
        let response = self.graphql(payload).await?;
        let data = response
            .get("data")
            .cloned()
            .ok_or_else(|| Error::Transport("graphql response carried no data".into()))?;
        let data: query::QueryData =
            serde_json::from_value(data).map_err(|e| Error::Transport(e.to_string()))?;
        Ok(query::build_snapshot(data))
    }

    async fn create_pull_request(&self, input: CreatePr) -> Result<PullRequest> {
        let created = self
            .client
            .pulls(&self.repo.owner, &self.repo.repo)
            .create(&input.title, &input.head, &input.base)
            .body(&input.body)
            .draft(Some(input.draft))
            .send()
            .await
            .map_err(Error::from_octocrab)?;

        self.log(format!("create {} : {}", created.number, input.title));

        // The head SHA is refreshed by the next status query; a placeholder
        // keeps the freshly created record usable for chaining.
        let hash = Sha::parse("0".repeat(40)).expect("static sha");

        Ok(PullRequest {
            id: created.node_id.clone().unwrap_or_default(),
            number: PrNumber(created.number),
            from_branch: input.head.clone(),
            to_branch: input.base,
            title: input.title.clone(),
            body: input.body,
            commit: crate::types::Commit {
                commit_id: super::commit_id_from_branch(&input.head),
                hash,
                subject: input.title,
                body: String::new(),
                wip: false,
            },
            commits: vec![],
            merge_status: MergeStatus {
                checks: CheckStatus::Unknown,
                approved: false,
                no_conflicts: false,
                stacked: false,
            },
            in_queue: false,
        })
    }

    async fn update_pull_request(&self, input: UpdatePr) -> Result<()> {
        self.log(format!("update {} : {}", input.number, input.title));
        let handler = self.client.pulls(&self.repo.owner, &self.repo.repo);
        let mut update = handler
            .update(input.number.0)
            .title(&input.title)
            .body(&input.body);
        if let Some(base) = &input.base {
            update = update.base(base);
        }
        update.send().await.map_err(Error::from_octocrab)?;
        Ok(())
    }

    async fn comment_pull_request(&self, number: PrNumber, body: &str) -> Result<()> {
        self.log(format!("comment {}", number));
        self.client
            .issues(&self.repo.owner, &self.repo.repo)
            .create_comment(number.0, body)
            .await
            .map_err(Error::from_octocrab)?;
        Ok(())
    }

    async fn close_pull_request(&self, number: PrNumber) -> Result<()> {
        self.log(format!("close {}", number));
        self.client
            .pulls(&self.repo.owner, &self.repo.repo)
            .update(number.0)
            .state(octocrab::params::pulls::State::Closed)
            .send()
            .await
            .map_err(Error::from_octocrab)?;
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr: &PullRequest,
        method: MergeMethod,
        merge_queue: bool,
        author_email: &str,
    ) -> Result<()> {
        self.log(format!("merge {} : {}", pr.number, pr.title));

        if merge_queue {
            // Repositories with a merge queue reject direct merges; the PR is
            // enqueued via auto-merge instead.
            let mutation = r#"
                mutation EnableAutoMerge($input: EnablePullRequestAutoMergeInput!) {
                  enablePullRequestAutoMerge(input: $input) {
                    clientMutationId
                  }
                }
            "#;
            let payload = serde_json::json!({
                "query": mutation,
                "variables": {
                    "input": {
                        "pullRequestId": pr.id,
                        "mergeMethod": graphql_merge_method(method),
                        "expectedHeadOid": pr.commit.hash.as_str(),
                        "authorEmail": author_email,
                    },
                },
            });
            self.graphql(payload).await?;
            return Ok(());
        }

        self.client
            .pulls(&self.repo.owner, &self.repo.repo)
            .merge(pr.number.0)
            .method(octocrab_merge_method(method))
            .sha(pr.commit.hash.as_str())
            .send()
            .await
            .map_err(Error::from_octocrab)?;
        Ok(())
    }

    async fn assignable_users(&self) -> Result<Vec<RepoAssignee>> {
        self.log("get assignable users");
        let records: Vec<AssigneeRecord> = self
            .client
            .get(
                format!("/repos/{}/{}/assignees", self.repo.owner, self.repo.repo),
                None::<&()>,
            )
            .await
            .map_err(Error::from_octocrab)?;
        Ok(records
            .into_iter()
            .map(|r| RepoAssignee { login: r.login })
            .collect())
    }

    async fn request_reviewers(&self, number: PrNumber, reviewers: Vec<String>) -> Result<()> {
        self.log(format!("add reviewers {} : {:?}", number, reviewers));
        self.client
            .pulls(&self.repo.owner, &self.repo.repo)
            .request_reviews(number.0, reviewers, Vec::new())
            .await
            .map_err(Error::from_octocrab)?;
        Ok(())
    }
}

fn octocrab_merge_method(method: MergeMethod) -> octocrab::params::pulls::MergeMethod {
    use octocrab::params::pulls::MergeMethod as M;
    match method {
        MergeMethod::Rebase => M::Rebase,
        MergeMethod::Squash => M::Squash,
        MergeMethod::Merge => M::Merge,
    }
}

fn graphql_merge_method(method: MergeMethod) -> &'static str {
    match method {
        MergeMethod::Rebase => "REBASE",
        MergeMethod::Squash => "SQUASH",
        MergeMethod::Merge => "MERGE",
    }
}
