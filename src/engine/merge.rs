//! The merge driver: lands one PR set (or the bottom of the classic stack)
//! without tripping the forge's side effects on the other, dependent PRs.

use crate::concurrent::run_all;
use crate::error::{Error, Result};
use crate::git;
use crate::persist;
use crate::selector;
use crate::types::{LocalCommit, PullRequest};

use super::Engine;

impl Engine {
    /// `merge s<k>`: lands PR set `k`.
    ///
    /// The newest PR's branch already contains every older commit of the set,
    /// so re-targeting that one PR at the default branch and merging it lands
    /// the whole set; the remaining PRs are closed.
    pub async fn merge_pr_set(&self, set_selector: &str) -> Result<()> {
        let set = selector::as_pr_set(set_selector)
            .ok_or_else(|| Error::BadSelector(format!("not a PR set: {:?}", set_selector)))?;

        let mut persisted = persist::load(&self.state_path)?;
        let state = self.read_state(&mut persisted).await?;

        let mut commits = state.commits_by_pr_set(set);
        if commits.is_empty() {
            return Err(Error::BadSelector(format!("PR set s{} does not exist", set)));
        }

        // Pre-merge gate: the newest commit of the set must be the one the
        // check last passed on (or the record must be the SKIP sentinel).
        if !self.config.repo.merge_check.is_empty() {
            let top = commits[0];
            if !persisted.merge_check_passes(&self.config.repo_key(), &top.commit.hash) {
                return Err(Error::MergeCheckRequired);
            }
        }

        commits.reverse(); // oldest first, so stack links stay stable
        let prs: Vec<&PullRequest> = commits
            .iter()
            .filter_map(|c| c.pull_request.as_ref())
            .collect();

        let Some(top) = commits.last().filter(|c| c.pull_request.is_some()) else {
            return Err(Error::BadSelector(format!(
                "PR set s{} has no open pull requests; run update first",
                set
            )));
        };
        let top_pr = top.pull_request.as_ref().expect("filtered above");

        // Re-target the top PR at the default branch, then merge it.
        let update = self.pr_update(
            &top.commit,
            top_pr,
            &prs,
            Some(self.default_branch().to_string()),
        )?;
        self.forge.update_pull_request(update).await?;

        let email = git::user_email(&self.repo_root)?;
        self.forge
            .merge_pull_request(
                top_pr,
                self.config.repo.merge_method,
                self.config.repo.merge_queue,
                &email,
            )
            .await?;
        println!("{} MERGED {}", top_pr.merge_status, top_pr.number);

        self.fetch_prune().await?;

        // Close the rest. Best-effort: a failure here leaves a PR open for
        // the next update to clean up.
        let rest: Vec<PullRequest> = commits
            .iter()
            .take(commits.len() - 1)
            .filter_map(|c| c.pull_request.clone())
            .collect();
        let results = run_all(
            self.synchronous,
            rest.into_iter()
                .map(|pr| async move {
                    let number = pr.number;
                    match self
                        .close_and_delete(pr, "Closing pull request: merged as part of its PR set")
                        .await
                    {
                        Ok(()) => Ok(Some(number)),
                        Err(err) => {
                            tracing::warn!(pr = %number, error = %err, "close after merge failed");
                            Ok(None)
                        }
                    }
                })
                .collect(),
        )
        .await?;
        for number in results.into_iter().flatten() {
            println!("CLOSED {}", number);
        }

        Ok(())
    }

    /// `merge` without a selector: lands the bottom contiguous run of the
    /// classic stack that is ready and stacked, capped by `--count`.
    pub async fn merge_pull_requests(&self, count: Option<usize>) -> Result<()> {
        let snapshot = self.forge.pull_requests_and_status().await?;
        let mut local: Vec<LocalCommit> = self.local_commits().await?;
        local.reverse(); // oldest first

        // The mergeable run: bottom-up while each PR meets its own gates.
        let mut run: Vec<(LocalCommit, PullRequest)> = Vec::new();
        for lc in &local {
            if lc.commit.wip {
                break;
            }
            let Some(id) = &lc.commit.commit_id else {
                break;
            };
            let Some(pr) = snapshot.prs.get(id) else {
                break;
            };
            if !pr.ready(
                self.config.repo.require_checks,
                self.config.repo.require_approval,
            ) {
                break;
            }
            run.push((lc.clone(), pr.clone()));
            if let Some(count) = count {
                if run.len() == count {
                    break;
                }
            }
        }

        if run.is_empty() {
            println!("no pull requests are ready to merge");
            return Ok(());
        }

        let prs: Vec<&PullRequest> = run.iter().map(|(_, pr)| pr).collect();
        let (top_commit, top_pr) = run.last().expect("run is non-empty");

        let update = self.pr_update(
            &top_commit.commit,
            top_pr,
            &prs,
            Some(self.default_branch().to_string()),
        )?;
        self.forge.update_pull_request(update).await?;

        let email = git::user_email(&self.repo_root)?;
        self.forge
            .merge_pull_request(
                top_pr,
                self.config.repo.merge_method,
                self.config.repo.merge_queue,
                &email,
            )
            .await?;
        println!("{} MERGED {}", top_pr.merge_status, top_pr.number);

        self.fetch_prune().await?;

        let rest: Vec<PullRequest> = run
            .iter()
            .take(run.len() - 1)
            .map(|(_, pr)| pr.clone())
            .collect();
        run_all(
            self.synchronous,
            rest.into_iter()
                .map(|pr| async move {
                    if let Err(err) = self
                        .close_and_delete(pr, "Closing pull request: merged as part of the stack")
                        .await
                    {
                        tracing::warn!(error = %err, "close after merge failed");
                    }
                    Ok(())
                })
                .collect(),
        )
        .await?;

        Ok(())
    }
}
