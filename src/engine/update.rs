//! The reconciler: realizes a selection (or the whole stack) as remote
//! branches and pull requests.

use crate::branch;
use crate::concurrent::run_all;
use crate::error::{Error, Result};
use crate::git::{self, tagger};
use crate::github::{body, CreatePr, UpdatePr};
use crate::persist;
use crate::selector;
use crate::state::State;
use crate::types::{Commit, LocalCommit, PullRequest, Sha};

use super::Engine;

impl Engine {
    /// `update <selector>`: reconcile the selected PR sets.
    pub async fn update_pr_sets(&self, selector_str: &str) -> Result<()> {
        self.reject_managed_branch()?;
        self.tag_commits().await?;
        self.fetch_prune().await?;

        let mut persisted = persist::load(&self.state_path)?;
        let mut state = self.read_state(&mut persisted).await?;

        let selection = selector::evaluate(&state.local_commits, selector_str)?;
        state.apply_selection(&selection);

        // Reordered commits need their PR chain flattened onto the default
        // branch before any branch is overwritten; otherwise pushing one
        // branch can make the forge auto-close the PR that targets it.
        for set in state.out_of_order_sets() {
            self.reparent_set_to_default(&state, set).await?;
        }

        self.close_orphans(&mut state).await?;
        self.publish_mutated_sets(&state).await?;
        self.create_missing_prs(&mut state).await?;
        self.finalize_mutated_sets(&state).await?;

        persisted.set_pr_sets(&self.config.repo_key(), state.pr_set_map());
        persist::save(&self.state_path, &persisted)?;

        self.status_pr_sets().await
    }

    pub(crate) async fn tag_commits(&self) -> Result<()> {
        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        let branch = self.config.repo.github_branch.clone();
        tokio::task::spawn_blocking(move || tagger::tag_commits(&root, &remote, &branch))
            .await
            .map_err(|e| Error::State(format!("task join: {}", e)))?
    }

    /// Phase 4 remedy: point every PR of the set at the default branch,
    /// converting the chain into a fan.
    async fn reparent_set_to_default(&self, state: &State, set: usize) -> Result<()> {
        let mut commits = state.commits_by_pr_set(set);
        commits.reverse(); // oldest first
        let prs: Vec<&PullRequest> = commits.iter().filter_map(|c| c.pull_request.as_ref()).collect();

        let mut updates = Vec::new();
        for lc in &commits {
            let Some(pr) = &lc.pull_request else {
                continue;
            };
            updates.push(self.pr_update(&lc.commit, pr, &prs, Some(self.default_branch().to_string()))?);
        }

        run_all(
            self.synchronous,
            updates
                .into_iter()
                .map(|u| self.forge.update_pull_request(u))
                .collect(),
        )
        .await?;
        Ok(())
    }

    /// Phase 3: comment, close and delete the branch of every orphaned PR.
    pub(crate) async fn close_orphans(&self, state: &mut State) -> Result<()> {
        let orphans = std::mem::take(&mut state.orphaned_prs);
        run_all(
            self.synchronous,
            orphans
                .into_iter()
                .map(|pr| self.close_and_delete(pr, "Closing pull request: commit has gone away"))
                .collect(),
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn close_and_delete(&self, pr: PullRequest, comment: &str) -> Result<()> {
        self.forge.comment_pull_request(pr.number, comment).await?;
        self.forge.close_pull_request(pr.number).await?;
        self.delete_remote_branch(pr.from_branch).await
    }

    pub(crate) async fn delete_remote_branch(&self, branch_name: String) -> Result<()> {
        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        tokio::task::spawn_blocking(move || branch::delete_remote(&root, &remote, &branch_name))
            .await
            .map_err(|e| Error::State(format!("task join: {}", e)))?
    }

    /// Phase 5: rebuild the branches of every mutated set, oldest first, each
    /// branch parented on its predecessor. A conflict rolls back every branch
    /// created by this call.
    async fn publish_mutated_sets(&self, state: &State) -> Result<()> {
        let mut created: Vec<String> = Vec::new();

        for &set in &state.mutated_pr_sets {
            let mut commits = state.commits_by_pr_set(set);
            commits.reverse(); // oldest first

            let mut parent = self.default_branch().to_string();
            for lc in commits {
                let Some(id) = &lc.commit.commit_id else {
                    continue;
                };
                let branch_name = self.config.branch_name_from_commit_id(id);
                let result = self
                    .publish_branch(branch_name.clone(), parent.clone(), lc.commit.hash.clone())
                    .await;

                match result {
                    Ok(()) => {
                        created.push(branch_name.clone());
                        parent = branch_name;
                    }
                    Err(err) => {
                        // Roll back branches created in this call; earlier
                        // phases (orphan closure) are not reverted.
                        for branch_name in &created {
                            let _ = self.delete_remote_branch(branch_name.clone()).await;
                        }
                        return Err(match err {
                            Error::CherryPickConflict { sha, .. } => {
                                Error::IntermediateCommitMissing { sha }
                            }
                            other => other,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn publish_branch(&self, branch_name: String, parent: String, sha: Sha) -> Result<()> {
        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        tokio::task::spawn_blocking(move || {
            branch::publish(&root, &remote, &branch_name, &parent, &sha)
        })
        .await
        .map_err(|e| Error::State(format!("task join: {}", e)))?
    }

    /// Phase 6: create PRs for commits that lack one.
    ///
    /// Creation is serialized within a set, oldest first, so PR numbers read
    /// bottom-up; sets are independent. New PRs are created unlinked (the
    /// stack footer needs every PR of the set to exist) and wired up in the
    /// finalize phase.
    async fn create_missing_prs(&self, state: &mut State) -> Result<()> {
        let mut set_jobs = Vec::new();
        for &set in &state.mutated_pr_sets {
            let mut commits = state.commits_by_pr_set(set);
            commits.reverse(); // oldest first

            let mut jobs = Vec::new();
            let mut parent = self.default_branch().to_string();
            for lc in commits {
                let Some(id) = &lc.commit.commit_id else {
                    continue;
                };
                let branch_name = self.config.branch_name_from_commit_id(id);
                if lc.pull_request.is_none() {
                    jobs.push((
                        lc.index,
                        CreatePr {
                            head: branch_name.clone(),
                            base: parent.clone(),
                            title: lc.commit.subject.clone(),
                            body: self.pr_body(&lc.commit, &[], None)?,
                            draft: self.config.user.create_draft_prs,
                        },
                    ));
                }
                parent = branch_name;
            }
            if !jobs.is_empty() {
                set_jobs.push(jobs);
            }
        }

        let futures = set_jobs
            .into_iter()
            .map(|jobs| async move {
                let mut created = Vec::new();
                for (index, input) in jobs {
                    created.push((index, self.forge.create_pull_request(input).await?));
                }
                Ok(created)
            })
            .collect();

        for (index, pr) in run_all(self.synchronous, futures).await?.into_iter().flatten() {
            if let Some(lc) = state.local_commits.iter_mut().find(|lc| lc.index == index) {
                lc.pull_request = Some(pr);
            }
        }
        Ok(())
    }

    /// Phase 7: refresh title, body, base and stack footer of every member of
    /// every mutated set. All updates may run concurrently: every PR already
    /// exists.
    async fn finalize_mutated_sets(&self, state: &State) -> Result<()> {
        let mut updates = Vec::new();
        for &set in &state.mutated_pr_sets {
            let mut commits = state.commits_by_pr_set(set);
            commits.reverse(); // oldest first
            let prs: Vec<&PullRequest> =
                commits.iter().filter_map(|c| c.pull_request.as_ref()).collect();

            let mut parent = self.default_branch().to_string();
            for lc in &commits {
                let Some(id) = &lc.commit.commit_id else {
                    continue;
                };
                let Some(pr) = &lc.pull_request else {
                    continue;
                };
                updates.push(self.pr_update(&lc.commit, pr, &prs, Some(parent.clone()))?);
                parent = self.config.branch_name_from_commit_id(id);
            }
        }

        run_all(
            self.synchronous,
            updates
                .into_iter()
                .map(|u| self.forge.update_pull_request(u))
                .collect(),
        )
        .await?;
        Ok(())
    }

    /// Builds the update payload for one PR: regenerated title and body, and
    /// the requested base (suppressed while the PR sits in the merge queue).
    pub(crate) fn pr_update(
        &self,
        commit: &Commit,
        pr: &PullRequest,
        stack: &[&PullRequest],
        base: Option<String>,
    ) -> Result<UpdatePr> {
        let (title, body) = if self.config.user.preserve_title_and_body {
            (pr.title.clone(), pr.body.clone())
        } else {
            (
                commit.subject.clone(),
                self.pr_body(commit, stack, Some(&pr.body))?,
            )
        };
        Ok(UpdatePr {
            number: pr.number,
            title,
            body,
            base: if pr.in_queue { None } else { base },
        })
    }

    /// Builds a PR body: commit body plus stack footer, spliced into the PR
    /// template when one is configured.
    pub(crate) fn pr_body(
        &self,
        commit: &Commit,
        stack: &[&PullRequest],
        existing_pr_body: Option<&str>,
    ) -> Result<String> {
        let body = body::format_body(commit, stack, self.config.repo.show_pr_titles_in_stack);
        if self.config.repo.pr_template_path.is_empty() {
            return Ok(body);
        }
        let path = self.repo_root.join(&self.config.repo.pr_template_path);
        let template = std::fs::read_to_string(&path)
            .map_err(|e| Error::PrTemplate(format!("reading {}: {}", path.display(), e)))?;
        body::insert_body_into_template(
            &body,
            &template,
            existing_pr_body,
            &self.config.repo.pr_template_insert_start,
            &self.config.repo.pr_template_insert_end,
        )
    }

    /// `update` without a selector: the whole-stack flow.
    ///
    /// Every non-WIP commit gets a branch and a PR, chained bottom-up.
    /// Reordered stacks are flattened onto the default branch first; vanished
    /// commits get their PRs closed.
    pub async fn update_pull_requests(
        &self,
        reviewers: &[String],
        count: Option<usize>,
        no_rebase: bool,
    ) -> Result<()> {
        self.reject_managed_branch()?;
        self.tag_commits().await?;
        self.fetch(no_rebase).await?;

        let snapshot = self.forge.pull_requests_and_status().await?;
        let mut local: Vec<LocalCommit> = self.local_commits().await?;
        local.reverse(); // oldest first for the walk below

        let mut local = align_local_commits(local, snapshot.prs.values());
        for lc in &mut local {
            if let Some(id) = &lc.commit.commit_id {
                lc.pull_request = snapshot.prs.get(id).cloned();
            }
        }

        // Close PRs whose commits are gone.
        let mut live_prs = Vec::new();
        let mut orphaned = Vec::new();
        for pr in snapshot.prs.values() {
            let present = local.iter().any(|lc| {
                lc.commit.commit_id.as_ref() == pr.commit.commit_id.as_ref()
                    && pr.commit.commit_id.is_some()
            });
            if present {
                live_prs.push(pr.clone());
            } else {
                orphaned.push(pr.clone());
            }
        }
        run_all(
            self.synchronous,
            orphaned
                .into_iter()
                .map(|pr| self.close_and_delete(pr, "Closing pull request: commit has gone away"))
                .collect(),
        )
        .await?;

        // Reordered commits: flatten every PR onto the default branch first.
        let ordered_prs = sort_by_local_order(&live_prs, &local);
        if chain_broken(&ordered_prs, self.default_branch()) {
            let stack: Vec<&PullRequest> = ordered_prs.iter().copied().collect();
            let mut updates = Vec::new();
            for pr in &ordered_prs {
                updates.push(self.pr_update(
                    &pr.commit,
                    pr,
                    &stack,
                    Some(self.default_branch().to_string()),
                )?);
            }
            run_all(
                self.synchronous,
                updates
                    .into_iter()
                    .map(|u| self.forge.update_pull_request(u))
                    .collect(),
            )
            .await?;
        }

        self.sync_branches(&local).await?;

        // Create missing PRs bottom-up; queue updates for the rest.
        let mut all_prs: Vec<PullRequest> = live_prs.clone();
        let mut update_queue: Vec<(PullRequest, Commit, Option<Commit>)> = Vec::new();
        let mut assignable: Option<Vec<String>> = None;
        let mut prev: Option<Commit> = None;
        for (walked, lc) in local.iter().enumerate() {
            if lc.commit.wip {
                break;
            }
            let Some(id) = &lc.commit.commit_id else {
                continue;
            };
            let existing = all_prs
                .iter()
                .find(|pr| pr.commit.commit_id.as_ref() == Some(id))
                .cloned();
            match existing {
                Some(mut pr) => {
                    pr.commit = lc.commit.clone();
                    update_queue.push((pr, lc.commit.clone(), prev.clone()));
                    if !reviewers.is_empty() {
                        println!("warning: not updating reviewers for existing pull requests");
                    }
                }
                None => {
                    let base = match &prev {
                        Some(prev) => self
                            .config
                            .branch_name_from_commit_id(prev.commit_id.as_ref().expect("tagged")),
                        None => self.default_branch().to_string(),
                    };
                    let pr = self
                        .forge
                        .create_pull_request(CreatePr {
                            head: self.config.branch_name_from_commit_id(id),
                            base,
                            title: lc.commit.subject.clone(),
                            body: self.pr_body(&lc.commit, &[], None)?,
                            draft: self.config.user.create_draft_prs,
                        })
                        .await?;
                    if !reviewers.is_empty() {
                        if assignable.is_none() {
                            let fetched: Vec<String> = self
                                .forge
                                .assignable_users()
                                .await?
                                .into_iter()
                                .map(|u| u.login)
                                .collect();
                            assignable = Some(fetched);
                        }
                        let users = assignable.as_deref().unwrap_or_default();
                        let resolved = resolve_reviewers(reviewers, users)?;
                        self.forge.request_reviewers(pr.number, resolved).await?;
                    }
                    update_queue.push((pr.clone(), lc.commit.clone(), prev.clone()));
                    all_prs.push(pr);
                }
            }
            prev = Some(lc.commit.clone());
            if let Some(count) = count {
                if walked + 1 == count {
                    break;
                }
            }
        }

        // Refresh every queued PR with the stack footer and chained base.
        let sorted = sort_by_local_order(&all_prs, &local);
        let stack: Vec<&PullRequest> = sorted.iter().copied().collect();
        let mut updates = Vec::new();
        for (pr, commit, prev) in &update_queue {
            let base = match prev {
                Some(prev) => self
                    .config
                    .branch_name_from_commit_id(prev.commit_id.as_ref().expect("tagged")),
                None => self.default_branch().to_string(),
            };
            updates.push(self.pr_update(commit, pr, &stack, Some(base))?);
        }
        run_all(
            self.synchronous,
            updates
                .into_iter()
                .map(|u| self.forge.update_pull_request(u))
                .collect(),
        )
        .await?;

        self.status_pull_requests().await
    }

    /// Fetch and (unless disabled) rebase the working branch onto the remote
    /// default branch.
    async fn fetch(&self, no_rebase: bool) -> Result<()> {
        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        let branch = self.config.repo.github_branch.clone();
        let force_tags = self.config.repo.force_fetch_tags;
        let skip_rebase =
            no_rebase || std::env::var("SPR_NOREBASE").map(|v| v == "true").unwrap_or(false);

        tokio::task::spawn_blocking(move || -> Result<()> {
            if force_tags {
                git::run_git(&root, &["fetch", "--tags", "--force", &remote])?;
            } else {
                git::run_git(&root, &["fetch", &remote])?;
            }
            if !skip_rebase {
                let upstream = format!("{}/{}", remote, branch);
                let output = git::git_user_command(&root)
                    .args(["rebase", &upstream, "--autostash"])
                    .output()
                    .map_err(git::GitError::Io)?;
                if !output.status.success() {
                    return Err(Error::Rebase(
                        String::from_utf8_lossy(&output.stderr).to_string(),
                    ));
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::State(format!("task join: {}", e)))?
    }

    /// Pushes the branches of commits whose remote copy is missing or stale,
    /// in one atomic force-push (or one push per branch when configured).
    async fn sync_branches(&self, local: &[LocalCommit]) -> Result<()> {
        let mut updates = Vec::new();
        for lc in local {
            if lc.commit.wip {
                break;
            }
            let Some(id) = &lc.commit.commit_id else {
                continue;
            };
            let stale = match &lc.pull_request {
                Some(pr) => pr.commit.hash != lc.commit.hash,
                None => true,
            };
            if stale {
                updates.push(branch::RefUpdate {
                    sha: lc.commit.hash.clone(),
                    branch: self.config.branch_name_from_commit_id(id),
                });
            }
        }

        if updates.is_empty() {
            return Ok(());
        }

        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        let individually = self.config.repo.branch_push_individually;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let stash = needs_stash(&root)?;
            if stash {
                git::run_git(&root, &["stash"])?;
            }
            let result = branch::push_batch(&root, &remote, &updates, individually);
            if stash {
                git::run_git(&root, &["stash", "pop"])?;
            }
            result
        })
        .await
        .map_err(|e| Error::State(format!("task join: {}", e)))?
    }
}

/// Resolves requested reviewer logins (case-insensitively) against the
/// repository's assignable users.
fn resolve_reviewers(requested: &[String], assignable: &[String]) -> Result<Vec<String>> {
    let mut resolved = Vec::new();
    for login in requested {
        match assignable.iter().find(|u| u.eq_ignore_ascii_case(login)) {
            Some(found) => resolved.push(found.clone()),
            None => {
                return Err(Error::ConfigInvalid(format!(
                    "unable to add reviewer, user {:?} not found",
                    login
                )))
            }
        }
    }
    Ok(resolved)
}

fn needs_stash(root: &std::path::Path) -> Result<bool> {
    let status = git::run_git_stdout(root, &["status", "--porcelain", "--untracked-files=no"])?;
    Ok(!status.is_empty())
}

/// Drops local commits that are interior commits of some PR branch (present
/// remotely but not as any PR's top commit); those are someone else's
/// dependency commits riding along after a sync.
fn align_local_commits<'a>(
    local: Vec<LocalCommit>,
    prs: impl Iterator<Item = &'a PullRequest>,
) -> Vec<LocalCommit> {
    use std::collections::HashMap;
    let mut remote: HashMap<&crate::types::CommitId, bool> = HashMap::new();
    for pr in prs {
        for c in &pr.commits {
            if let Some(id) = &c.commit_id {
                remote.insert(id, Some(id) == pr.commit.commit_id.as_ref());
            }
        }
    }

    local
        .into_iter()
        .filter(|lc| match &lc.commit.commit_id {
            Some(id) => remote.get(id).copied().unwrap_or(true),
            None => true,
        })
        .collect()
}

/// Orders PRs to match the local commit order (oldest first), skipping WIP
/// commits and commits without PRs.
fn sort_by_local_order<'a>(prs: &'a [PullRequest], local: &[LocalCommit]) -> Vec<&'a PullRequest> {
    let mut sorted = Vec::new();
    for lc in local {
        if lc.commit.wip {
            continue;
        }
        if let Some(id) = &lc.commit.commit_id {
            if let Some(pr) = prs.iter().find(|pr| pr.commit.commit_id.as_ref() == Some(id)) {
                sorted.push(pr);
            }
        }
    }
    sorted
}

/// Whether the PR chain on the forge no longer matches the local order.
fn chain_broken(ordered_prs: &[&PullRequest], default_branch: &str) -> bool {
    let mut expected = default_branch.to_string();
    for pr in ordered_prs {
        if pr.to_branch != expected {
            return true;
        }
        expected = pr.from_branch.clone();
    }
    false
}
