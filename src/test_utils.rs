//! Shared test fixtures: real git repositories with a bare origin, a
//! recording fake forge, and a pre-wired engine harness.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::{Config, MergeMethod};
use crate::engine::Engine;
use crate::error::Result;
use crate::github::{
    commit_id_from_branch, CreatePr, Forge, RemoteSnapshot, RepoAssignee, UpdatePr,
};
use crate::persist;
use crate::types::{
    CheckStatus, Commit, CommitId, MergeStatus, PrNumber, PullRequest, Sha,
};

/// A working repository with a local bare `origin`, default branch `main`.
pub struct TestRepo {
    _dir: TempDir,
    work: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("origin.git");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::create_dir_all(&work).unwrap();

        crate::git::run_git(dir.path(), &["init", "--bare", "-b", "main", "origin.git"]).unwrap();
        crate::git::run_git(dir.path(), &["init", "-b", "main", "work"]).unwrap();
        crate::git::run_git(&work, &["config", "user.name", "Test"]).unwrap();
        crate::git::run_git(&work, &["config", "user.email", "test@test.invalid"]).unwrap();
        crate::git::run_git(
            &work,
            &["remote", "add", "origin", bare.to_str().unwrap()],
        )
        .unwrap();

        TestRepo { _dir: dir, work }
    }

    pub fn root(&self) -> &Path {
        &self.work
    }

    /// Runs an arbitrary git command in the working repo.
    pub fn git(&self, args: &[&str]) {
        crate::git::run_git(&self.work, args).unwrap();
    }

    /// Rewrites local history to the given commits (in order, oldest first)
    /// on top of `origin/main`, preserving each commit's message and trailer.
    pub fn reorder(&self, shas: &[&Sha]) {
        self.git(&["reset", "--hard", "origin/main"]);
        for sha in shas {
            crate::git::git_user_command(&self.work)
                .args(["cherry-pick", sha.as_str()])
                .status()
                .unwrap();
        }
    }

    /// Commits a file change with the given message; returns the new HEAD.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) -> Sha {
        let path = self.work.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
        self.git(&["add", "."]);
        self.git(&["commit", "-m", message]);
        crate::git::rev_parse(&self.work, "HEAD").unwrap()
    }

    /// Commits a file change with a `commit-id` trailer already in place.
    pub fn commit_tagged(&self, name: &str, content: &str, subject: &str, id: &str) -> Sha {
        let message = format!("{}\n\ncommit-id:{}\n", subject, id);
        self.commit_file(name, content, &message)
    }

    /// Pushes the current branch to `origin/main` and tracks it.
    pub fn push_main(&self) {
        self.git(&["push", "-u", "origin", "HEAD:main"]);
    }

    pub fn remote_branch_exists(&self, branch: &str) -> bool {
        let output = crate::git::run_git_stdout(
            &self.work,
            &["ls-remote", "--heads", "origin", branch],
        )
        .unwrap_or_default();
        !output.is_empty()
    }

    /// The files present at the tip of a remote branch.
    pub fn remote_file_list(&self, branch: &str) -> Vec<String> {
        self.git(&["fetch", "origin"]);
        crate::git::run_git_stdout(
            &self.work,
            &[
                "ls-tree",
                "-r",
                "--name-only",
                &format!("refs/remotes/origin/{}", branch),
            ],
        )
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
    }
}

/// One recorded forge interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForgeCall {
    Snapshot,
    Create(String),
    Update(PrNumber),
    Comment(PrNumber),
    Close(PrNumber),
    Merge(PrNumber),
    AssignableUsers,
    RequestReviewers(PrNumber, Vec<String>),
}

#[derive(Default)]
struct MockInner {
    prs: HashMap<CommitId, PullRequest>,
    calls: Vec<ForgeCall>,
    creates: Vec<CreatePr>,
    updates: Vec<UpdatePr>,
    next_number: u64,
    assignable: Vec<RepoAssignee>,
}

/// An in-memory forge that records every call.
///
/// Created PRs become visible to subsequent snapshot queries; closed and
/// merged PRs drop out, the way the open-PR query behaves.
#[derive(Default)]
pub struct MockForge {
    inner: Mutex<MockInner>,
}

impl MockForge {
    pub fn new() -> Arc<Self> {
        Arc::new(MockForge {
            inner: Mutex::new(MockInner {
                next_number: 1,
                ..Default::default()
            }),
        })
    }

    pub fn add_pr(&self, pr: PullRequest) {
        let id = pr.commit.commit_id.clone().expect("fixture PRs carry ids");
        self.inner.lock().unwrap().prs.insert(id, pr);
    }

    pub fn remove_pr(&self, number: PrNumber) {
        self.inner
            .lock()
            .unwrap()
            .prs
            .retain(|_, pr| pr.number != number);
    }

    pub fn set_assignable(&self, logins: &[&str]) {
        self.inner.lock().unwrap().assignable = logins
            .iter()
            .map(|l| RepoAssignee {
                login: l.to_string(),
            })
            .collect();
    }

    pub fn calls(&self) -> Vec<ForgeCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn creates(&self) -> Vec<CreatePr> {
        self.inner.lock().unwrap().creates.clone()
    }

    pub fn updates(&self) -> Vec<UpdatePr> {
        self.inner.lock().unwrap().updates.clone()
    }

    pub fn clear_calls(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.clear();
        inner.creates.clear();
        inner.updates.clear();
    }
}

#[async_trait]
impl Forge for MockForge {
    async fn pull_requests_and_status(&self) -> Result<RemoteSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ForgeCall::Snapshot);
        Ok(RemoteSnapshot {
            repository_id: "R_test".into(),
            viewer_login: "tester".into(),
            prs: inner.prs.clone(),
        })
    }

    async fn create_pull_request(&self, input: CreatePr) -> Result<PullRequest> {
        let mut inner = self.inner.lock().unwrap();
        let number = inner.next_number;
        inner.next_number += 1;
        inner.calls.push(ForgeCall::Create(input.head.clone()));
        inner.creates.push(input.clone());

        let commit_id = commit_id_from_branch(&input.head);
        let pr = PullRequest {
            id: format!("PR_{}", number),
            number: PrNumber(number),
            from_branch: input.head.clone(),
            to_branch: input.base.clone(),
            title: input.title.clone(),
            body: input.body.clone(),
            commit: Commit {
                commit_id: commit_id.clone(),
                hash: Sha::parse(format!("{:040x}", 0xc0ffee + number)).unwrap(),
                subject: input.title,
                body: String::new(),
                wip: false,
            },
            commits: vec![],
            merge_status: MergeStatus {
                checks: CheckStatus::Pass,
                approved: true,
                no_conflicts: true,
                stacked: false,
            },
            in_queue: false,
        };
        if let Some(id) = commit_id {
            inner.prs.insert(id, pr.clone());
        }
        Ok(pr)
    }

    async fn update_pull_request(&self, input: UpdatePr) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ForgeCall::Update(input.number));
        inner.updates.push(input.clone());
        for pr in inner.prs.values_mut() {
            if pr.number == input.number {
                pr.title = input.title.clone();
                pr.body = input.body.clone();
                if let Some(base) = &input.base {
                    pr.to_branch = base.clone();
                }
            }
        }
        Ok(())
    }

    async fn comment_pull_request(&self, number: PrNumber, _body: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(ForgeCall::Comment(number));
        Ok(())
    }

    async fn close_pull_request(&self, number: PrNumber) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ForgeCall::Close(number));
        inner.prs.retain(|_, pr| pr.number != number);
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr: &PullRequest,
        _method: MergeMethod,
        _merge_queue: bool,
        _author_email: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ForgeCall::Merge(pr.number));
        let number = pr.number;
        inner.prs.retain(|_, pr| pr.number != number);
        Ok(())
    }

    async fn assignable_users(&self) -> Result<Vec<RepoAssignee>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ForgeCall::AssignableUsers);
        Ok(inner.assignable.clone())
    }

    async fn request_reviewers(&self, number: PrNumber, reviewers: Vec<String>) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(ForgeCall::RequestReviewers(number, reviewers));
        Ok(())
    }
}

/// A fixture PR as the forge would report it after a previous update:
/// managed head branch, all merge bits green.
pub fn forge_pr(number: u64, id: &str, to_branch: &str, title: &str) -> PullRequest {
    let hash = Sha::parse(format!("{:040x}", 0xabcd + number)).unwrap();
    forge_pr_with_hash(number, id, to_branch, title, hash)
}

/// Like [`forge_pr`] but with a specific head commit hash, for tests that
/// need the remote branch to look up-to-date with a local commit.
pub fn forge_pr_with_hash(
    number: u64,
    id: &str,
    to_branch: &str,
    title: &str,
    hash: Sha,
) -> PullRequest {
    let commit = Commit {
        commit_id: Some(CommitId::parse(id).unwrap()),
        hash,
        subject: title.to_string(),
        body: format!("commit-id:{}", id),
        wip: false,
    };
    PullRequest {
        id: format!("PR_{}", number),
        number: PrNumber(number),
        from_branch: format!("spr/main/{}", id),
        to_branch: to_branch.to_string(),
        title: title.to_string(),
        body: String::new(),
        commit: commit.clone(),
        commits: vec![commit],
        merge_status: MergeStatus {
            checks: CheckStatus::Pass,
            approved: true,
            no_conflicts: true,
            stacked: false,
        },
        in_queue: false,
    }
}

/// An engine wired to a [`TestRepo`] and a [`MockForge`], synchronous mode on.
pub struct TestEngine {
    pub repo: TestRepo,
    pub forge: Arc<MockForge>,
    pub state_path: PathBuf,
    config: Mutex<Config>,
    _state_dir: TempDir,
}

impl TestEngine {
    pub fn new() -> Self {
        let repo = TestRepo::new();
        let state_dir = TempDir::new().unwrap();
        let state_path = state_dir.path().join("state.json");

        let mut config = Config::default();
        config.repo.github_repo_owner = "octocat".into();
        config.repo.github_repo_name = "hello".into();
        config.repo.merge_method = MergeMethod::Rebase;

        TestEngine {
            repo,
            forge: MockForge::new(),
            state_path,
            config: Mutex::new(config),
            _state_dir: state_dir,
        }
    }

    pub fn engine(&self) -> Engine {
        let mut engine = Engine::new(
            self.config.lock().unwrap().clone(),
            self.forge.clone(),
            self.repo.root().to_path_buf(),
            self.state_path.clone(),
        );
        engine.synchronous = true;
        engine
    }

    pub fn repo_key(&self) -> String {
        self.config.lock().unwrap().repo_key()
    }

    pub fn set_merge_check(&self, command: &str) {
        self.config.lock().unwrap().repo.merge_check = command.to_string();
    }

    /// Seeds the persisted PR-set map, as a previous update would have.
    pub fn seed_pr_sets(&self, pairs: &[(&str, usize)]) {
        let mut persisted = persist::load(&self.state_path).unwrap();
        let map = pairs
            .iter()
            .map(|(id, set)| (CommitId::parse(*id).unwrap(), *set))
            .collect();
        persisted.set_pr_sets(&self.repo_key(), map);
        persist::save(&self.state_path, &persisted).unwrap();
    }
}
