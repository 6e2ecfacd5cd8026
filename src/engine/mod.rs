//! The operation engine: owns configuration, the forge client, the local
//! repository path and the persisted state, and drives every CLI operation.

pub mod check;
pub mod merge;
pub mod status;
pub mod sync;
pub mod update;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git;
use crate::github::{commit_id_from_branch, Forge, RemoteSnapshot};
use crate::persist::PersistedState;
use crate::state::{Gating, State};
use crate::types::LocalCommit;

pub struct Engine {
    pub config: Config,
    pub forge: Arc<dyn Forge>,
    pub repo_root: PathBuf,
    pub state_path: PathBuf,

    /// Disables all parallelism; batches drain in enqueue order. Used by the
    /// test suite for determinism.
    pub synchronous: bool,

    /// Propagated from the process signal handler.
    pub cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        config: Config,
        forge: Arc<dyn Forge>,
        repo_root: PathBuf,
        state_path: PathBuf,
    ) -> Self {
        Engine {
            config,
            forge,
            repo_root,
            state_path,
            synchronous: false,
            cancel: CancellationToken::new(),
        }
    }

    fn remote(&self) -> &str {
        &self.config.repo.github_remote
    }

    fn default_branch(&self) -> &str {
        &self.config.repo.github_branch
    }

    fn gating(&self) -> Gating {
        Gating {
            require_checks: self.config.repo.require_checks,
            require_approval: self.config.repo.require_approval,
        }
    }

    /// Reads the local stack (blocking git) off the async runtime.
    pub(crate) async fn local_commits(&self) -> Result<Vec<LocalCommit>> {
        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        let branch = self.config.repo.github_branch.clone();
        tokio::task::spawn_blocking(move || git::stack::unmerged_commits(&root, &remote, &branch))
            .await
            .map_err(|e| Error::State(format!("task join: {}", e)))?
            .map_err(Into::into)
    }

    /// Builds the reconciliation snapshot: local and remote reads run
    /// concurrently, then join through the assembler.
    pub(crate) async fn read_state(&self, persisted: &mut PersistedState) -> Result<State> {
        let (snapshot, local_commits) =
            tokio::try_join!(self.forge.pull_requests_and_status(), self.local_commits())?;
        Ok(self.assemble(snapshot, local_commits, persisted))
    }

    pub(crate) fn assemble(
        &self,
        snapshot: RemoteSnapshot,
        local_commits: Vec<LocalCommit>,
        persisted: &mut PersistedState,
    ) -> State {
        let repo_key = self.config.repo_key();
        let gating = self.gating();
        State::assemble(
            snapshot.repository_id,
            local_commits,
            &snapshot.prs,
            persisted.pr_sets_mut(&repo_key),
            gating,
        )
    }

    /// Fetches from the configured remote with pruning, off the runtime.
    pub(crate) async fn fetch_prune(&self) -> Result<()> {
        let root = self.repo_root.clone();
        let remote = self.config.repo.github_remote.clone();
        tokio::task::spawn_blocking(move || git::fetch(&root, &remote, true))
            .await
            .map_err(|e| Error::State(format!("task join: {}", e)))?
            .map_err(Into::into)
    }

    /// Refuses to operate on a checked-out managed branch.
    ///
    /// Running on a PR branch would create duplicate PRs for commits that
    /// already have them; the stack lives on the user's own branch.
    pub(crate) fn reject_managed_branch(&self) -> Result<()> {
        let branch = git::local_branch_short_name(&self.repo_root)?;
        if commit_id_from_branch(&branch).is_some() {
            return Err(Error::ConfigInvalid(format!(
                "don't run spr on a remote pr branch ({}); check out your working branch instead",
                branch
            )));
        }
        Ok(())
    }
}
