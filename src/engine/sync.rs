//! `sync`: fast-forward the working branch through the newest known PR.

use crate::error::{Error, Result};
use crate::git;

use super::Engine;

impl Engine {
    /// Cherry-picks everything up to the newest PR's head commit onto the
    /// local working branch, bringing it level with the remote stack.
    pub async fn sync_stack(&self) -> Result<()> {
        let snapshot = self.forge.pull_requests_and_status().await?;
        let local = self.local_commits().await?;

        // The newest local commit that has an open PR.
        let newest = local.iter().find_map(|lc| {
            let id = lc.commit.commit_id.as_ref()?;
            snapshot.prs.get(id)
        });

        let Some(pr) = newest else {
            println!("pull request stack is empty");
            return Ok(());
        };

        let root = self.repo_root.clone();
        let range = format!("..{}", pr.commit.hash);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let output = git::git_user_command(&root)
                .args(["cherry-pick", &range])
                .output()
                .map_err(git::GitError::Io)?;
            if !output.status.success() {
                return Err(git::GitError::CommandFailed {
                    command: format!("git cherry-pick {}", range),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                }
                .into());
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::State(format!("task join: {}", e)))?
    }
}
