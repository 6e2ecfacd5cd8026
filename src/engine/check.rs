//! `check`: the user-configured pre-merge gate.
//!
//! The configured command runs with inherited stdio (it is the user's own
//! test suite). Success records the newest local commit's hash as the
//! merge-check high-water-mark; failure clears it. Cancellation hard-kills
//! the child.

use std::process::Stdio;

use crate::error::{Error, Result};
use crate::persist;

use super::Engine;

impl Engine {
    pub async fn run_merge_check(&self) -> Result<()> {
        let check = self.config.repo.merge_check.clone();
        if check.is_empty() {
            println!("use merge_check to configure a pre merge check command to run");
            return Ok(());
        }

        let local = self.local_commits().await?;
        let Some(newest) = local.first() else {
            println!("no local commits - nothing to check");
            return Ok(());
        };
        let newest_hash = newest.commit.hash.clone();

        let mut parts = check.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::ConfigInvalid("merge_check command is empty".into()))?;

        let mut child = tokio::process::Command::new(program)
            .args(parts)
            .current_dir(&self.repo_root)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::State(format!("spawning merge check {:?}: {}", check, e)))?;

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::State(format!("waiting for merge check: {}", e)))?
            }
            _ = self.cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::State("merge check cancelled".into()));
            }
        };

        let mut persisted = persist::load(&self.state_path)?;
        let repo_key = self.config.repo_key();
        if status.success() {
            persisted.record_merge_check(&repo_key, &newest_hash);
            persist::save(&self.state_path, &persisted)?;
            println!("MergeCheck PASSED");
        } else {
            persisted.clear_merge_check(&repo_key);
            persist::save(&self.state_path, &persisted)?;
            println!("MergeCheck FAILED: {}", status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::persist;
    use crate::test_utils::TestEngine;

    #[tokio::test]
    async fn passing_check_records_newest_commit() {
        let harness = TestEngine::new();
        harness.repo.commit_file("base.txt", "base", "base commit");
        harness.repo.push_main();
        let sha = harness
            .repo
            .commit_tagged("a.txt", "a", "Feature 1", "aaaa1111");
        harness.set_merge_check("true");

        harness.engine().run_merge_check().await.unwrap();

        let persisted = persist::load(&harness.state_path).unwrap();
        assert!(persisted.merge_check_passes(&harness.repo_key(), &sha));
    }

    #[tokio::test]
    async fn failing_check_clears_the_record() {
        let harness = TestEngine::new();
        harness.repo.commit_file("base.txt", "base", "base commit");
        harness.repo.push_main();
        let sha = harness
            .repo
            .commit_tagged("a.txt", "a", "Feature 1", "aaaa1111");

        harness.set_merge_check("true");
        harness.engine().run_merge_check().await.unwrap();

        harness.set_merge_check("false");
        harness.engine().run_merge_check().await.unwrap();

        let persisted = persist::load(&harness.state_path).unwrap();
        assert!(!persisted.merge_check_passes(&harness.repo_key(), &sha));
    }

    #[tokio::test]
    async fn unconfigured_check_is_a_noop() {
        let harness = TestEngine::new();
        harness.repo.commit_file("base.txt", "base", "base commit");
        harness.repo.push_main();

        harness.engine().run_merge_check().await.unwrap();
        let persisted = persist::load(&harness.state_path).unwrap();
        assert!(persisted.merge_check_commit.is_empty());
    }
}
