//! Configuration: repository settings, user settings, and their YAML sources.
//!
//! Repository settings come from `.spr.yml` at the repo root, user settings
//! from `~/.config/spr/config.yml`; both are merged over defaults. The
//! repository owner, name and host are inferred from the configured remote's
//! URL when not set explicitly.

pub mod token;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Merge method used when landing a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    #[default]
    Rebase,
    Squash,
    Merge,
}

/// Per-repository configuration (`.spr.yml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub github_repo_owner: String,
    pub github_repo_name: String,
    pub github_host: String,
    pub github_remote: String,
    pub github_branch: String,

    pub require_checks: bool,
    pub require_approval: bool,

    pub merge_method: MergeMethod,
    pub merge_queue: bool,

    /// Shell command that must succeed on the top of a PR set before that set
    /// may be merged. Empty disables the gate.
    pub merge_check: String,

    pub pr_template_path: String,
    pub pr_template_insert_start: String,
    pub pr_template_insert_end: String,

    pub show_pr_titles_in_stack: bool,
    pub branch_push_individually: bool,
    pub force_fetch_tags: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        RepoConfig {
            github_repo_owner: String::new(),
            github_repo_name: String::new(),
            github_host: "github.com".into(),
            github_remote: "origin".into(),
            github_branch: "main".into(),
            require_checks: true,
            require_approval: true,
            merge_method: MergeMethod::Rebase,
            merge_queue: false,
            merge_check: String::new(),
            pr_template_path: String::new(),
            pr_template_insert_start: String::new(),
            pr_template_insert_end: String::new(),
            show_pr_titles_in_stack: false,
            branch_push_individually: false,
            force_fetch_tags: false,
        }
    }
}

/// Per-user configuration (`~/.config/spr/config.yml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Drive PRs through user-selected PR sets rather than the whole stack.
    pub pr_set_workflows: bool,

    pub create_draft_prs: bool,
    pub preserve_title_and_body: bool,

    pub status_bits_header: bool,
    pub log_git_commands: bool,
    pub log_github_calls: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            pr_set_workflows: true,
            create_draft_prs: false,
            preserve_title_and_body: false,
            status_bits_header: true,
            log_git_commands: false,
            log_github_calls: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub repo: RepoConfig,
    pub user: UserConfig,
}

impl Config {
    /// Loads configuration for the repository rooted at `repo_root`, merging
    /// `.spr.yml` and the user config file over defaults, then inferring
    /// owner/name/host from the remote URL.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let mut repo = RepoConfig::default();
        let repo_file = repo_root.join(".spr.yml");
        if repo_file.exists() {
            repo = read_yaml(&repo_file)?;
        }

        let mut user = UserConfig::default();
        if let Some(user_file) = user_config_path() {
            if user_file.exists() {
                user = read_yaml(&user_file)?;
            }
        }

        let mut config = Config { repo, user };

        if config.repo.github_repo_owner.is_empty() || config.repo.github_repo_name.is_empty() {
            let url = crate::git::remote_url(repo_root, &config.repo.github_remote)
                .map_err(|_| Error::ConfigInvalid(format!(
                    "remote {:?} has no URL; set github_repo_owner and github_repo_name in .spr.yml",
                    config.repo.github_remote
                )))?;
            if let Some((host, owner, name)) = parse_remote_url(&url) {
                config.repo.github_host = host;
                config.repo.github_repo_owner = owner;
                config.repo.github_repo_name = name;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.repo.github_repo_owner.is_empty() || self.repo.github_repo_name.is_empty() {
            return Err(Error::ConfigInvalid(
                "unable to determine repository owner/name; set github_repo_owner and \
                 github_repo_name in .spr.yml"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Key identifying this repository in the persisted state file.
    pub fn repo_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.repo.github_host, self.repo.github_repo_owner, self.repo.github_repo_name
        )
    }

    /// The branch name carrying a commit's PR: `spr/<default-branch>/<id>`.
    pub fn branch_name_from_commit_id(&self, id: &crate::types::CommitId) -> String {
        format!("spr/{}/{}", self.repo.github_branch, id)
    }

    /// Browser URL of a pull request.
    pub fn pull_request_url(&self, number: crate::types::PrNumber) -> String {
        format!(
            "https://{}/{}/{}/pull/{}",
            self.repo.github_host, self.repo.github_repo_owner, self.repo.github_repo_name, number.0
        )
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::ConfigInvalid(format!("reading {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&text)
        .map_err(|e| Error::ConfigInvalid(format!("parsing {}: {}", path.display(), e)))
}

fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("spr").join("config.yml"))
}

/// Parses a git remote URL into `(host, owner, repo)`.
///
/// Handles the three URL shapes git produces: scp-like
/// (`git@host:owner/repo.git`), ssh (`ssh://git@host/owner/repo.git`) and
/// https (`https://host/owner/repo`).
pub fn parse_remote_url(url: &str) -> Option<(String, String, String)> {
    let url = url.trim();

    let (host, path) = if let Some(rest) = url.strip_prefix("https://") {
        rest.split_once('/')?
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest.split_once('/')?
    } else if let Some(rest) = url.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map(|(_, r)| r).unwrap_or(rest);
        rest.split_once('/')?
    } else if let Some((user_host, path)) = url.split_once(':') {
        let host = user_host
            .split_once('@')
            .map(|(_, h)| h)
            .unwrap_or(user_host);
        (host, path)
    } else {
        return None;
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let (owner, repo) = path.split_once('/')?;
    if host.is_empty() || owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((host.to_string(), owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod remote_url {
        use super::*;

        #[test]
        fn scp_like() {
            assert_eq!(
                parse_remote_url("git@github.com:octocat/hello.git"),
                Some(("github.com".into(), "octocat".into(), "hello".into()))
            );
        }

        #[test]
        fn https() {
            assert_eq!(
                parse_remote_url("https://github.com/octocat/hello"),
                Some(("github.com".into(), "octocat".into(), "hello".into()))
            );
            assert_eq!(
                parse_remote_url("https://ghe.example.com/team/repo.git"),
                Some(("ghe.example.com".into(), "team".into(), "repo".into()))
            );
        }

        #[test]
        fn ssh_scheme() {
            assert_eq!(
                parse_remote_url("ssh://git@github.com/octocat/hello.git"),
                Some(("github.com".into(), "octocat".into(), "hello".into()))
            );
        }

        #[test]
        fn rejects_unparseable() {
            assert_eq!(parse_remote_url("not a url"), None);
            assert_eq!(parse_remote_url("https://github.com/"), None);
            assert_eq!(parse_remote_url(""), None);
        }

        #[test]
        fn rejects_nested_path() {
            assert_eq!(parse_remote_url("https://host/a/b/c"), None);
        }
    }

    mod defaults {
        use super::*;

        #[test]
        fn repo_defaults_match_expected() {
            let repo = RepoConfig::default();
            assert_eq!(repo.github_remote, "origin");
            assert_eq!(repo.github_branch, "main");
            assert_eq!(repo.github_host, "github.com");
            assert!(repo.require_checks);
            assert!(repo.require_approval);
            assert_eq!(repo.merge_method, MergeMethod::Rebase);
            assert!(repo.merge_check.is_empty());
        }

        #[test]
        fn yaml_overrides_defaults() {
            let repo: RepoConfig =
                serde_yaml::from_str("github_branch: develop\nrequire_checks: false\n").unwrap();
            assert_eq!(repo.github_branch, "develop");
            assert!(!repo.require_checks);
            // untouched fields keep defaults
            assert_eq!(repo.github_remote, "origin");
        }

        #[test]
        fn merge_method_parses_lowercase() {
            let repo: RepoConfig = serde_yaml::from_str("merge_method: squash\n").unwrap();
            assert_eq!(repo.merge_method, MergeMethod::Squash);
        }
    }

    mod derived {
        use super::*;
        use crate::types::{CommitId, PrNumber};

        fn config() -> Config {
            let mut c = Config::default();
            c.repo.github_repo_owner = "octocat".into();
            c.repo.github_repo_name = "hello".into();
            c
        }

        #[test]
        fn branch_name_uses_default_branch_segment() {
            let c = config();
            assert_eq!(
                c.branch_name_from_commit_id(&CommitId::parse("deadbeef").unwrap()),
                "spr/main/deadbeef"
            );
        }

        #[test]
        fn repo_key_is_host_scoped() {
            assert_eq!(config().repo_key(), "github.com/octocat/hello");
        }

        #[test]
        fn pull_request_url_format() {
            assert_eq!(
                config().pull_request_url(PrNumber(42)),
                "https://github.com/octocat/hello/pull/42"
            );
        }
    }

    mod load {
        use super::*;
        use crate::test_utils::TestRepo;

        #[test]
        fn infers_owner_and_name_from_remote() {
            let repo = TestRepo::new();
            // TestRepo's origin is a local path, which can't be parsed into
            // owner/name, so provide them via .spr.yml.
            std::fs::write(
                repo.root().join(".spr.yml"),
                "github_repo_owner: octocat\ngithub_repo_name: hello\n",
            )
            .unwrap();
            let config = Config::load(repo.root()).unwrap();
            assert_eq!(config.repo.github_repo_owner, "octocat");
            assert_eq!(config.repo.github_repo_name, "hello");
        }

        #[test]
        fn missing_owner_is_config_invalid() {
            let repo = TestRepo::new();
            let err = Config::load(repo.root()).unwrap_err();
            assert_eq!(err.exit_code(), 2);
        }
    }
}
