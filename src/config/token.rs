//! GitHub token discovery.
//!
//! Search order: the `GITHUB_TOKEN` environment variable, then the `gh` CLI
//! config (`~/.config/gh/hosts.yml`, keyed by host), then the `hub` CLI
//! config (`~/.config/hub`). The first hit wins.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Help text printed when no token can be found (exit code 3).
pub const TOKEN_HELP_TEXT: &str = "\
No GitHub OAuth token found! You can either create one
at https://{host}/settings/tokens and set the GITHUB_TOKEN environment variable,
or use the official \"gh\" CLI (https://cli.github.com) config to log in:

\tgh auth login --insecure-storage

Alternatively, configure a token manually in ~/.config/hub:

\tgithub.com:
\t- user: <your username>
\t  oauth_token: <your token>
\t  protocol: https
";

#[derive(Debug, Deserialize)]
struct GhHostEntry {
    oauth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubHostEntry {
    oauth_token: Option<String>,
}

/// Finds a token for `host`, or `None` when the whole search path is empty.
pub fn find_token(host: &str) -> Option<String> {
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.is_empty() {
            return Some(token);
        }
    }

    if let Some(path) = gh_hosts_path() {
        if let Some(token) = token_from_gh_hosts(&path, host) {
            return Some(token);
        }
    }

    if let Some(path) = hub_config_path() {
        if let Some(token) = token_from_hub_config(&path, host) {
            return Some(token);
        }
    }

    None
}

/// The token-missing help text with the host spliced in.
pub fn help_text(host: &str) -> String {
    TOKEN_HELP_TEXT.replace("{host}", host)
}

fn gh_hosts_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gh").join("hosts.yml"))
}

fn hub_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hub"))
}

fn token_from_gh_hosts(path: &std::path::Path, host: &str) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let hosts: HashMap<String, GhHostEntry> = serde_yaml::from_str(&text).ok()?;
    hosts.get(host)?.oauth_token.clone()
}

fn token_from_hub_config(path: &std::path::Path, host: &str) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let hosts: HashMap<String, Vec<HubHostEntry>> = serde_yaml::from_str(&text).ok()?;
    hosts
        .get(host)?
        .iter()
        .find_map(|entry| entry.oauth_token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gh_hosts_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yml");
        std::fs::write(
            &path,
            "github.com:\n  user: octocat\n  oauth_token: gho_abc123\n",
        )
        .unwrap();

        assert_eq!(
            token_from_gh_hosts(&path, "github.com"),
            Some("gho_abc123".into())
        );
        assert_eq!(token_from_gh_hosts(&path, "ghe.example.com"), None);
    }

    #[test]
    fn hub_config_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub");
        std::fs::write(
            &path,
            "github.com:\n- user: octocat\n  oauth_token: tok_xyz\n  protocol: https\n",
        )
        .unwrap();

        assert_eq!(
            token_from_hub_config(&path, "github.com"),
            Some("tok_xyz".into())
        );
        assert_eq!(token_from_hub_config(&path, "other.host"), None);
    }

    #[test]
    fn missing_files_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(token_from_gh_hosts(&dir.path().join("nope.yml"), "h"), None);
        assert_eq!(token_from_hub_config(&dir.path().join("nope"), "h"), None);
    }

    #[test]
    fn help_text_names_the_host() {
        let text = help_text("ghe.example.com");
        assert!(text.contains("https://ghe.example.com/settings/tokens"));
    }
}
