//! Status rendering: the commit/PR-set table and the classic PR list.

use colored::Colorize;

use crate::error::Result;
use crate::persist;
use crate::types::{LocalCommit, PullRequest};

use super::Engine;

/// Subjects render in a fixed-width cell of 50 characters; longer subjects
/// are cut at 46 and given an ellipsis.
const SUBJECT_WIDTH: usize = 50;
const SUBJECT_TRUNCATE: usize = 46;

/// Pads or truncates a subject to the fixed display width, counting
/// characters rather than bytes.
pub fn format_subject(subject: &str) -> String {
    let count = subject.chars().count();
    if count <= SUBJECT_WIDTH {
        let mut out = subject.to_string();
        out.extend(std::iter::repeat(' ').take(SUBJECT_WIDTH - count));
        return out;
    }
    let truncated: String = subject.chars().take(SUBJECT_TRUNCATE).collect();
    format!("{} ...", truncated)
}

/// The column legend printed above status lines.
pub fn header() -> &'static str {
    "\n \
\u{250c}\u{2500} commit index\n \
\u{2502} \u{250c}\u{2500} pull request set index\n \
\u{2502} \u{2502}   \u{250c}\u{2500} github checks pass\n \
\u{2502} \u{2502}   \u{2502} \u{250c}\u{2500}\u{2500} pull request approved\n \
\u{2502} \u{2502}   \u{2502} \u{2502} \u{250c}\u{2500}\u{2500}\u{2500} no merge conflicts\n \
\u{2502} \u{2502}   \u{2502} \u{2502} \u{2502} \u{250c}\u{2500}\u{2500}\u{2500}\u{2500} stack check\n \
\u{2502} \u{2502}   \u{2502} \u{2502} \u{2502} \u{2502}\n"
}

impl Engine {
    /// `status` in PR-set mode: one line per local commit.
    pub async fn status_pr_sets(&self) -> Result<()> {
        let mut persisted = persist::load(&self.state_path)?;
        let state = self.read_state(&mut persisted).await?;

        if state.head().is_none() {
            println!("no local commits");
            return Ok(());
        }

        if self.config.user.status_bits_header {
            print!("{}", header());
        }
        for lc in &state.local_commits {
            println!("{}", self.pr_set_line(lc));
        }
        Ok(())
    }

    /// One PR-set status line: index, colored set, bits, subject, URL.
    fn pr_set_line(&self, lc: &LocalCommit) -> String {
        let index = format!("{:2}", lc.index).bright_blue();

        let set = match lc.pr_index {
            Some(set) => colored_set_index(set),
            None => "--".normal(),
        };

        let detail = match &lc.pull_request {
            Some(pr) => format!(
                "{} {} : {}",
                pr.merge_status,
                format_subject(&lc.commit.subject),
                self.config.pull_request_url(pr.number),
            ),
            None => format!(
                "[····] {} : No Pull Request Created",
                format_subject(&lc.commit.subject),
            ),
        };

        format!("{} {} {}", index, set, detail)
    }

    /// `status` in classic mode: one line per open PR, newest first.
    pub async fn status_pull_requests(&self) -> Result<()> {
        let snapshot = self.forge.pull_requests_and_status().await?;
        let local = self.local_commits().await?;

        // PRs in stack order, newest first (matching the local stack).
        let mut prs: Vec<&PullRequest> = Vec::new();
        for lc in &local {
            if let Some(id) = &lc.commit.commit_id {
                if let Some(pr) = snapshot.prs.get(id) {
                    prs.push(pr);
                }
            }
        }

        if prs.is_empty() {
            println!("pull request stack is empty");
            return Ok(());
        }

        if self.config.user.status_bits_header {
            print!("{}", header());
        }
        for pr in prs {
            println!(
                "{} {} : {}",
                pr.merge_status,
                format_subject(&pr.title),
                self.config.pull_request_url(pr.number),
            );
        }
        Ok(())
    }
}

/// PR-set indices cycle through four colors so adjacent sets read apart.
fn colored_set_index(set: usize) -> colored::ColoredString {
    let label = format!("s{}", set);
    match set % 4 {
        0 => label.red(),
        1 => label.green(),
        2 => label.blue(),
        _ => label.cyan(),
    }
}
