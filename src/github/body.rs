//! PR body construction: the stack footer and PR-template splicing.

use crate::error::{Error, Result};
use crate::types::{Commit, PullRequest};

/// Warning appended under the stack list so nobody lands a stacked PR from
/// the web UI.
const MANUAL_MERGE_NOTICE: &str = "⚠️ *Part of a stack managed by `spr`. \
Do not merge manually using the UI - doing so may have unexpected results.*";

/// Builds the body for a commit's PR.
///
/// A PR that is part of a stack of two or more lists the whole stack, newest
/// first, with an arrow marking this PR. A lone PR is just the commit body.
pub fn format_body(commit: &Commit, stack: &[&PullRequest], show_pr_titles: bool) -> String {
    if stack.len() <= 1 {
        return commit.body.trim().to_string();
    }

    let footer = format!(
        "**Stack**:\n{}\n\n{}",
        format_stack_markdown(commit, stack, show_pr_titles),
        MANUAL_MERGE_NOTICE
    );

    if commit.body.trim().is_empty() {
        footer
    } else {
        format!("{}\n\n---\n\n{}", commit.body.trim(), footer)
    }
}

/// One bullet per PR, newest first, `⬅` on the current PR.
fn format_stack_markdown(commit: &Commit, stack: &[&PullRequest], show_pr_titles: bool) -> String {
    let mut out = String::new();
    for pr in stack.iter().rev() {
        let current = pr.commit.commit_id.is_some() && pr.commit.commit_id == commit.commit_id;
        let suffix = if current { " ⬅" } else { "" };
        let title = if show_pr_titles {
            format!("{} ", pr.title)
        } else {
            String::new()
        };
        out.push_str(&format!("- {}{}{}\n", title, pr.number, suffix));
    }
    out.trim_end_matches('\n').to_string()
}

/// Splices `body` into a PR template between the configured start and end
/// markers.
///
/// On update the current PR body (which already contains the markers from
/// creation) is used instead of the template file, preserving whatever the
/// author wrote around the spliced section.
pub fn insert_body_into_template(
    body: &str,
    template: &str,
    existing_pr_body: Option<&str>,
    insert_start: &str,
    insert_end: &str,
) -> Result<String> {
    let target = match existing_pr_body {
        Some(existing) if !existing.is_empty() => existing,
        _ => template,
    };

    let before = section_of(target, insert_start, Section::Before)
        .map_err(|e| Error::PrTemplate(format!("{}: insert start marker {:?}", e, insert_start)))?;
    let after = section_of(target, insert_end, Section::After)
        .map_err(|e| Error::PrTemplate(format!("{}: insert end marker {:?}", e, insert_end)))?;

    Ok(format!(
        "{}{}\n{}\n\n{}{}",
        before, insert_start, body, insert_end, after
    ))
}

enum Section {
    Before,
    After,
}

/// The text before or after a unique marker. A marker that is missing or
/// appears more than once is an error.
fn section_of<'a>(text: &'a str, marker: &str, which: Section) -> std::result::Result<&'a str, &'static str> {
    if marker.is_empty() {
        return Err("empty marker");
    }
    let mut split = text.split(marker);
    let before = split.next().unwrap_or("");
    let Some(after) = split.next() else {
        return Err("no matches found");
    };
    if split.next().is_some() {
        return Err("multiple matches found");
    }
    Ok(match which {
        Section::Before => before,
        Section::After => after,
    })
}
