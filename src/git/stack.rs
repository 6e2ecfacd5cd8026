//! Local graph reader: the ordered list of unmerged commits.
//!
//! A commit is "unmerged" when it is reachable from `HEAD` but not from
//! `<remote>/<default-branch>`. The list is kept HEAD-first; the user-facing
//! `index` counts from the oldest unmerged commit (index 0) toward HEAD.

use std::path::Path;

use crate::types::{Commit, CommitId, LocalCommit, Sha};

use super::{run_git, GitResult};

/// Field and record separators for `git log` parsing. Control characters
/// cannot appear in commit messages produced by git, so splitting is exact.
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// A raw parsed log entry: hash, parent hashes, full message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: Sha,
    pub parents: Vec<Sha>,
    pub message: String,
}

/// Reads the unmerged commits, HEAD-first, with indices assigned so that the
/// oldest unmerged commit has index 0.
pub fn unmerged_commits(workdir: &Path, remote: &str, branch: &str) -> GitResult<Vec<LocalCommit>> {
    let range = format!("{}/{}..HEAD", remote, branch);
    let format = format!("--format=%H{}%P{}%B{}", FIELD_SEP, FIELD_SEP, RECORD_SEP);
    let output = run_git(workdir, &["log", &format, &range])?;
    let text = String::from_utf8_lossy(&output.stdout);

    let entries = head_first(parse_log(&text));

    let count = entries.len();
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| LocalCommit::new(commit_from_entry(&entry), count - (i + 1)))
        .collect())
}

/// Parses `git log` output in our field/record-separated format.
pub fn parse_log(text: &str) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for record in text.split(RECORD_SEP) {
        let record = record.trim_start_matches('\n');
        if record.trim().is_empty() {
            continue;
        }
        let mut fields = record.splitn(3, FIELD_SEP);
        let (Some(hash), Some(parents), Some(message)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Ok(hash) = Sha::parse(hash.trim()) else {
            continue;
        };
        let parents = parents
            .split_whitespace()
            .filter_map(|p| Sha::parse(p).ok())
            .collect();
        entries.push(LogEntry {
            hash,
            parents,
            message: message.trim_end_matches('\n').to_string(),
        });
    }
    entries
}

/// Ensures the list is ordered HEAD-first.
///
/// When the second entry is a parent of the first, the list is already
/// HEAD-first; otherwise it arrived oldest-first and is reversed.
pub fn head_first(mut entries: Vec<LogEntry>) -> Vec<LogEntry> {
    if entries.len() < 2 {
        return entries;
    }
    if entries[0].parents.contains(&entries[1].hash) {
        return entries;
    }
    entries.reverse();
    entries
}

fn commit_from_entry(entry: &LogEntry) -> Commit {
    Commit {
        commit_id: commit_id_from_message(&entry.message),
        hash: entry.hash.clone(),
        subject: subject(&entry.message).to_string(),
        body: body(&entry.message).to_string(),
        wip: is_wip(&entry.message),
    }
}

/// Extracts the commit-id from a `commit-id:<8hex>` trailer line, if present.
///
/// The trailer must occupy a whole line: exactly the literal prefix followed
/// by 8 lowercase hex digits.
pub fn commit_id_from_message(message: &str) -> Option<CommitId> {
    for line in message.lines() {
        if let Some(rest) = line.strip_prefix("commit-id:") {
            if let Ok(id) = CommitId::parse(rest) {
                return Some(id);
            }
        }
    }
    None
}

/// True when the message marks the commit as work in progress.
pub fn is_wip(message: &str) -> bool {
    message.starts_with("WIP") || message.starts_with("[WIP]")
}

/// The first line of the message.
pub fn subject(message: &str) -> &str {
    message.split('\n').next().unwrap_or("")
}

/// Everything after the first line of the message.
pub fn body(message: &str) -> &str {
    match message.split_once('\n') {
        Some((_, rest)) => rest,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(c: char) -> Sha {
        Sha::parse(c.to_string().repeat(40)).unwrap()
    }

    mod message_parsing {
        use super::*;

        #[test]
        fn commit_id_found_anywhere_in_body() {
            let msg = "Subject\n\nSome body text\n\ncommit-id:deadbeef";
            assert_eq!(
                commit_id_from_message(msg),
                Some(CommitId::parse("deadbeef").unwrap())
            );
        }

        #[test]
        fn commit_id_requires_exact_line() {
            assert_eq!(commit_id_from_message("commit-id:deadbeef extra"), None);
            assert_eq!(commit_id_from_message("x commit-id:deadbeef"), None);
            assert_eq!(commit_id_from_message("commit-id: deadbeef"), None);
            assert_eq!(commit_id_from_message("commit-id:DEADBEEF"), None);
            assert_eq!(commit_id_from_message("commit-id:deadbee"), None);
            assert_eq!(commit_id_from_message(""), None);
        }

        #[test]
        fn first_valid_trailer_wins() {
            let msg = "Subject\n\ncommit-id:aaaaaaaa\ncommit-id:bbbbbbbb";
            assert_eq!(
                commit_id_from_message(msg),
                Some(CommitId::parse("aaaaaaaa").unwrap())
            );
        }

        #[test]
        fn wip_detection() {
            assert!(is_wip("WIP: thing"));
            assert!(is_wip("WIP"));
            assert!(is_wip("[WIP] thing"));
            assert!(!is_wip("wip: lowercase is not wip"));
            assert!(!is_wip("Work in progress"));
        }

        #[test]
        fn subject_and_body_split_on_first_newline() {
            assert_eq!(subject("one line"), "one line");
            assert_eq!(body("one line"), "");
            assert_eq!(subject("subject\nbody line 1\nbody line 2"), "subject");
            assert_eq!(body("subject\nbody line 1\nbody line 2"), "body line 1\nbody line 2");
            assert_eq!(subject(""), "");
            assert_eq!(body(""), "");
        }
    }

    mod ordering {
        use super::*;

        fn entry(hash: char, parent: Option<char>) -> LogEntry {
            LogEntry {
                hash: sha(hash),
                parents: parent.map(sha).into_iter().collect(),
                message: String::new(),
            }
        }

        #[test]
        fn head_first_keeps_correct_order() {
            // c -> b -> a, listed head first
            let entries = vec![entry('c', Some('b')), entry('b', Some('a')), entry('a', None)];
            let ordered = head_first(entries.clone());
            assert_eq!(ordered, entries);
        }

        #[test]
        fn head_first_reverses_oldest_first_input() {
            let oldest_first = vec![entry('a', None), entry('b', Some('a')), entry('c', Some('b'))];
            let ordered = head_first(oldest_first);
            assert_eq!(ordered[0].hash, sha('c'));
            assert_eq!(ordered[2].hash, sha('a'));
        }

        #[test]
        fn head_first_short_lists_untouched() {
            assert!(head_first(vec![]).is_empty());
            let single = vec![entry('a', None)];
            assert_eq!(head_first(single.clone()), single);
        }
    }

    mod log_parsing {
        use super::*;

        #[test]
        fn parses_records_and_fields() {
            let a = "a".repeat(40);
            let b = "b".repeat(40);
            let text = format!(
                "{}\u{1f}{}\u{1f}Subject one\n\ncommit-id:11112222\u{1e}\n{}\u{1f}\u{1f}Root commit\u{1e}\n",
                a, b, b
            );
            let entries = parse_log(&text);
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].hash.as_str(), a);
            assert_eq!(entries[0].parents.len(), 1);
            assert_eq!(entries[0].message, "Subject one\n\ncommit-id:11112222");
            assert_eq!(entries[1].parents.len(), 0);
            assert_eq!(entries[1].message, "Root commit");
        }

        #[test]
        fn ignores_garbage_records() {
            assert!(parse_log("").is_empty());
            assert!(parse_log("\n\n").is_empty());
            assert!(parse_log("not-a-sha\u{1f}\u{1f}msg\u{1e}").is_empty());
        }
    }

    mod real_repo {
        use super::*;
        use crate::test_utils::TestRepo;

        #[test]
        fn unmerged_commits_indexes_from_oldest() {
            let repo = TestRepo::new();
            repo.commit_file("base.txt", "base", "base commit");
            repo.push_main();

            repo.commit_tagged("a.txt", "a", "Feature 1", "aaaa1111");
            repo.commit_tagged("b.txt", "b", "Feature 2", "bbbb2222");
            repo.commit_tagged("c.txt", "c", "Feature 3", "cccc3333");

            let commits = unmerged_commits(repo.root(), "origin", "main").unwrap();
            assert_eq!(commits.len(), 3);

            // HEAD-first storage, oldest has index 0.
            assert_eq!(commits[0].commit.subject, "Feature 3");
            assert_eq!(commits[0].index, 2);
            assert_eq!(commits[2].commit.subject, "Feature 1");
            assert_eq!(commits[2].index, 0);
            assert_eq!(
                commits[2].commit.commit_id,
                Some(CommitId::parse("aaaa1111").unwrap())
            );
        }

        #[test]
        fn merged_commits_are_excluded() {
            let repo = TestRepo::new();
            repo.commit_file("base.txt", "base", "base commit");
            repo.push_main();

            let commits = unmerged_commits(repo.root(), "origin", "main").unwrap();
            assert!(commits.is_empty());
        }

        #[test]
        fn untagged_commits_have_no_id() {
            let repo = TestRepo::new();
            repo.commit_file("base.txt", "base", "base commit");
            repo.push_main();
            repo.commit_file("x.txt", "x", "untagged change");

            let commits = unmerged_commits(repo.root(), "origin", "main").unwrap();
            assert_eq!(commits.len(), 1);
            assert_eq!(commits[0].commit.commit_id, None);
        }
    }
}
