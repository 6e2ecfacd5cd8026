//! Selector language: how users name commits and PR sets.
//!
//! ```text
//! selector  := dest? ( rangelist )?
//! dest      := prset ":"                    // replace the set's members
//!            | prset "+"                    // extend the set's members
//! prset     := "s" uint                     // e.g. s0, s12
//! rangelist := item ("," item)*
//! item      := range | prset | uint
//! range     := uint "-" uint                // inclusive, low <= high
//! ```
//!
//! Whitespace is insignificant. Evaluation is total: every input either
//! produces a [`Selection`] or fails with `Error::BadSelector`; nothing
//! panics.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::LocalCommit;

/// The evaluated selector: where the commits go, and which commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Destination PR-set index. `None` means "create a new set"; the
    /// reconciler resolves it to `max(existing) + 1`.
    pub destination: Option<usize>,

    /// Commit indices (the user-facing `index` of each commit) to place in
    /// the destination set.
    pub commits: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestMode {
    Replace,
    Extend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Index(usize),
    Range(usize, usize),
    Set(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Parsed {
    dest: Option<(usize, DestMode)>,
    items: Vec<Item>,
}

/// Parses the bare PR-set form `s<k>` used by `merge s0`.
pub fn as_pr_set(input: &str) -> Option<usize> {
    let trimmed: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let rest = trimmed.strip_prefix('s')?;
    parse_uint(rest)
}

/// Evaluates a selector string against the current commit stack.
pub fn evaluate(commits: &[LocalCommit], selector: &str) -> Result<Selection> {
    let parsed = parse(selector)?;

    let valid_indices: BTreeSet<usize> = commits.iter().map(|c| c.index).collect();
    let members_of = |set: usize| -> BTreeSet<usize> {
        commits
            .iter()
            .filter(|c| c.pr_index == Some(set))
            .map(|c| c.index)
            .collect()
    };

    let mut selected = BTreeSet::new();
    for item in &parsed.items {
        match *item {
            Item::Index(i) => {
                if !valid_indices.contains(&i) {
                    return Err(bad(format!("commit index {} does not exist", i)));
                }
                selected.insert(i);
            }
            Item::Range(lo, hi) => {
                if lo > hi {
                    return Err(bad(format!("range {}-{} is reversed", lo, hi)));
                }
                for i in lo..=hi {
                    if !valid_indices.contains(&i) {
                        return Err(bad(format!("commit index {} does not exist", i)));
                    }
                    selected.insert(i);
                }
            }
            Item::Set(k) => {
                let members = members_of(k);
                if members.is_empty() {
                    return Err(bad(format!("PR set s{} does not exist", k)));
                }
                selected.extend(members);
            }
        }
    }

    let destination = match parsed.dest {
        None => None,
        Some((k, mode)) => {
            let members = members_of(k);
            if members.is_empty() {
                return Err(bad(format!("PR set s{} does not exist", k)));
            }
            if mode == DestMode::Extend {
                selected.extend(members);
            }
            Some(k)
        }
    };

    Ok(Selection {
        destination,
        commits: selected,
    })
}

fn bad(msg: String) -> Error {
    Error::BadSelector(msg)
}

fn parse(selector: &str) -> Result<Parsed> {
    let compact: String = selector.chars().filter(|c| !c.is_whitespace()).collect();

    let (dest, rest) = split_dest(&compact)?;

    let mut items = Vec::new();
    if !rest.is_empty() {
        for part in rest.split(',') {
            items.push(parse_item(part)?);
        }
    }

    Ok(Parsed { dest, items })
}

/// Splits a leading `s<uint>:` or `s<uint>+` destination off the selector.
fn split_dest(input: &str) -> Result<(Option<(usize, DestMode)>, &str)> {
    let Some(after_s) = input.strip_prefix('s') else {
        return Ok((None, input));
    };

    let digits_len = after_s.chars().take_while(|c| c.is_ascii_digit()).count();
    let after_digits = &after_s[digits_len..];

    let mode = match after_digits.chars().next() {
        Some(':') => DestMode::Replace,
        Some('+') => DestMode::Extend,
        // `s0` alone or `s0,2`: a rangelist, not a destination.
        _ => return Ok((None, input)),
    };

    if digits_len == 0 {
        return Err(bad(format!("missing PR set number in {:?}", input)));
    }
    let k = parse_uint(&after_s[..digits_len])
        .ok_or_else(|| bad(format!("invalid PR set number in {:?}", input)))?;

    Ok((Some((k, mode)), &after_digits[1..]))
}

fn parse_item(part: &str) -> Result<Item> {
    if part.is_empty() {
        return Err(bad("empty item in selector".into()));
    }

    if let Some(rest) = part.strip_prefix('s') {
        let k = parse_uint(rest).ok_or_else(|| bad(format!("invalid PR set {:?}", part)))?;
        return Ok(Item::Set(k));
    }

    if let Some((lo, hi)) = part.split_once('-') {
        let lo = parse_uint(lo).ok_or_else(|| bad(format!("invalid range start {:?}", part)))?;
        let hi = parse_uint(hi).ok_or_else(|| bad(format!("invalid range end {:?}", part)))?;
        return Ok(Item::Range(lo, hi));
    }

    let i = parse_uint(part).ok_or_else(|| bad(format!("invalid commit index {:?}", part)))?;
    Ok(Item::Index(i))
}

fn parse_uint(s: &str) -> Option<usize> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
