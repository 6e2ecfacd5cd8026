//! The reconciliation snapshot: local commits joined with remote PRs.
//!
//! `State` is built once per operation from two concurrent reads (the local
//! commit stack and the forge's PR snapshot) plus the persisted PR-set map.
//! The reconciler then mutates it in memory (set membership, orphan
//! tracking, mutated-set bookkeeping) before anything touches the network.

use std::collections::{BTreeSet, HashMap};

use crate::selector::Selection;
use crate::types::{CommitId, LocalCommit, PullRequest};

/// Snapshot of local and remote topology for one operation.
#[derive(Debug, Clone, Default)]
pub struct State {
    /// GraphQL node id of the repository.
    pub repository_id: String,

    /// Unmerged commits, HEAD-first (index 0 of the vec is the newest).
    pub local_commits: Vec<LocalCommit>,

    /// Open managed PRs whose commit-id no longer exists locally.
    pub orphaned_prs: Vec<PullRequest>,

    /// PR-set indices the current operation has altered.
    pub mutated_pr_sets: BTreeSet<usize>,
}

/// Gating configuration for the stacked sweep.
#[derive(Debug, Clone, Copy)]
pub struct Gating {
    pub require_checks: bool,
    pub require_approval: bool,
}

impl State {
    /// Joins local commits with the remote PR map and the persisted PR-set
    /// assignments.
    ///
    /// `pr_set_map` is garbage-collected in place: keys that no longer name a
    /// local commit with an open PR are dropped.
    pub fn assemble(
        repository_id: String,
        mut local_commits: Vec<LocalCommit>,
        prs: &HashMap<CommitId, PullRequest>,
        pr_set_map: &mut HashMap<CommitId, usize>,
        gating: Gating,
    ) -> Self {
        for lc in &mut local_commits {
            if let Some(id) = &lc.commit.commit_id {
                lc.pull_request = prs.get(id).cloned();
            }
        }

        let orphaned_prs = orphaned(&local_commits, prs);

        // Drop persisted assignments for commits that vanished (or whose PR
        // vanished); attach the surviving ones.
        pr_set_map.retain(|id, _| {
            local_commits
                .iter()
                .any(|lc| lc.commit.commit_id.as_ref() == Some(id) && lc.pull_request.is_some())
        });
        for lc in &mut local_commits {
            if lc.pull_request.is_none() {
                continue;
            }
            if let Some(id) = &lc.commit.commit_id {
                lc.pr_index = pr_set_map.get(id).copied();
            }
        }

        set_stacked_bits(&mut local_commits, gating);

        State {
            repository_id,
            local_commits,
            orphaned_prs,
            mutated_pr_sets: BTreeSet::new(),
        }
    }

    /// The HEAD commit, when the stack is non-empty.
    pub fn head(&self) -> Option<&LocalCommit> {
        self.local_commits.first()
    }

    /// The next unused PR-set index.
    pub fn next_pr_index(&self) -> usize {
        self.local_commits
            .iter()
            .filter_map(|lc| lc.pr_index)
            .map(|i| i + 1)
            .max()
            .unwrap_or(0)
    }

    /// Applies an evaluated selection: moves commits in and out of the
    /// destination set, tracking orphaned PRs and mutated sets.
    ///
    /// Returns the resolved destination index (`None` only for the empty
    /// no-op selection).
    pub fn apply_selection(&mut self, selection: &Selection) -> Option<usize> {
        if selection.destination.is_none() && selection.commits.is_empty() {
            return None;
        }

        let dest = selection.destination.unwrap_or_else(|| self.next_pr_index());

        for i in 0..self.local_commits.len() {
            let index = self.local_commits[i].index;
            let should_be_in = selection.commits.contains(&index);
            let is_in = self.local_commits[i].pr_index == Some(dest);

            if is_in == should_be_in {
                continue;
            }

            if is_in {
                // Leaves the destination set; its PR no longer corresponds to
                // any selected commit.
                if let Some(pr) = self.local_commits[i].pull_request.take() {
                    self.orphaned_prs.push(pr);
                }
                self.local_commits[i].pr_index = None;
                self.mutated_pr_sets.insert(dest);
            } else {
                // Joins the destination set, possibly stolen from another.
                if let Some(previous) = self.local_commits[i].pr_index {
                    self.mutated_pr_sets.insert(previous);
                }
                self.local_commits[i].pr_index = Some(dest);
                self.mutated_pr_sets.insert(dest);
            }
        }

        // A set can be mutated out of existence; those need no further work.
        let existing: BTreeSet<usize> = self
            .local_commits
            .iter()
            .filter_map(|lc| lc.pr_index)
            .collect();
        self.mutated_pr_sets = self
            .mutated_pr_sets
            .intersection(&existing)
            .copied()
            .collect();

        Some(dest)
    }

    /// The commits of one PR set, newest first (stack order).
    pub fn commits_by_pr_set(&self, pr_index: usize) -> Vec<&LocalCommit> {
        self.local_commits
            .iter()
            .filter(|lc| lc.pr_index == Some(pr_index))
            .collect()
    }

    /// Mutated PR sets whose commits no longer line up with the PR chain on
    /// the forge (invariant: each newer PR's base is the next older PR's
    /// head).
    ///
    /// A broken chain means commits were reordered; those sets must be
    /// re-parented onto the default branch before branches are overwritten,
    /// otherwise landing one branch would auto-close another PR.
    pub fn out_of_order_sets(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for &set in &self.mutated_pr_sets {
            let mut last_to: Option<&str> = None;
            for lc in &self.local_commits {
                if lc.pr_index != Some(set) {
                    continue;
                }
                let Some(pr) = &lc.pull_request else {
                    continue;
                };
                match last_to {
                    None => last_to = Some(&pr.to_branch),
                    Some(expected) => {
                        if pr.from_branch != expected {
                            out.insert(set);
                            break;
                        }
                        last_to = Some(&pr.to_branch);
                    }
                }
            }
        }
        out
    }

    /// Rebuilds the persisted PR-set map from the current commits.
    pub fn pr_set_map(&self) -> HashMap<CommitId, usize> {
        self.local_commits
            .iter()
            .filter_map(|lc| {
                let id = lc.commit.commit_id.clone()?;
                Some((id, lc.pr_index?))
            })
            .collect()
    }
}

/// PRs in the remote map that reference no local commit.
fn orphaned(
    local_commits: &[LocalCommit],
    prs: &HashMap<CommitId, PullRequest>,
) -> Vec<PullRequest> {
    let local_ids: BTreeSet<&CommitId> = local_commits
        .iter()
        .filter_map(|lc| lc.commit.commit_id.as_ref())
        .collect();

    let mut orphans: Vec<PullRequest> = prs
        .iter()
        .filter(|(id, _)| !local_ids.contains(id))
        .map(|(_, pr)| pr.clone())
        .collect();
    orphans.sort_by_key(|pr| pr.number);
    orphans
}

/// Computes the `stacked` bit for every PR, sweeping each set oldest→newest.
///
/// A PR is stacked when every older member of its set meets the gating
/// requirements and is not WIP; once one predecessor fails, no later member
/// of that set is stacked.
fn set_stacked_bits(local_commits: &mut [LocalCommit], gating: Gating) {
    let sets: BTreeSet<usize> = local_commits.iter().filter_map(|lc| lc.pr_index).collect();

    for set in sets {
        let mut chain_ok = true;
        // local_commits is HEAD-first; walk from the back for oldest-first.
        for lc in local_commits.iter_mut().rev() {
            if lc.pr_index != Some(set) {
                continue;
            }
            let wip = lc.commit.wip;
            let Some(pr) = &mut lc.pull_request else {
                chain_ok = false;
                continue;
            };
            pr.merge_status.stacked = chain_ok;
            chain_ok = chain_ok
                && !wip
                && pr.ready(gating.require_checks, gating.require_approval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckStatus, Commit, MergeStatus, PrNumber, Sha};

    fn commit_id(s: &str) -> CommitId {
        CommitId::parse(s).unwrap()
    }

    fn sha(n: usize) -> Sha {
        Sha::parse(format!("{:040x}", n)).unwrap()
    }

    fn commit(id: &str, n: usize) -> Commit {
        Commit {
            commit_id: Some(commit_id(id)),
            hash: sha(n),
            subject: format!("commit {}", id),
            body: format!("commit-id:{}", id),
            wip: false,
        }
    }

    fn pr(number: u64, id: &str, from: &str, to: &str) -> PullRequest {
        PullRequest {
            id: format!("PR_{}", number),
            number: PrNumber(number),
            from_branch: from.into(),
            to_branch: to.into(),
            title: format!("commit {}", id),
            body: String::new(),
            commit: commit(id, number as usize),
            commits: vec![],
            merge_status: MergeStatus {
                checks: CheckStatus::Pass,
                approved: true,
                no_conflicts: true,
                stacked: false,
            },
            in_queue: false,
        }
    }

    fn managed_pr(number: u64, id: &str, to: &str) -> PullRequest {
        pr(number, id, &format!("spr/main/{}", id), to)
    }

    /// Stack of ids, oldest first in the argument, stored HEAD-first.
    fn stack(ids: &[&str]) -> Vec<LocalCommit> {
        ids.iter()
            .enumerate()
            .rev()
            .map(|(index, id)| LocalCommit::new(commit(id, index + 100), index))
            .collect()
    }

    const GATING: Gating = Gating {
        require_checks: true,
        require_approval: true,
    };

    mod assemble {
        use super::*;

        #[test]
        fn empty_inputs() {
            let mut map = HashMap::new();
            let state = State::assemble(
                "R_1".into(),
                vec![],
                &HashMap::new(),
                &mut map,
                GATING,
            );
            assert!(state.local_commits.is_empty());
            assert!(state.orphaned_prs.is_empty());
            assert!(state.mutated_pr_sets.is_empty());
            assert_eq!(state.repository_id, "R_1");
        }

        #[test]
        fn attaches_prs_by_commit_id() {
            let mut prs = HashMap::new();
            prs.insert(commit_id("aaaa1111"), managed_pr(1, "aaaa1111", "main"));
            let mut map = HashMap::new();

            let state = State::assemble(
                String::new(),
                stack(&["aaaa1111", "bbbb2222"]),
                &prs,
                &mut map,
                GATING,
            );

            // HEAD-first: index 1 (bbbb2222) first.
            assert!(state.local_commits[0].pull_request.is_none());
            assert_eq!(
                state.local_commits[1]
                    .pull_request
                    .as_ref()
                    .unwrap()
                    .number,
                PrNumber(1)
            );
        }

        #[test]
        fn orphans_are_prs_without_local_commits() {
            let mut prs = HashMap::new();
            prs.insert(commit_id("aaaa1111"), managed_pr(1, "aaaa1111", "main"));
            prs.insert(commit_id("dddd4444"), managed_pr(4, "dddd4444", "main"));
            prs.insert(commit_id("eeee5555"), managed_pr(5, "eeee5555", "main"));
            let mut map = HashMap::new();

            let state = State::assemble(
                String::new(),
                stack(&["aaaa1111"]),
                &prs,
                &mut map,
                GATING,
            );

            let orphan_numbers: Vec<u64> =
                state.orphaned_prs.iter().map(|p| p.number.0).collect();
            assert_eq!(orphan_numbers, vec![4, 5]);
        }

        #[test]
        fn persisted_map_is_garbage_collected() {
            let mut prs = HashMap::new();
            prs.insert(commit_id("aaaa1111"), managed_pr(1, "aaaa1111", "main"));
            let mut map = HashMap::new();
            map.insert(commit_id("aaaa1111"), 0);
            map.insert(commit_id("99999999"), 9); // gone locally
            map.insert(commit_id("bbbb2222"), 1); // local but no PR

            let state = State::assemble(
                String::new(),
                stack(&["aaaa1111", "bbbb2222"]),
                &prs,
                &mut map,
                GATING,
            );

            assert_eq!(map.len(), 1);
            assert_eq!(map.get(&commit_id("aaaa1111")), Some(&0));
            assert_eq!(state.local_commits[1].pr_index, Some(0));
            assert_eq!(state.local_commits[0].pr_index, None);
        }
    }

    mod stacked {
        use super::*;

        /// Builds a two-set stack: s0 = indices 0,1; s1 = index 2.
        fn two_sets() -> Vec<LocalCommit> {
            let mut commits = stack(&["aaaa1111", "bbbb2222", "cccc3333"]);
            // commits is HEAD-first: [idx2=cccc, idx1=bbbb, idx0=aaaa]
            commits[2].pr_index = Some(0);
            commits[2].pull_request = Some(managed_pr(1, "aaaa1111", "main"));
            commits[1].pr_index = Some(0);
            commits[1].pull_request = Some(managed_pr(2, "bbbb2222", "spr/main/aaaa1111"));
            commits[0].pr_index = Some(1);
            commits[0].pull_request = Some(managed_pr(3, "cccc3333", "main"));
            commits
        }

        fn stacked_bit(commits: &[LocalCommit], index: usize) -> bool {
            commits
                .iter()
                .find(|lc| lc.index == index)
                .unwrap()
                .pull_request
                .as_ref()
                .unwrap()
                .merge_status
                .stacked
        }

        #[test]
        fn all_green_chain_is_stacked() {
            let mut commits = two_sets();
            set_stacked_bits(&mut commits, GATING);
            assert!(stacked_bit(&commits, 0));
            assert!(stacked_bit(&commits, 1));
            assert!(stacked_bit(&commits, 2));
        }

        #[test]
        fn failing_predecessor_blocks_later_members_of_its_set() {
            let mut commits = two_sets();
            // break the oldest commit of s0
            commits[2]
                .pull_request
                .as_mut()
                .unwrap()
                .merge_status
                .no_conflicts = false;
            set_stacked_bits(&mut commits, GATING);

            // The failing PR itself is still stacked (nothing below it).
            assert!(stacked_bit(&commits, 0));
            // Its successor in the same set is not.
            assert!(!stacked_bit(&commits, 1));
            // The other set is unaffected.
            assert!(stacked_bit(&commits, 2));
        }

        #[test]
        fn wip_predecessor_blocks_later_members() {
            let mut commits = two_sets();
            commits[2].commit.wip = true;
            set_stacked_bits(&mut commits, GATING);
            assert!(stacked_bit(&commits, 0));
            assert!(!stacked_bit(&commits, 1));
        }

        #[test]
        fn gating_flags_are_honored() {
            let mut commits = two_sets();
            commits[2]
                .pull_request
                .as_mut()
                .unwrap()
                .merge_status
                .checks = CheckStatus::Pending;

            // checks required: successor blocked
            set_stacked_bits(&mut commits, GATING);
            assert!(!stacked_bit(&commits, 1));

            // checks not required: successor stacked
            set_stacked_bits(
                &mut commits,
                Gating {
                    require_checks: false,
                    require_approval: true,
                },
            );
            assert!(stacked_bit(&commits, 1));
        }
    }

    mod apply {
        use super::*;

        fn state_with_sets(ids: &[&str], sets: &[(usize, usize)]) -> State {
            let mut commits = stack(ids);
            for lc in &mut commits {
                if let Some((_, set)) = sets.iter().find(|(i, _)| *i == lc.index) {
                    lc.pr_index = Some(*set);
                    let id = lc.commit.commit_id.clone().unwrap();
                    lc.pull_request = Some(managed_pr(
                        lc.index as u64 + 1,
                        id.as_str(),
                        "main",
                    ));
                }
            }
            State {
                repository_id: String::new(),
                local_commits: commits,
                orphaned_prs: vec![],
                mutated_pr_sets: BTreeSet::new(),
            }
        }

        fn selection(dest: Option<usize>, commits: &[usize]) -> Selection {
            Selection {
                destination: dest,
                commits: commits.iter().copied().collect(),
            }
        }

        #[test]
        fn empty_selection_is_a_noop() {
            let mut state = state_with_sets(&["aaaa1111"], &[]);
            assert_eq!(state.apply_selection(&selection(None, &[])), None);
            assert!(state.mutated_pr_sets.is_empty());
        }

        #[test]
        fn new_set_gets_next_free_index() {
            let mut state =
                state_with_sets(&["aaaa1111", "bbbb2222", "cccc3333"], &[(0, 0), (1, 3)]);
            let dest = state.apply_selection(&selection(None, &[2]));
            assert_eq!(dest, Some(4));
            assert_eq!(state.local_commits[0].pr_index, Some(4));
            assert_eq!(state.mutated_pr_sets, BTreeSet::from([4]));
        }

        #[test]
        fn first_set_is_zero() {
            let mut state = state_with_sets(&["aaaa1111"], &[]);
            let dest = state.apply_selection(&selection(None, &[0]));
            assert_eq!(dest, Some(0));
        }

        #[test]
        fn leaving_commit_orphans_its_pr() {
            let mut state = state_with_sets(&["aaaa1111", "bbbb2222"], &[(0, 0), (1, 0)]);
            // keep only commit 0 in s0
            state.apply_selection(&selection(Some(0), &[0]));

            let left = state
                .local_commits
                .iter()
                .find(|lc| lc.index == 1)
                .unwrap();
            assert_eq!(left.pr_index, None);
            assert!(left.pull_request.is_none());
            assert_eq!(state.orphaned_prs.len(), 1);
            assert_eq!(state.mutated_pr_sets, BTreeSet::from([0]));
        }

        #[test]
        fn stealing_from_another_set_marks_both_mutated() {
            let mut state = state_with_sets(&["aaaa1111", "bbbb2222"], &[(0, 0), (1, 1)]);
            // pull commit 1 into s0
            state.apply_selection(&selection(Some(0), &[0, 1]));

            assert_eq!(
                state
                    .local_commits
                    .iter()
                    .find(|lc| lc.index == 1)
                    .unwrap()
                    .pr_index,
                Some(0)
            );
            // s1 vanished, so it is pruned from the mutated set.
            assert_eq!(state.mutated_pr_sets, BTreeSet::from([0]));
        }

        #[test]
        fn emptied_set_vanishes_from_mutated() {
            let mut state = state_with_sets(&["aaaa1111"], &[(0, 0)]);
            state.apply_selection(&selection(Some(0), &[]));
            assert!(state.mutated_pr_sets.is_empty());
            assert_eq!(state.orphaned_prs.len(), 1);
            assert!(state.pr_set_map().is_empty());
        }

        #[test]
        fn unchanged_membership_mutates_nothing() {
            let mut state = state_with_sets(&["aaaa1111", "bbbb2222"], &[(0, 0), (1, 0)]);
            state.apply_selection(&selection(Some(0), &[0, 1]));
            assert!(state.mutated_pr_sets.is_empty());
            assert!(state.orphaned_prs.is_empty());
        }
    }

    mod ordering {
        use super::*;

        fn chained_state() -> State {
            // s0 = aaaa (oldest, PR->main), bbbb (PR->aaaa's branch)
            let mut commits = stack(&["aaaa1111", "bbbb2222"]);
            commits[1].pr_index = Some(0);
            commits[1].pull_request = Some(managed_pr(1, "aaaa1111", "main"));
            commits[0].pr_index = Some(0);
            commits[0].pull_request = Some(managed_pr(2, "bbbb2222", "spr/main/aaaa1111"));
            State {
                repository_id: String::new(),
                local_commits: commits,
                orphaned_prs: vec![],
                mutated_pr_sets: BTreeSet::from([0]),
            }
        }

        #[test]
        fn intact_chain_is_in_order() {
            let state = chained_state();
            assert!(state.out_of_order_sets().is_empty());
        }

        #[test]
        fn reordered_commits_break_the_chain() {
            let mut state = chained_state();
            // Swap the local order: bbbb is now the oldest.
            state.local_commits.reverse();
            state.local_commits[0].index = 1;
            state.local_commits[1].index = 0;
            assert_eq!(state.out_of_order_sets(), BTreeSet::from([0]));
        }

        #[test]
        fn only_mutated_sets_are_checked() {
            let mut state = chained_state();
            state.local_commits.reverse();
            state.mutated_pr_sets.clear();
            assert!(state.out_of_order_sets().is_empty());
        }

        #[test]
        fn commits_by_pr_set_is_newest_first() {
            let state = chained_state();
            let commits = state.commits_by_pr_set(0);
            assert_eq!(commits.len(), 2);
            assert_eq!(commits[0].index, 1);
            assert_eq!(commits[1].index, 0);
        }
    }

    mod persisted_map {
        use super::*;

        #[test]
        fn map_reflects_current_assignments() {
            let mut commits = stack(&["aaaa1111", "bbbb2222"]);
            commits[1].pr_index = Some(2);
            let state = State {
                repository_id: String::new(),
                local_commits: commits,
                orphaned_prs: vec![],
                mutated_pr_sets: BTreeSet::new(),
            };
            let map = state.pr_set_map();
            assert_eq!(map.len(), 1);
            assert_eq!(map.get(&commit_id("aaaa1111")), Some(&2));
        }
    }
}
