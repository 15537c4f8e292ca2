use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::scanning::Candidate;

pub struct GroupResult {
    /// Surviving candidate indices, in the order they were activated.
    pub kept: Vec<usize>,
    pub dropped: usize,
}

/// Collapse competing entries that share a group tag.
///
/// A group where any member allows overlap keeps every member; otherwise only
/// the heaviest member survives (ties: lowest insertion order, then merge
/// order). Ungrouped entries pass through.
pub fn resolve_groups(candidates: &[Candidate<'_>], activated: &[usize]) -> GroupResult {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for &idx in activated {
        if let Some(group) = candidates[idx].entry.group_tag() {
            groups.entry(group).or_default().push(idx);
        }
    }

    let mut losers = vec![false; candidates.len()];
    for members in groups.values() {
        if members.iter().any(|&i| candidates[i].entry.group_overlap) {
            continue;
        }

        let winner = members
            .iter()
            .copied()
            .min_by(|&a, &b| by_group_precedence(&candidates[a], &candidates[b]));

        for &idx in members {
            if Some(idx) != winner {
                losers[idx] = true;
            }
        }
    }

    let kept: Vec<usize> = activated.iter().copied().filter(|&i| !losers[i]).collect();
    GroupResult {
        dropped: activated.len() - kept.len(),
        kept,
    }
}

// Ordering::Less means `a` wins.
fn by_group_precedence(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.entry
        .group_weight
        .cmp(&a.entry.group_weight)
        .then(a.entry.insertion_order.cmp(&b.entry.insertion_order))
        .then(a.rank.cmp(&b.rank))
}
