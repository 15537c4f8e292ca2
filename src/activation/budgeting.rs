use std::cmp::Ordering;

use super::scanning::Candidate;
use super::tokens::TokenCounter;
use crate::lorebook::InsertionPosition;
use crate::types::activation::{ActivationError, Injection};

pub struct BudgetResult {
    /// `(candidate index, tokens)` in admission order.
    pub admitted: Vec<(usize, usize)>,
    pub tokens_used: usize,
    pub entries_excluded_by_budget: usize,
}

/// Priority order for the budget walk: priority desc, insertion order asc,
/// merge order asc.
pub fn order_for_budget(candidates: &[Candidate<'_>], kept: &mut [usize]) {
    kept.sort_by(|&a, &b| {
        let (a, b) = (&candidates[a], &candidates[b]);
        b.entry
            .priority
            .cmp(&a.entry.priority)
            .then(a.entry.insertion_order.cmp(&b.entry.insertion_order))
            .then(a.rank.cmp(&b.rank))
    });
}

/// Admit entries in order while the running total stays within `budget`.
///
/// The walk stops at the first entry that does not fit; nothing after it is
/// squeezed in. Entries with blank content are skipped without counting.
pub fn apply_budget<T: TokenCounter + ?Sized>(
    candidates: &[Candidate<'_>],
    ordered: &[usize],
    budget: usize,
    tokenizer: &T,
) -> Result<BudgetResult, ActivationError> {
    let mut admitted = Vec::new();
    let mut tokens_used: usize = 0;
    let mut entries_excluded_by_budget = 0;

    for (pos, &idx) in ordered.iter().enumerate() {
        let candidate = &candidates[idx];
        if candidate.entry.content.trim().is_empty() {
            continue;
        }

        let tokens = tokenizer
            .count_tokens(&candidate.entry.content)
            .map_err(|source| ActivationError::TokenCount {
                entry: candidate.id.clone(),
                source,
            })?;

        match tokens_used.checked_add(tokens).filter(|&total| total <= budget) {
            Some(total) => {
                admitted.push((idx, tokens));
                tokens_used = total;
            }
            None => {
                entries_excluded_by_budget = ordered[pos..]
                    .iter()
                    .filter(|&&i| !candidates[i].entry.content.trim().is_empty())
                    .count();
                break;
            }
        }
    }

    debug_assert!(tokens_used <= budget);

    Ok(BudgetResult {
        admitted,
        tokens_used,
        entries_excluded_by_budget,
    })
}

/// Turn admitted entries into prompt fragments: before-char, after-char, then
/// depth fragments by ascending depth; insertion order within each slot.
pub fn place_injections(candidates: &[Candidate<'_>], admitted: &[(usize, usize)]) -> Vec<Injection> {
    let mut placed: Vec<(usize, usize)> = admitted.to_vec();
    placed.sort_by(|&(a, _), &(b, _)| by_placement(&candidates[a], &candidates[b]));

    placed
        .into_iter()
        .map(|(idx, tokens)| {
            let candidate = &candidates[idx];
            Injection {
                position: candidate.entry.position,
                depth: candidate.entry.insertion_depth(),
                text: candidate.entry.content.clone(),
                source_entry_id: candidate.id.clone(),
                tokens,
            }
        })
        .collect()
}

fn by_placement(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.entry
        .position
        .cmp(&b.entry.position)
        .then_with(|| match a.entry.position {
            InsertionPosition::AtDepth => a.entry.insertion_depth().cmp(&b.entry.insertion_depth()),
            _ => Ordering::Equal,
        })
        .then(a.entry.insertion_order.cmp(&b.entry.insertion_order))
        .then(a.rank.cmp(&b.rank))
}
