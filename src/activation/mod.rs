pub mod budgeting;
pub mod grouping;
pub mod matching;
pub mod recursion;
pub mod scanning;
pub mod tokens;

use std::collections::{BTreeSet, HashSet};

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::lorebook::{ActiveLorebook, Entry, InsertionPosition};
use crate::settings::{ActivationSettings, CharacterStrategy};
use crate::state::{ActivationState, ChatSession, Gate, TurnGate};
use crate::types::activation::{ActivationError, ActivationMetadata, ActivationResult, ChatMessage};
use crate::types::identifiers::EntryId;
pub use budgeting::{apply_budget, order_for_budget, place_injections, BudgetResult};
pub use grouping::{resolve_groups, GroupResult};
pub use matching::{entry_matches, roll_probability, KeyMatcher, MatchOptions};
pub use recursion::{run_recursion, RecursionLimits, RecursionOutcome};
pub use scanning::{scan_pass, Candidate, ScanBuffer};
pub use tokens::{ApproxTokenCounter, TokenCounter};

/// Everything one generation turn hands to the engine.
#[derive(Debug, Clone)]
pub struct ActivationRequest<'a> {
    pub lorebooks: Vec<ActiveLorebook<'a>>,
    /// Oldest first.
    pub messages: &'a [ChatMessage],
    pub turn_index: u64,
}

pub struct ActivationEngine<T> {
    tokenizer: T,
    settings: ActivationSettings,
}

impl Default for ActivationEngine<ApproxTokenCounter> {
    fn default() -> Self {
        Self {
            tokenizer: ApproxTokenCounter,
            settings: ActivationSettings::default(),
        }
    }
}

struct PendingState<'a> {
    id: EntryId,
    entry: &'a Entry,
    state: ActivationState,
    opened: TurnGate,
    candidate: Option<usize>,
}

impl<T> ActivationEngine<T>
where
    T: TokenCounter,
{
    pub fn new(tokenizer: T, settings: ActivationSettings) -> Self {
        Self { tokenizer, settings }
    }

    pub fn settings(&self) -> &ActivationSettings {
        &self.settings
    }

    /// Run one activation turn with the thread-local RNG.
    pub fn activate(
        &self,
        request: &ActivationRequest<'_>,
        session: &mut ChatSession,
    ) -> Result<ActivationResult, ActivationError> {
        self.activate_with_rng(request, session, &mut rand::thread_rng())
    }

    /// Run one activation turn. The session is only updated when the call
    /// succeeds.
    pub fn activate_with_rng<R: Rng + ?Sized>(
        &self,
        request: &ActivationRequest<'_>,
        session: &mut ChatSession,
        rng: &mut R,
    ) -> Result<ActivationResult, ActivationError> {
        let turn = request.turn_index;
        let message_count = request.messages.len();

        // 1. Eligibility: enabled, well-formed, past its delay, not cooling down
        let mut pending: Vec<PendingState<'_>> = Vec::new();
        let mut candidates: Vec<Candidate<'_>> = Vec::new();
        let mut seen: HashSet<EntryId> = HashSet::new();
        let mut entries_considered = 0;
        let mut entries_skipped_as_duplicate = 0;

        for active in merge_order(&request.lorebooks, self.settings.character_strategy) {
            let lorebook = active.lorebook;
            let since_attach = session.messages_since_attach(lorebook.id, message_count);

            for entry in lorebook.entries.iter().filter(|e| e.enabled) {
                let id = EntryId::new(lorebook.id, entry.id);
                if !seen.insert(id.clone()) {
                    warn!(entry = %id, "duplicate entry identity in request, skipping");
                    entries_skipped_as_duplicate += 1;
                    continue;
                }
                entries_considered += 1;

                if entry.is_malformed() {
                    trace!(entry = %id, "entry has no keys and is not constant");
                    continue;
                }
                if since_attach < entry.delay_messages() {
                    trace!(entry = %id, since_attach, delay = entry.delay, "entry still delayed");
                    continue;
                }
                if entry.position == InsertionPosition::AtDepth && entry.depth < 0 {
                    warn!(entry = %id, depth = entry.depth, "negative insertion depth clamped to 0");
                }

                let state = session.state(&id).cloned().unwrap_or_default();
                let opened = state.open_turn(turn, entry);

                let candidate = match opened.gate {
                    Gate::Suppress => None,
                    gate => {
                        candidates.push(Candidate {
                            id: id.clone(),
                            entry,
                            lorebook,
                            rank: candidates.len(),
                            forced: gate == Gate::ForceInclude,
                            matcher: KeyMatcher::compile(entry, MatchOptions::resolve(entry, lorebook)),
                        });
                        Some(candidates.len() - 1)
                    }
                };

                pending.push(PendingState {
                    id,
                    entry,
                    state,
                    opened,
                    candidate,
                });
            }
        }

        // 2. Scan + recursion
        let mut buffer = ScanBuffer::new(request.messages);
        let outcome = run_recursion(
            &candidates,
            &mut buffer,
            RecursionLimits::from_settings(&self.settings),
            rng,
        );

        let activated_entry_ids: BTreeSet<EntryId> = outcome
            .activated
            .iter()
            .map(|&idx| candidates[idx].id.clone())
            .collect();

        // 3. Group resolution
        let GroupResult { mut kept, dropped } = resolve_groups(&candidates, &outcome.activated);

        // 4. Budgeting
        order_for_budget(&candidates, &mut kept);
        let budget = self.settings.effective_budget();
        let BudgetResult {
            admitted,
            tokens_used,
            entries_excluded_by_budget,
        } = apply_budget(&candidates, &kept, budget, &self.tokenizer)?;

        let injections = place_injections(&candidates, &admitted);

        // 5. Commit temporal state now that nothing can fail
        let mut is_active = vec![false; candidates.len()];
        for &idx in &outcome.activated {
            is_active[idx] = true;
        }

        let updates = pending
            .into_iter()
            .map(|p| {
                let (matched, forced) = match p.candidate {
                    Some(idx) if is_active[idx] => {
                        let forced = candidates[idx].forced;
                        (!forced, forced)
                    }
                    _ => (false, false),
                };
                let mut state = p.state;
                state.commit(turn, p.opened, p.entry, matched, forced);
                (p.id, state)
            })
            .collect();
        session.commit(updates);

        let overflowed = self.settings.overflow_alert && entries_excluded_by_budget > 0;

        debug!(
            turn,
            considered = entries_considered,
            duplicates = entries_skipped_as_duplicate,
            activated = activated_entry_ids.len(),
            injected = injections.len(),
            tokens_used,
            budget,
            overflowed,
            "lorebook activation finished"
        );

        Ok(ActivationResult {
            injections,
            overflowed,
            metadata: ActivationMetadata {
                budget,
                tokens_used,
                entries_considered,
                entries_skipped_as_duplicate,
                entries_activated: activated_entry_ids.len(),
                entries_dropped_by_group: dropped,
                entries_excluded_by_budget,
                recursion_rounds: outcome.rounds,
                recursion_truncated: outcome.truncated,
            },
            activated_entry_ids,
        })
    }
}

/// Order lorebooks for evaluation according to the character strategy.
/// The sort is stable, so the caller's order holds within each scope.
pub fn merge_order<'a>(
    lorebooks: &[ActiveLorebook<'a>],
    strategy: CharacterStrategy,
) -> Vec<ActiveLorebook<'a>> {
    let mut ordered = lorebooks.to_vec();
    match strategy {
        CharacterStrategy::Evenly => {}
        CharacterStrategy::CharacterFirst => ordered.sort_by_key(|l| l.is_global()),
        CharacterStrategy::GlobalFirst => ordered.sort_by_key(|l| !l.is_global()),
    }
    ordered
}
