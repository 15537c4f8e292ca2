//! Per-entry temporal state: sticky, cooldown and turn bookkeeping.
//!
//! ```text
//! Idle ──match──▶ Active(sticky) ──n turns──▶ Active(0) ──▶ CoolingDown(c) ──▶ Idle
//!                                                  └───── cooldown == 0 ──────────▲
//! ```

use serde::{Deserialize, Serialize};

use crate::lorebook::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", content = "remaining", rename_all = "snake_case")]
pub enum EntryPhase {
    #[default]
    Idle,
    /// Force-included for this many further turns.
    Active(u32),
    /// Suppressed for this many further turns.
    CoolingDown(u32),
}

/// What the tracker allows the scanner to do with an entry this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Evaluate,
    ForceInclude,
    Suppress,
}

impl EntryPhase {
    /// Advance one turn.
    pub fn step(self, cooldown: u32) -> (EntryPhase, Gate) {
        match self {
            EntryPhase::Idle => (EntryPhase::Idle, Gate::Evaluate),
            EntryPhase::Active(0) if cooldown > 0 => {
                (EntryPhase::CoolingDown(cooldown - 1), Gate::Suppress)
            }
            EntryPhase::Active(0) => (EntryPhase::Idle, Gate::Evaluate),
            EntryPhase::Active(n) => (EntryPhase::Active(n - 1), Gate::ForceInclude),
            EntryPhase::CoolingDown(0) => (EntryPhase::Idle, Gate::Evaluate),
            EntryPhase::CoolingDown(n) => (EntryPhase::CoolingDown(n - 1), Gate::Suppress),
        }
    }

    fn remaining(self) -> u32 {
        match self {
            EntryPhase::Idle => 0,
            EntryPhase::Active(n) | EntryPhase::CoolingDown(n) => n,
        }
    }
}

/// The outcome of opening a turn for one entry. Nothing is written back to
/// the session until [`ActivationState::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnGate {
    pub gate: Gate,
    before: EntryPhase,
    after: EntryPhase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationState {
    phase: EntryPhase,
    /// Phase going into `turn`, kept so the same turn can be re-run.
    phase_before_turn: EntryPhase,
    turn: Option<u64>,
    pub last_active_turn: Option<u64>,
}

impl ActivationState {
    pub fn phase(&self) -> EntryPhase {
        self.phase
    }

    pub fn sticky_remaining(&self) -> u32 {
        match self.phase {
            EntryPhase::Active(n) => n,
            _ => 0,
        }
    }

    pub fn cooldown_remaining(&self) -> u32 {
        match self.phase {
            EntryPhase::CoolingDown(n) => n,
            _ => 0,
        }
    }

    /// Compute the gate for `turn` without mutating the state.
    ///
    /// Skipped turns are stepped through one at a time. Re-running the last
    /// seen turn starts again from the phase that turn began with; a turn
    /// older than the last one seen means history was rewound and the entry
    /// starts over from `Idle`.
    pub fn open_turn(&self, turn: u64, entry: &Entry) -> TurnGate {
        let (mut phase, steps) = match self.turn {
            None => (self.phase, 1),
            Some(last) if turn > last => (self.phase, turn - last),
            Some(last) if turn == last => (self.phase_before_turn, 1),
            Some(_) => (EntryPhase::Idle, 1),
        };

        // Past this many steps every phase has settled into Idle.
        let bound = u64::from(phase.remaining()) + u64::from(entry.cooldown_turns()) + 2;
        for _ in 1..steps.min(bound) {
            phase = phase.step(entry.cooldown_turns()).0;
        }

        let (after, gate) = phase.step(entry.cooldown_turns());
        TurnGate {
            gate,
            before: phase,
            after,
        }
    }

    /// Record the outcome of `turn`. `matched` means the predicate fired this
    /// turn; `forced` means the entry was carried in by its sticky span.
    pub fn commit(&mut self, turn: u64, opened: TurnGate, entry: &Entry, matched: bool, forced: bool) {
        self.turn = Some(turn);
        self.phase_before_turn = opened.before;
        self.phase = if matched {
            EntryPhase::Active(entry.sticky_turns())
        } else {
            opened.after
        };
        if matched || forced {
            self.last_active_turn = Some(turn);
        }
    }
}
