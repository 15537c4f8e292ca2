use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use super::scanning::{scan_pass, Candidate, ScanBuffer};
use crate::settings::ActivationSettings;

/// Bounds on the recursion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionLimits {
    pub recursive: bool,
    /// Total scan passes, round 0 included. Round 0 always runs.
    pub max_rounds: usize,
    pub timeout: Option<Duration>,
}

impl RecursionLimits {
    pub fn from_settings(settings: &ActivationSettings) -> Self {
        Self {
            recursive: settings.recursive_scanning,
            max_rounds: settings.max_recursion_rounds.max(1),
            timeout: (settings.timeout_ms > 0).then(|| Duration::from_millis(settings.timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecursionOutcome {
    /// Candidate indices in activation order.
    pub activated: Vec<usize>,
    pub rounds: usize,
    pub truncated: bool,
}

/// Drive scan passes until a round activates nothing new, recursion is off,
/// or a limit is hit. Hitting a limit keeps everything activated so far.
pub fn run_recursion<R: Rng + ?Sized>(
    candidates: &[Candidate<'_>],
    buffer: &mut ScanBuffer<'_>,
    limits: RecursionLimits,
    rng: &mut R,
) -> RecursionOutcome {
    let started = Instant::now();
    let mut outcome = RecursionOutcome::default();
    let mut is_active = vec![false; candidates.len()];

    loop {
        let newly = scan_pass(candidates, &is_active, buffer, outcome.rounds, rng);
        debug!(round = outcome.rounds, activated = newly.len(), "scan pass finished");
        outcome.rounds += 1;

        if newly.is_empty() {
            break;
        }

        for idx in newly {
            is_active[idx] = true;
            outcome.activated.push(idx);

            let candidate = &candidates[idx];
            if candidate.feeds_recursion() {
                buffer.append(&candidate.entry.content);
            }
        }

        if !limits.recursive {
            break;
        }
        if outcome.rounds >= limits.max_rounds {
            warn!(rounds = outcome.rounds, "recursion stopped at round limit");
            outcome.truncated = true;
            break;
        }
        if limits.timeout.is_some_and(|t| started.elapsed() >= t) {
            warn!(rounds = outcome.rounds, "recursion stopped at timeout");
            outcome.truncated = true;
            break;
        }
    }

    outcome
}
