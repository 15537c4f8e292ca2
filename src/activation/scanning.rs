use std::collections::BTreeMap;

use rand::Rng;
use tracing::trace;

use super::matching::{entry_matches, KeyMatcher};
use crate::lorebook::{Entry, Lorebook};
use crate::types::activation::ChatMessage;
use crate::types::identifiers::EntryId;

/// An entry that survived eligibility checks for this call.
#[derive(Debug)]
pub struct Candidate<'a> {
    pub id: EntryId,
    pub entry: &'a Entry,
    pub lorebook: &'a Lorebook,
    /// Position in the character-strategy merge order; the last tie-break
    /// everywhere.
    pub rank: usize,
    /// Carried in by a sticky span; activates on round 0 without matching.
    pub forced: bool,
    pub matcher: KeyMatcher,
}

impl Candidate<'_> {
    pub fn scan_depth(&self) -> usize {
        self.entry
            .scan_depth_override()
            .unwrap_or(self.lorebook.scan_depth)
    }

    /// Whether an activation of this entry adds its content to the buffer.
    pub fn feeds_recursion(&self) -> bool {
        self.lorebook.recursive_scanning && self.entry.feeds_recursion()
    }
}

/// Chat windows keyed by (depth, include_names), built on first use.
pub struct ChatWindows<'a> {
    messages: &'a [ChatMessage],
    cache: BTreeMap<(usize, bool), String>,
}

impl<'a> ChatWindows<'a> {
    pub fn new(messages: &'a [ChatMessage]) -> Self {
        Self {
            messages,
            cache: BTreeMap::new(),
        }
    }

    /// The last `depth` messages, newest last, one per line.
    pub fn window(&mut self, depth: usize, include_names: bool) -> &str {
        let messages = self.messages;
        self.cache.entry((depth, include_names)).or_insert_with(|| {
            let start = messages.len().saturating_sub(depth);
            messages[start..]
                .iter()
                .map(|m| {
                    if include_names && !m.speaker.is_empty() {
                        format!("{}: {}", m.speaker, m.text)
                    } else {
                        m.text.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .as_str()
    }
}

/// The text a scan pass looks at: a trailing window of chat messages plus
/// whatever content earlier rounds fed back.
pub struct ScanBuffer<'a> {
    chat: ChatWindows<'a>,
    recursion: String,
}

impl<'a> ScanBuffer<'a> {
    pub fn new(messages: &'a [ChatMessage]) -> Self {
        Self {
            chat: ChatWindows::new(messages),
            recursion: String::new(),
        }
    }

    pub fn chat_window(&mut self, depth: usize, include_names: bool) -> &str {
        self.chat.window(depth, include_names)
    }

    pub fn recursion_text(&self) -> &str {
        &self.recursion
    }

    pub fn append(&mut self, content: &str) {
        if content.is_empty() {
            return;
        }
        if !self.recursion.is_empty() {
            self.recursion.push('\n');
        }
        self.recursion.push_str(content);
    }
}

/// One scan pass. Returns the indices of candidates that activated this
/// round, in candidate order.
pub fn scan_pass<R: Rng + ?Sized>(
    candidates: &[Candidate<'_>],
    already_active: &[bool],
    buffer: &mut ScanBuffer<'_>,
    round: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut newly = Vec::new();

    for (idx, candidate) in candidates.iter().enumerate() {
        if already_active[idx] {
            continue;
        }

        if candidate.forced {
            if round == 0 {
                trace!(entry = %candidate.id, "sticky entry carried in");
                newly.push(idx);
            }
            continue;
        }

        if round == 0 && candidate.entry.delay_until_recursion {
            continue;
        }

        let depth = candidate.scan_depth();
        let include_names = candidate.lorebook.include_names;
        let window = buffer.chat.window(depth, include_names);
        let recursion = buffer.recursion.as_str();

        // Entries excluded from recursion only ever see the chat itself.
        let matched = if candidate.entry.exclude_recursion || recursion.is_empty() {
            entry_matches(&candidate.matcher, candidate.entry, &[window], rng)
        } else {
            entry_matches(&candidate.matcher, candidate.entry, &[window, recursion], rng)
        };

        if matched {
            trace!(entry = %candidate.id, round, "entry activated");
            newly.push(idx);
        }
    }

    newly
}
