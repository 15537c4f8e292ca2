use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tracker::ActivationState;
use crate::lorebook::Lorebook;
use crate::types::identifiers::{EntryId, LorebookId, LorebookVersion};

/// When a lorebook joined the chat, and which content it had at the time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub attached_at_message: usize,
    pub version: LorebookVersion,
}

/// Activation state owned by one chat session.
///
/// The engine takes it by `&mut`, so a session can only ever have one scan in
/// flight. Serializable so callers can store it alongside the chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    states: BTreeMap<EntryId, ActivationState>,
    attachments: BTreeMap<LorebookId, Attachment>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `lorebook` is attached once the chat holds `message_count`
    /// messages. Re-attaching keeps the original anchor; if the entries changed
    /// since, state belonging to entries that no longer exist is dropped.
    pub fn attach(&mut self, lorebook: &Lorebook, message_count: usize) {
        let version = lorebook.version();

        match self.attachments.get_mut(&lorebook.id) {
            Some(existing) if existing.version == version => {}
            Some(existing) => {
                existing.version = version;
                let live: BTreeSet<EntryId> = lorebook
                    .entries
                    .iter()
                    .map(|e| EntryId::new(lorebook.id, e.id))
                    .collect();
                let before = self.states.len();
                self.states
                    .retain(|id, _| id.lorebook() != Some(lorebook.id) || live.contains(id));
                debug!(
                    lorebook = %lorebook.id,
                    pruned = before - self.states.len(),
                    "lorebook changed since attach"
                );
            }
            None => {
                self.attachments.insert(
                    lorebook.id,
                    Attachment {
                        attached_at_message: message_count,
                        version,
                    },
                );
            }
        }
    }

    pub fn detach(&mut self, lorebook: LorebookId) {
        self.attachments.remove(&lorebook);
        self.states.retain(|id, _| id.lorebook() != Some(lorebook));
    }

    pub fn attachment(&self, lorebook: LorebookId) -> Option<&Attachment> {
        self.attachments.get(&lorebook)
    }

    /// Messages accumulated since `lorebook` was attached. Lorebooks that were
    /// never attached count from the start of the chat.
    pub fn messages_since_attach(&self, lorebook: LorebookId, message_count: usize) -> usize {
        let anchor = self
            .attachments
            .get(&lorebook)
            .map_or(0, |a| a.attached_at_message);
        message_count.saturating_sub(anchor)
    }

    pub fn state(&self, entry: &EntryId) -> Option<&ActivationState> {
        self.states.get(entry)
    }

    pub fn states(&self) -> impl Iterator<Item = (&EntryId, &ActivationState)> {
        self.states.iter()
    }

    /// Forget all temporal state but keep attachments.
    pub fn reset_states(&mut self) {
        self.states.clear();
    }

    pub(crate) fn commit(&mut self, updates: Vec<(EntryId, ActivationState)>) {
        self.states.extend(updates);
    }
}
