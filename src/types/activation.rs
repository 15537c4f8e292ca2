use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::lorebook::InsertionPosition;
use crate::types::identifiers::EntryId;

/// One chat message as the scanner sees it.
///
/// Uses the chat file's field names (`name`, `mes`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "name")]
    pub speaker: String,
    #[serde(rename = "mes")]
    pub text: String,
}

impl ChatMessage {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// A fragment to splice into the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Injection {
    pub position: InsertionPosition,
    /// Set only for `AtDepth` fragments.
    pub depth: Option<usize>,
    pub text: String,
    pub source_entry_id: EntryId,
    pub tokens: usize,
}

/// Counters describing how a call got from candidates to injections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationMetadata {
    pub budget: usize,
    pub tokens_used: usize,

    pub entries_considered: usize,
    /// Entries whose identity repeated one already seen in the same request.
    pub entries_skipped_as_duplicate: usize,
    pub entries_activated: usize,
    pub entries_dropped_by_group: usize,
    pub entries_excluded_by_budget: usize,

    pub recursion_rounds: usize,
    /// Recursion stopped on the round limit or the timeout rather than running dry.
    pub recursion_truncated: bool,
}

/// The final result of one activation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub injections: Vec<Injection>,
    pub overflowed: bool,
    pub activated_entry_ids: BTreeSet<EntryId>,
    pub metadata: ActivationMetadata,
}

impl ActivationResult {
    /// Newline-joined text of every fragment at a non-depth position.
    pub fn prompt_text(&self, position: InsertionPosition) -> String {
        self.injections
            .iter()
            .filter(|i| i.position == position)
            .map(|i| i.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn depth_injections(&self) -> impl Iterator<Item = &Injection> {
        self.injections
            .iter()
            .filter(|i| i.position == InsertionPosition::AtDepth)
    }

    pub fn is_activated(&self, id: &EntryId) -> bool {
        self.activated_entry_ids.contains(id)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Token counting failed: {message}")]
pub struct TokenCountError {
    pub message: String,
}

impl TokenCountError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Could not count tokens for entry {entry}")]
    TokenCount {
        entry: EntryId,
        #[source]
        source: TokenCountError,
    },
}
