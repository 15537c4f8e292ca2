use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

use super::entry::Entry;
use crate::settings::CharacterStrategy;
use crate::types::identifiers::{CharacterId, LorebookId, LorebookVersion};

#[derive(Debug, Error)]
pub enum LorebookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A named collection of entries plus the scan defaults that apply to them.
///
/// Values are immutable in practice: the edit methods return a new lorebook
/// and leave `self` untouched.
///
/// `token_budget`, `budget_cap`, `overflow_alert` and `character_strategy`
/// are kept so files round-trip; activation reads the budget, the overflow
/// alert and the merge strategy from [`ActivationSettings`] only.
///
/// [`ActivationSettings`]: crate::settings::ActivationSettings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lorebook {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_entries")]
    pub entries: Vec<Entry>,
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default)]
    pub recursive_scanning: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub match_whole_words: bool,
    #[serde(default)]
    pub overflow_alert: bool,
    #[serde(default = "default_true")]
    pub include_names: bool,
    #[serde(default)]
    pub character_strategy: CharacterStrategy,
    #[serde(default)]
    pub budget_cap: usize,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    pub id: LorebookId,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Lorebook {
    pub fn new(id: LorebookId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Lorebook {
            name: name.into(),
            description: String::new(),
            entries: Vec::new(),
            scan_depth: default_scan_depth(),
            token_budget: default_token_budget(),
            recursive_scanning: false,
            case_sensitive: false,
            match_whole_words: true,
            overflow_alert: false,
            include_names: true,
            character_strategy: CharacterStrategy::default(),
            budget_cap: 0,
            created_at: now,
            last_updated: now,
            id,
            is_global: false,
            extensions: BTreeMap::new(),
        }
    }

    /// Parse a lorebook file, renumbering entries whose id repeats an
    /// earlier one. The file must carry its lorebook `id`; entries that do not
    /// parse are skipped with a warning.
    pub fn from_json_str(json: &str) -> Result<Self, LorebookError> {
        let lorebook: Lorebook = serde_json::from_str(json)?;
        Ok(lorebook.with_unique_entry_ids())
    }

    /// Like [`Lorebook::from_json_str`], but a file without an `id` is given
    /// `id` instead of failing.
    pub fn from_json_str_with_id(json: &str, id: LorebookId) -> Result<Self, LorebookError> {
        let mut raw: serde_json::Value = serde_json::from_str(json)?;
        if let Some(fields) = raw.as_object_mut() {
            fields
                .entry("id")
                .or_insert_with(|| serde_json::Value::from(id.get()));
        }
        let lorebook: Lorebook = serde_json::from_value(raw)?;
        Ok(lorebook.with_unique_entry_ids())
    }

    fn with_unique_entry_ids(mut self) -> Self {
        let renumbered = renumber_duplicate_ids(&mut self.entries);
        if renumbered > 0 {
            warn!(
                lorebook = %self.id,
                renumbered,
                "lorebook contained duplicate entry ids"
            );
        }
        self
    }

    pub fn to_json_pretty(&self) -> Result<String, LorebookError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, LorebookError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn load_with_id(path: &Path, id: LorebookId) -> Result<Self, LorebookError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str_with_id(&raw, id)
    }

    /// Write the lorebook to `path`, replacing any existing file only once the
    /// new content is fully on disk.
    pub fn save(&self, path: &Path) -> Result<(), LorebookError> {
        let json = self.to_json_pretty()?;
        let temp_path = path.with_extension("json.tmp");

        let mut f = fs::File::create(&temp_path)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Build a lorebook from the `character_book` embedded in a character card.
    pub fn from_character_book(id: LorebookId, book: CharacterBook) -> Self {
        let mut entries = book.entries;
        renumber_duplicate_ids(&mut entries);

        Lorebook {
            name: book.name,
            description: book.description,
            entries,
            scan_depth: book.scan_depth,
            token_budget: book.token_budget,
            recursive_scanning: book.recursive_scanning,
            extensions: book.extensions,
            is_global: false,
            ..Lorebook::new(id, String::new())
        }
    }

    pub fn version(&self) -> LorebookVersion {
        LorebookVersion::from_entries(&self.entries)
    }

    pub fn entry(&self, entry_id: i64) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Returns a copy with `entry` appended. An entry whose id is already
    /// taken is given the next free id.
    pub fn with_entry(&self, mut entry: Entry) -> Lorebook {
        if self.entry(entry.id).is_some() {
            entry.id = next_free_id(&self.entries);
        }

        let mut entries = self.entries.clone();
        entries.push(entry);
        self.touched(entries)
    }

    pub fn without_entry(&self, entry_id: i64) -> Lorebook {
        let entries = self
            .entries
            .iter()
            .filter(|e| e.id != entry_id)
            .cloned()
            .collect();
        self.touched(entries)
    }

    /// Returns a copy with the entry sharing `entry.id` replaced. Unknown ids
    /// leave the entry list as it was.
    pub fn with_updated_entry(&self, entry: Entry) -> Lorebook {
        let entries = self
            .entries
            .iter()
            .map(|e| if e.id == entry.id { entry.clone() } else { e.clone() })
            .collect();
        self.touched(entries)
    }

    fn touched(&self, entries: Vec<Entry>) -> Lorebook {
        Lorebook {
            entries,
            last_updated: Utc::now(),
            ..self.clone()
        }
    }
}

/// Who a lorebook belongs to for the duration of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LorebookScope {
    Global,
    Character(CharacterId),
}

/// A lorebook taking part in one activation call.
#[derive(Debug, Clone, Copy)]
pub struct ActiveLorebook<'a> {
    pub lorebook: &'a Lorebook,
    pub scope: LorebookScope,
}

impl<'a> ActiveLorebook<'a> {
    pub fn global(lorebook: &'a Lorebook) -> Self {
        Self {
            lorebook,
            scope: LorebookScope::Global,
        }
    }

    pub fn character(lorebook: &'a Lorebook, character: CharacterId) -> Self {
        Self {
            lorebook,
            scope: LorebookScope::Character(character),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self.scope, LorebookScope::Global)
    }
}

/// The lorebook embedded in a character card (`character_book`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterBook {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default)]
    pub recursive_scanning: bool,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "deserialize_entries")]
    pub entries: Vec<Entry>,
}

// One unreadable entry must not cost the rest of the book.
fn deserialize_entries<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Entry>, D::Error> {
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Entry>(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(index, %err, "skipping lorebook entry that does not parse");
                None
            }
        })
        .collect())
}

fn renumber_duplicate_ids(entries: &mut [Entry]) -> usize {
    let mut seen = BTreeSet::new();
    let mut next = next_free_id(entries);
    let mut renumbered = 0;

    for entry in entries.iter_mut() {
        if !seen.insert(entry.id) {
            entry.id = next;
            seen.insert(next);
            next += 1;
            renumbered += 1;
        }
    }

    renumbered
}

fn next_free_id(entries: &[Entry]) -> i64 {
    entries.iter().map(|e| e.id).max().map_or(0, |max| max + 1)
}

fn default_scan_depth() -> usize {
    2
}

fn default_token_budget() -> usize {
    2048
}

fn default_true() -> bool {
    true
}
