use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::lorebook::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LorebookId(i64);

impl LorebookId {
    pub fn new(raw: i64) -> Self {
        LorebookId(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LorebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(i64);

impl CharacterId {
    pub fn new(raw: i64) -> Self {
        CharacterId(raw)
    }
}

/// Session-wide identity of an entry: `"<lorebook id>/<entry id>"`.
///
/// Entry ids are only unique inside their lorebook, so the owning lorebook is
/// part of the key. Serializes as a plain string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(lorebook: LorebookId, entry: i64) -> Self {
        EntryId(format!("{}/{}", lorebook.get(), entry))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lorebook half of the identity.
    pub fn lorebook(&self) -> Option<LorebookId> {
        let (book, _) = self.0.split_once('/')?;
        book.parse().ok().map(LorebookId)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content hash of a lorebook's entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LorebookVersion(String);

impl LorebookVersion {
    pub fn from_entries(entries: &[Entry]) -> Self {
        let mut hasher = Sha256::new();
        for entry in entries {
            // Struct fields serialize in declaration order and extensions are a
            // BTreeMap, so this is canonical. Entry has only string-keyed maps
            // and derived impls, which serde_json cannot fail on.
            serde_json::to_writer(&mut hasher, entry)
                .expect("entry serialization into a hasher cannot fail");
            hasher.update(b"\n");
        }

        let hash = hasher.finalize();
        let hex = hex::encode(hash);

        LorebookVersion(format!("sha256:{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
