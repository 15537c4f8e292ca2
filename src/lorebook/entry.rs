use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Where an activated entry is spliced into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum InsertionPosition {
    #[default]
    #[serde(rename = "before_char")]
    BeforeChar,
    #[serde(rename = "after_char")]
    AfterChar,
    #[serde(rename = "at_depth", alias = "depth")]
    AtDepth,
}

/// One lorebook fact.
///
/// Field names follow the lorebook JSON file format exactly, including its
/// mix of snake_case and camelCase, so files round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_insertion_order")]
    pub insertion_order: i32,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub selective: bool,
    #[serde(default)]
    pub secondary_keys: Vec<String>,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub position: InsertionPosition,
    #[serde(default = "default_depth")]
    pub depth: i32,
    #[serde(
        default,
        serialize_with = "serialize_group",
        deserialize_with = "deserialize_group"
    )]
    pub group: Option<String>,
    #[serde(default)]
    pub group_overlap: bool,
    #[serde(default = "default_group_weight")]
    pub group_weight: i32,
    #[serde(rename = "useProbability", default)]
    pub use_probability: bool,
    #[serde(default = "default_probability")]
    pub probability: i32,
    #[serde(rename = "displayIndex", default)]
    pub display_index: i32,
    #[serde(rename = "excludeRecursion", default)]
    pub exclude_recursion: bool,
    #[serde(rename = "preventRecursion", default)]
    pub prevent_recursion: bool,
    #[serde(rename = "delayUntilRecursion", default)]
    pub delay_until_recursion: bool,
    /// Overrides the lorebook's scan depth; negative values read as 0.
    #[serde(rename = "scanDepth", default)]
    pub scan_depth: Option<i32>,
    #[serde(rename = "matchWholeWords", default)]
    pub match_whole_words: bool,
    /// Carried for round-trips only; vectorized entries are keyword-scanned.
    #[serde(default)]
    pub vectorized: bool,
    #[serde(default)]
    pub sticky: i32,
    #[serde(default)]
    pub cooldown: i32,
    #[serde(default)]
    pub delay: i32,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            id: 0,
            keys: Vec::new(),
            content: String::new(),
            extensions: BTreeMap::new(),
            enabled: true,
            insertion_order: default_insertion_order(),
            case_sensitive: false,
            name: String::new(),
            priority: default_priority(),
            comment: String::new(),
            selective: false,
            secondary_keys: Vec::new(),
            constant: false,
            position: InsertionPosition::BeforeChar,
            depth: default_depth(),
            group: None,
            group_overlap: false,
            group_weight: default_group_weight(),
            use_probability: false,
            probability: default_probability(),
            display_index: 0,
            exclude_recursion: false,
            prevent_recursion: false,
            delay_until_recursion: false,
            scan_depth: None,
            match_whole_words: false,
            vectorized: false,
            sticky: 0,
            cooldown: 0,
            delay: 0,
        }
    }
}

impl Entry {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>, content: impl Into<String>) -> Self {
        Entry {
            keys: keys.into_iter().map(Into::into).collect(),
            content: content.into(),
            ..Entry::default()
        }
    }

    /// Primary keys with blank values removed.
    pub fn primary_keys(&self) -> impl Iterator<Item = &str> {
        usable_keys(&self.keys)
    }

    pub fn secondary_keys(&self) -> impl Iterator<Item = &str> {
        usable_keys(&self.secondary_keys)
    }

    /// An entry that is not constant and has no usable key can never fire.
    pub fn is_malformed(&self) -> bool {
        !self.constant && self.primary_keys().next().is_none()
    }

    /// Probability in percent, or `None` when the entry always fires.
    pub fn activation_chance(&self) -> Option<u32> {
        if !self.use_probability || self.probability >= 100 {
            None
        } else {
            Some(self.probability.max(0) as u32)
        }
    }

    /// Depth for `AtDepth` entries; negative values clamp to 0.
    pub fn insertion_depth(&self) -> Option<usize> {
        match self.position {
            InsertionPosition::AtDepth => Some(self.depth.max(0) as usize),
            _ => None,
        }
    }

    pub fn scan_depth_override(&self) -> Option<usize> {
        self.scan_depth.map(|depth| depth.max(0) as usize)
    }

    /// Turns the entry stays active after a match.
    pub fn sticky_turns(&self) -> u32 {
        self.sticky.max(0) as u32
    }

    pub fn cooldown_turns(&self) -> u32 {
        self.cooldown.max(0) as u32
    }

    /// Messages that must accumulate after attach before the entry can fire.
    pub fn delay_messages(&self) -> usize {
        self.delay.max(0) as usize
    }

    /// The group tag used for comparison. The stored tag is kept verbatim.
    pub fn group_tag(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    /// Whether this entry's content may be fed back into the scan buffer.
    pub fn feeds_recursion(&self) -> bool {
        !self.prevent_recursion && !self.exclude_recursion
    }
}

fn usable_keys(keys: &[String]) -> impl Iterator<Item = &str> {
    keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty())
}

fn serialize_group<S: Serializer>(group: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(group.as_deref().unwrap_or(""))
}

fn deserialize_group<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|g| !g.trim().is_empty()))
}

fn default_true() -> bool {
    true
}

fn default_insertion_order() -> i32 {
    100
}

fn default_priority() -> i32 {
    10
}

fn default_depth() -> i32 {
    4
}

fn default_group_weight() -> i32 {
    100
}

fn default_probability() -> i32 {
    100
}
