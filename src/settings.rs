use serde::{Deserialize, Serialize};

/// Order in which character-owned and global lorebooks are merged.
///
/// Serialized as the integer the settings files use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum CharacterStrategy {
    /// Keep the caller's lorebook order.
    Evenly,
    #[default]
    CharacterFirst,
    GlobalFirst,
}

impl From<u8> for CharacterStrategy {
    fn from(raw: u8) -> Self {
        match raw {
            0 => CharacterStrategy::Evenly,
            2 => CharacterStrategy::GlobalFirst,
            _ => CharacterStrategy::CharacterFirst,
        }
    }
}

impl From<CharacterStrategy> for u8 {
    fn from(strategy: CharacterStrategy) -> Self {
        match strategy {
            CharacterStrategy::Evenly => 0,
            CharacterStrategy::CharacterFirst => 1,
            CharacterStrategy::GlobalFirst => 2,
        }
    }
}

// Key point:
// Serializable
// Explicit defaults
// Call-wide; scan defaults live on each lorebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationSettings {
    #[serde(rename = "world_info_budget")]
    pub token_budget: usize,
    /// 0 means no cap.
    #[serde(rename = "world_info_budget_cap")]
    pub budget_cap: usize,
    #[serde(rename = "world_info_recursive")]
    pub recursive_scanning: bool,
    #[serde(rename = "world_info_overflow_alert")]
    pub overflow_alert: bool,
    #[serde(rename = "world_info_character_strategy")]
    pub character_strategy: CharacterStrategy,
    pub max_recursion_rounds: usize,
    /// Wall-clock bound on recursion; 0 disables it.
    pub timeout_ms: u64,
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            token_budget: 2048,
            budget_cap: 0,
            recursive_scanning: true,
            overflow_alert: false,
            character_strategy: CharacterStrategy::CharacterFirst,
            max_recursion_rounds: 100,
            timeout_ms: 5000,
        }
    }
}

impl ActivationSettings {
    pub fn effective_budget(&self) -> usize {
        if self.budget_cap > 0 {
            self.token_budget.min(self.budget_cap)
        } else {
            self.token_budget
        }
    }
}
