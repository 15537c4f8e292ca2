pub mod entry;
pub mod lorebook;

pub use crate::types::identifiers::{CharacterId, EntryId, LorebookId, LorebookVersion};
pub use entry::{Entry, InsertionPosition};
pub use lorebook::{ActiveLorebook, CharacterBook, Lorebook, LorebookError, LorebookScope};
