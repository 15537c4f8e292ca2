pub mod activation;
pub mod identifiers;

pub use activation::{
    ActivationError, ActivationMetadata, ActivationResult, ChatMessage, Injection, TokenCountError,
};
pub use identifiers::{CharacterId, EntryId, LorebookId, LorebookVersion};
