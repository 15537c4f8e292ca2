//! Lorebook ("world info") activation engine for LLM chat prompts.
//!
//! `lorebook-core` decides, once per generation turn, which author-written
//! lorebook entries are relevant to the conversation and where they go in the
//! prompt: keyword scanning over recent messages, recursive expansion through
//! activated content, sticky/cooldown/delay timing, probabilistic entries,
//! exclusive groups, and a token budget that is never exceeded.
//!
//! Lorebooks round-trip through the lorebook JSON file format unchanged.

pub mod activation;
pub mod lorebook;
pub mod settings;
pub mod state;
pub mod types;

pub use activation::{ActivationEngine, ActivationRequest};
pub use settings::{ActivationSettings, CharacterStrategy};
pub use state::ChatSession;
