pub mod session;
pub mod tracker;

pub use session::{Attachment, ChatSession};
pub use tracker::{ActivationState, EntryPhase, Gate, TurnGate};
