//! Conversation memory
//!
//! Ordered, append-only record of prior user/assistant turns, supplied to
//! planning and answer synthesis.

pub mod store;

pub use store::{ConversationHistory, ConversationMessage};
